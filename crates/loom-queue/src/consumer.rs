use std::sync::Arc;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::queue::QueueReceiver;
use crate::worker::MessageHandler;

/// Counts reported when a consumer stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub handled: usize,
    pub failed: usize,
}

/// Pulls messages and runs `handler` on at most `concurrency` of them at a
/// time. Stops when the queue closes or `shutdown` flips to true, then waits
/// for in-flight messages.
pub async fn consume<M, H>(
    mut receiver: QueueReceiver<M>,
    handler: Arc<H>,
    concurrency: usize,
    mut shutdown: watch::Receiver<bool>,
) -> ConsumerStats
where
    M: Send + 'static,
    H: MessageHandler<M> + ?Sized + 'static,
{
    let queue = receiver.name().to_string();
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks: JoinSet<bool> = JoinSet::new();
    let mut stats = ConsumerStats::default();
    info!(queue = %queue, concurrency, "consumer started");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(queue = %queue, "consumer shutting down");
                    break;
                }
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                record(&mut stats, joined, &queue);
            }
            message = receiver.recv() => {
                let Some(message) = message else {
                    info!(queue = %queue, "queue closed");
                    break;
                };
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let handler = handler.clone();
                let queue = queue.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    match handler.handle(message).await {
                        Ok(()) => true,
                        Err(err) => {
                            error!(queue = %queue, error = %err, "failed to handle message");
                            false
                        }
                    }
                });
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        record(&mut stats, joined, &queue);
    }
    info!(queue = %queue, handled = stats.handled, failed = stats.failed, "consumer stopped");
    stats
}

fn record(stats: &mut ConsumerStats, joined: Result<bool, tokio::task::JoinError>, queue: &str) {
    match joined {
        Ok(true) => stats.handled += 1,
        Ok(false) => {
            stats.handled += 1;
            stats.failed += 1;
        }
        Err(err) => {
            error!(queue, error = %err, "message handler panicked");
            stats.failed += 1;
        }
    }
}
