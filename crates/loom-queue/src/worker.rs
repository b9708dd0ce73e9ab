//! Message handlers for the run-process and name-generation queues.

use std::sync::Arc;

use async_trait::async_trait;
use loom_agent::{RunProcessor, TitleGenerator};
use loom_store::{LockManager, RunStore};
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::WorkerConfig;
use crate::errors::QueueError;
use crate::lease::LockLease;
use crate::message::{GenerateNameMessage, RunProcessMessage};
use crate::queue::Queue;

#[async_trait]
pub trait MessageHandler<M>: Send + Sync {
    async fn handle(&self, message: M) -> Result<(), QueueError>;
}

/// Processes one run per message under the `run-process-{runId}` lock.
/// Contended messages are requeued with exponential delay a bounded number
/// of times and then dropped. The lock is renewed while the run is processed;
/// if renewal fails processing stops so no second worker overlaps it.
pub struct RunProcessWorker {
    processor: Arc<RunProcessor>,
    locks: Arc<dyn LockManager>,
    queue: Arc<dyn Queue<RunProcessMessage>>,
    config: WorkerConfig,
    mock_responses: Option<Vec<String>>,
}

impl RunProcessWorker {
    pub fn new(
        processor: Arc<RunProcessor>,
        locks: Arc<dyn LockManager>,
        queue: Arc<dyn Queue<RunProcessMessage>>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            processor,
            locks,
            queue,
            config,
            mock_responses: None,
        }
    }

    /// Scripted model responses used instead of a live model.
    pub fn with_mock_responses(mut self, responses: Vec<String>) -> Self {
        self.mock_responses = Some(responses);
        self
    }

    async fn requeue(&self, message: RunProcessMessage) -> Result<(), QueueError> {
        let attempts = message.lock_attempts.unwrap_or(0);
        if attempts >= self.config.max_lock_attempts {
            warn!(attempts, "could not acquire run lock, dropping message");
            return Ok(());
        }
        let delay = self.config.lock_retry_delay(attempts);
        info!(attempts, delay_secs = delay.as_secs(), "run is locked, requeueing");
        self.queue
            .send(
                RunProcessMessage {
                    lock_attempts: Some(attempts + 1),
                    ..message
                },
                Some(delay),
            )
            .await
    }

    async fn process(&self, message: &RunProcessMessage) -> Result<(), QueueError> {
        let runs = self.processor.stores().runs.clone();
        let run = runs
            .get_run(&message.cluster_id, &message.run_id)
            .await?
            .ok_or_else(|| QueueError::RunNotFound {
                run_id: message.run_id.clone(),
                cluster_id: message.cluster_id.clone(),
            })?;
        let tags = runs.get_run_tags(&message.cluster_id, &message.run_id).await?;
        self.processor
            .process_run(run, tags, self.mock_responses.clone())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler<RunProcessMessage> for RunProcessWorker {
    async fn handle(&self, message: RunProcessMessage) -> Result<(), QueueError> {
        let span = info_span!(
            "run_process",
            run_id = %message.run_id,
            cluster_id = %message.cluster_id
        );
        async move {
            let Some(mut lease) =
                LockLease::acquire(self.locks.clone(), &message.lock_key(), self.config.lock_ttl)
                    .await?
            else {
                return self.requeue(message).await;
            };

            let outcome = tokio::select! {
                outcome = self.process(&message) => outcome,
                () = lease.lost() => {
                    error!("run lock lost, abandoning processing");
                    Err(QueueError::LockLost(message.lock_key()))
                }
            };
            lease.release().await;
            outcome
        }
        .instrument(span)
        .await
    }
}

/// Names a run from its first message. A run that already has a name, or
/// whose naming lock is held, is left alone.
pub struct NameGenerationWorker {
    titles: TitleGenerator,
    runs: Arc<dyn RunStore>,
    locks: Arc<dyn LockManager>,
    config: WorkerConfig,
}

impl NameGenerationWorker {
    pub fn new(
        titles: TitleGenerator,
        runs: Arc<dyn RunStore>,
        locks: Arc<dyn LockManager>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            titles,
            runs,
            locks,
            config,
        }
    }
}

#[async_trait]
impl MessageHandler<GenerateNameMessage> for NameGenerationWorker {
    async fn handle(&self, message: GenerateNameMessage) -> Result<(), QueueError> {
        let span = info_span!("run_generate_name", run_id = %message.run_id);
        async move {
            let Some(mut lease) =
                LockLease::acquire(self.locks.clone(), &message.lock_key(), self.config.lock_ttl)
                    .await?
            else {
                info!("name generation already in progress");
                return Ok(());
            };

            let outcome = tokio::select! {
                outcome = self.titles.generate_run_name(
                    self.runs.as_ref(),
                    &message.cluster_id,
                    &message.run_id,
                    &message.content,
                ) => outcome.map_err(QueueError::from),
                () = lease.lost() => Err(QueueError::LockLost(message.lock_key())),
            };
            lease.release().await;

            if let Some(name) = outcome? {
                info!(name = %name, "generated run name");
            }
            Ok(())
        }
        .instrument(span)
        .await
    }
}
