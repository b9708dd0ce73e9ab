//! Locks held for as long as a message is being handled.

use std::sync::Arc;
use std::time::Duration;

use loom_store::{LockHandle, LockManager, StoreResult};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, warn};

pub(crate) async fn release(locks: &dyn LockManager, handle: LockHandle) {
    let key = handle.key.clone();
    if let Err(err) = locks.unlock(handle).await {
        error!(lock_key = %key, error = %err, "failed to release lock");
    }
}

/// A lock renewed in the background every third of its TTL.
///
/// [`LockLease::lost`] resolves once a renewal finds the lock gone or fails.
/// Dropping the lease without [`LockLease::release`] still releases the lock
/// from a spawned task, so an unwinding handler never strands it.
pub struct LockLease {
    locks: Arc<dyn LockManager>,
    handle: Option<LockHandle>,
    heartbeat: JoinHandle<()>,
    lost: watch::Receiver<bool>,
}

impl LockLease {
    /// Returns `None` when another holder owns the lock.
    pub async fn acquire(
        locks: Arc<dyn LockManager>,
        key: &str,
        ttl: Duration,
    ) -> StoreResult<Option<Self>> {
        let Some(handle) = locks.try_lock(key, ttl).await? else {
            return Ok(None);
        };
        let (lost_tx, lost) = watch::channel(false);
        let heartbeat = tokio::spawn(renew(locks.clone(), handle.clone(), ttl, lost_tx));
        Ok(Some(Self {
            locks,
            handle: Some(handle),
            heartbeat,
            lost,
        }))
    }

    /// Resolves once the lock can no longer be renewed. Pending forever while
    /// the lease holds.
    pub async fn lost(&mut self) {
        if self.lost.wait_for(|lost| *lost).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    pub async fn release(mut self) {
        self.heartbeat.abort();
        if let Some(handle) = self.handle.take() {
            release(self.locks.as_ref(), handle).await;
        }
    }
}

impl Drop for LockLease {
    fn drop(&mut self) {
        self.heartbeat.abort();
        let Some(handle) = self.handle.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let locks = self.locks.clone();
                runtime.spawn(async move { release(locks.as_ref(), handle).await });
            }
            Err(_) => warn!(lock_key = %handle.key, "no runtime to release lock, leaving it to expire"),
        }
    }
}

async fn renew(
    locks: Arc<dyn LockManager>,
    handle: LockHandle,
    ttl: Duration,
    lost: watch::Sender<bool>,
) {
    let period = (ttl / 3).max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        ticker.tick().await;
        match locks.extend(&handle, ttl).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(lock_key = %handle.key, "lock was taken over by another holder");
                break;
            }
            Err(err) => {
                error!(lock_key = %handle.key, error = %err, "failed to renew lock");
                break;
            }
        }
    }
    lost.send_replace(true);
}
