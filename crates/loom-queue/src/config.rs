use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Requeues allowed while a run's lock is held elsewhere.
    pub max_lock_attempts: u32,
    /// Requeue delay is `lock_backoff_base ^ attempts` seconds.
    pub lock_backoff_base: u64,
    pub lock_ttl: Duration,
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_lock_attempts: 5,
            lock_backoff_base: 5,
            lock_ttl: Duration::from_secs(180),
            concurrency: 5,
        }
    }
}

impl WorkerConfig {
    pub fn lock_retry_delay(&self, attempts: u32) -> Duration {
        Duration::from_secs(self.lock_backoff_base.saturating_pow(attempts))
    }
}
