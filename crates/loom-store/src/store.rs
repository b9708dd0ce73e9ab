use crate::types::{
    ClusterSettings, CreateJobRequest, CreatedJob, Job, JobId, MessageId, Run, RunMessage,
    RunStatus, RunTags, ToolDefinition,
};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("resource not found: {resource} ({id})")]
    NotFound { resource: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Append-only run message log.
#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    /// Messages in creation order. `after` is an exclusive message id cursor.
    async fn get_run_messages(
        &self,
        cluster_id: &str,
        run_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<RunMessage>>;

    async fn insert_run_message(&self, message: &RunMessage) -> StoreResult<MessageId>;
}

#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    async fn get_run(&self, cluster_id: &str, run_id: &str) -> StoreResult<Option<Run>>;

    async fn get_run_tags(&self, cluster_id: &str, run_id: &str) -> StoreResult<RunTags>;

    async fn update_run_status(
        &self,
        cluster_id: &str,
        run_id: &str,
        status: RunStatus,
        failure_reason: Option<&str>,
    ) -> StoreResult<()>;

    async fn set_run_name(&self, cluster_id: &str, run_id: &str, name: &str) -> StoreResult<()>;
}

#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Idempotent on `tool_call_id`: a second request with the same key returns
    /// the existing job with `created == false`.
    async fn create_job(&self, request: CreateJobRequest) -> StoreResult<CreatedJob>;

    async fn get_job(&self, cluster_id: &str, job_id: &str) -> StoreResult<Option<Job>>;

    /// Ids of the run's jobs that are still pending or running.
    async fn get_waiting_job_ids(&self, cluster_id: &str, run_id: &str) -> StoreResult<Vec<JobId>>;
}

/// Registry of service functions and per-cluster settings.
#[async_trait::async_trait]
pub trait ToolDefinitionStore: Send + Sync {
    async fn get_tool_definition(
        &self,
        cluster_id: &str,
        name: &str,
    ) -> StoreResult<Option<ToolDefinition>>;

    async fn available_tools(&self, cluster_id: &str) -> StoreResult<Vec<String>>;

    async fn get_cluster_settings(&self, cluster_id: &str) -> StoreResult<ClusterSettings>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockHandle {
    pub key: String,
    pub token: String,
}

/// Distributed mutex. The only mutual-exclusion primitive between workers.
#[async_trait::async_trait]
pub trait LockManager: Send + Sync {
    /// Returns `None` when another holder owns an unexpired lock on `key`.
    async fn try_lock(&self, key: &str, ttl: Duration) -> StoreResult<Option<LockHandle>>;

    /// Pushes the expiry of a held lock to `ttl` from now. Returns `false`
    /// once the handle no longer owns the lock.
    async fn extend(&self, handle: &LockHandle, ttl: Duration) -> StoreResult<bool>;

    async fn unlock(&self, handle: LockHandle) -> StoreResult<()>;
}
