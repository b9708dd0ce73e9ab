use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue {0} is closed")]
    Closed(String),
    #[error("invalid queue message: {0}")]
    InvalidMessage(#[from] serde_json::Error),
    #[error("run {run_id} not found in cluster {cluster_id}")]
    RunNotFound { run_id: String, cluster_id: String },
    #[error("lock {0} was lost while the message was being handled")]
    LockLost(String),
    #[error(transparent)]
    Store(#[from] loom_store::StoreError),
    #[error(transparent)]
    Agent(#[from] loom_agent::AgentError),
}
