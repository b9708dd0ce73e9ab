use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use loom_store::{CreateJobRequest, JobStore, Run, RunMessage, RunStatus, RunTags, StoreError};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::errors::AgentError;

/// Downstream notifications for run activity.
#[async_trait]
pub trait RunNotifier: Send + Sync {
    async fn notify_new_message(&self, message: &RunMessage, tags: &RunTags) -> Result<(), AgentError>;

    /// Called only when `status` differs from `previous`.
    async fn notify_status_change(
        &self,
        run: &Run,
        tags: &RunTags,
        previous: RunStatus,
        status: RunStatus,
        result: Option<&Value>,
    ) -> Result<(), AgentError>;
}

#[derive(Default)]
pub struct NoopNotifier;

#[async_trait]
impl RunNotifier for NoopNotifier {
    async fn notify_new_message(&self, _message: &RunMessage, _tags: &RunTags) -> Result<(), AgentError> {
        Ok(())
    }

    async fn notify_status_change(
        &self,
        _run: &Run,
        _tags: &RunTags,
        _previous: RunStatus,
        _status: RunStatus,
        _result: Option<&Value>,
    ) -> Result<(), AgentError> {
        Ok(())
    }
}

/// Creates a job for the run's `onStatusChange` function carrying
/// `{runId, status, tags, result}`.
pub struct JobStatusNotifier {
    jobs: Arc<dyn JobStore>,
}

impl JobStatusNotifier {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl RunNotifier for JobStatusNotifier {
    async fn notify_new_message(&self, _message: &RunMessage, _tags: &RunTags) -> Result<(), AgentError> {
        Ok(())
    }

    async fn notify_status_change(
        &self,
        run: &Run,
        tags: &RunTags,
        previous: RunStatus,
        status: RunStatus,
        result: Option<&Value>,
    ) -> Result<(), AgentError> {
        let Some(target) = run.on_status_change.as_deref() else {
            return Ok(());
        };
        if previous == status {
            return Ok(());
        }
        let valid_target = target
            .split_once('_')
            .is_some_and(|(service, function)| !service.is_empty() && !function.is_empty());
        if !valid_target {
            warn!(on_status_change = target, "could not determine notification target");
            return Ok(());
        }

        let created = self
            .jobs
            .create_job(CreateJobRequest {
                cluster_id: run.cluster_id.clone(),
                run_id: None,
                tool_call_id: None,
                target_fn: target.to_string(),
                target_args: json!({
                    "runId": run.id,
                    "status": status,
                    "tags": tags,
                    "result": result.cloned().unwrap_or(Value::Null),
                }),
            })
            .await
            .map_err(AgentError::Store)?;
        info!(job_id = %created.id, run_id = %run.id, "created job with run result");
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    NewMessage {
        message_id: String,
    },
    StatusChange {
        run_id: String,
        previous: RunStatus,
        status: RunStatus,
        result: Option<Value>,
    },
}

/// Records notifications for inspection.
#[derive(Clone, Default)]
pub struct BufferedNotifier {
    inner: Arc<Mutex<Vec<Notification>>>,
}

impl BufferedNotifier {
    pub fn snapshot(&self) -> Vec<Notification> {
        self.inner
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn push(&self, notification: Notification) -> Result<(), AgentError> {
        self.inner
            .lock()
            .map_err(|_| AgentError::Store(StoreError::Backend("notifier mutex poisoned".to_string())))?
            .push(notification);
        Ok(())
    }
}

#[async_trait]
impl RunNotifier for BufferedNotifier {
    async fn notify_new_message(&self, message: &RunMessage, _tags: &RunTags) -> Result<(), AgentError> {
        self.push(Notification::NewMessage {
            message_id: message.id.clone(),
        })
    }

    async fn notify_status_change(
        &self,
        run: &Run,
        _tags: &RunTags,
        previous: RunStatus,
        status: RunStatus,
        result: Option<&Value>,
    ) -> Result<(), AgentError> {
        self.push(Notification::StatusChange {
            run_id: run.id.clone(),
            previous,
            status,
            result: result.cloned(),
        })
    }
}
