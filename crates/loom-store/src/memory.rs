use crate::store::{
    JobStore, LockHandle, LockManager, MessageStore, RunStore, StoreError, StoreResult,
    ToolDefinitionStore,
};
use crate::types::{
    new_id, ClusterId, ClusterSettings, CreateJobRequest, CreatedJob, Job, JobId, JobStatus,
    MessageId, ResultType, Run, RunId, RunMessage, RunStatus, RunTags, ToolDefinition,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

type RunKey = (ClusterId, RunId);

#[derive(Debug, Default)]
struct MemoryState {
    runs: BTreeMap<RunKey, Run>,
    tags: BTreeMap<RunKey, RunTags>,
    messages: BTreeMap<RunKey, Vec<RunMessage>>,
    jobs: BTreeMap<(ClusterId, JobId), Job>,
    job_order: Vec<(ClusterId, JobId)>,
    idempotency: BTreeMap<String, JobId>,
    tools: BTreeMap<ClusterId, BTreeMap<String, ToolDefinition>>,
    settings: BTreeMap<ClusterId, ClusterSettings>,
    locks: BTreeMap<String, HeldLock>,
}

#[derive(Debug)]
struct HeldLock {
    token: String,
    expires_at: Instant,
}

fn run_key(cluster_id: &str, run_id: &str) -> RunKey {
    (cluster_id.to_string(), run_id.to_string())
}

fn job_idempotency_key(request: &CreateJobRequest) -> Option<String> {
    let tool_call_id = request.tool_call_id.as_deref()?;
    Some(format!(
        "{}:{}:{}",
        request.cluster_id,
        request.run_id.as_deref().unwrap_or_default(),
        tool_call_id
    ))
}

/// In-process implementation of every store trait. Used by tests and the CLI.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory store mutex poisoned".to_string()))
    }

    pub fn insert_run(&self, run: Run) -> StoreResult<()> {
        let mut state = self.state()?;
        state
            .runs
            .insert(run_key(&run.cluster_id, &run.id), run);
        Ok(())
    }

    pub fn set_run_tags(&self, cluster_id: &str, run_id: &str, tags: RunTags) -> StoreResult<()> {
        self.state()?.tags.insert(run_key(cluster_id, run_id), tags);
        Ok(())
    }

    pub fn register_tool(&self, cluster_id: &str, definition: ToolDefinition) -> StoreResult<()> {
        self.state()?
            .tools
            .entry(cluster_id.to_string())
            .or_default()
            .insert(definition.name.clone(), definition);
        Ok(())
    }

    pub fn set_cluster_settings(
        &self,
        cluster_id: &str,
        settings: ClusterSettings,
    ) -> StoreResult<()> {
        self.state()?
            .settings
            .insert(cluster_id.to_string(), settings);
        Ok(())
    }

    /// Resolves a job the way a polling machine would after executing it.
    pub fn complete_job(
        &self,
        cluster_id: &str,
        job_id: &str,
        result: Option<Value>,
        result_type: ResultType,
    ) -> StoreResult<()> {
        let mut state = self.state()?;
        let job = state
            .jobs
            .get_mut(&(cluster_id.to_string(), job_id.to_string()))
            .ok_or_else(|| StoreError::NotFound {
                resource: "job",
                id: job_id.to_string(),
            })?;
        job.status = match result_type {
            ResultType::Rejection => JobStatus::Failure,
            _ => JobStatus::Success,
        };
        job.result = result;
        job.result_type = Some(result_type);
        Ok(())
    }

    pub fn set_job_status(&self, cluster_id: &str, job_id: &str, status: JobStatus) -> StoreResult<()> {
        let mut state = self.state()?;
        let job = state
            .jobs
            .get_mut(&(cluster_id.to_string(), job_id.to_string()))
            .ok_or_else(|| StoreError::NotFound {
                resource: "job",
                id: job_id.to_string(),
            })?;
        job.status = status;
        Ok(())
    }

    pub fn jobs(&self) -> StoreResult<Vec<Job>> {
        let state = self.state()?;
        Ok(state
            .job_order
            .iter()
            .filter_map(|key| state.jobs.get(key).cloned())
            .collect())
    }

    pub fn messages(&self, cluster_id: &str, run_id: &str) -> StoreResult<Vec<RunMessage>> {
        Ok(self
            .state()?
            .messages
            .get(&run_key(cluster_id, run_id))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl MessageStore for MemoryStore {
    async fn get_run_messages(
        &self,
        cluster_id: &str,
        run_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<RunMessage>> {
        let state = self.state()?;
        let Some(messages) = state.messages.get(&run_key(cluster_id, run_id)) else {
            return Ok(Vec::new());
        };
        let start = match after {
            Some(cursor) => messages
                .iter()
                .position(|message| message.id == cursor)
                .map(|index| index + 1)
                .ok_or_else(|| StoreError::NotFound {
                    resource: "message",
                    id: cursor.to_string(),
                })?,
            None => 0,
        };
        Ok(messages.iter().skip(start).take(limit).cloned().collect())
    }

    async fn insert_run_message(&self, message: &RunMessage) -> StoreResult<MessageId> {
        let mut state = self.state()?;
        let log = state
            .messages
            .entry(run_key(&message.cluster_id, &message.run_id))
            .or_default();
        if log.iter().any(|existing| existing.id == message.id) {
            return Err(StoreError::Conflict(format!(
                "message {} already exists",
                message.id
            )));
        }
        let mut stored = message.clone();
        stored.persisted = true;
        log.push(stored);
        Ok(message.id.clone())
    }
}

#[async_trait::async_trait]
impl RunStore for MemoryStore {
    async fn get_run(&self, cluster_id: &str, run_id: &str) -> StoreResult<Option<Run>> {
        Ok(self.state()?.runs.get(&run_key(cluster_id, run_id)).cloned())
    }

    async fn get_run_tags(&self, cluster_id: &str, run_id: &str) -> StoreResult<RunTags> {
        Ok(self
            .state()?
            .tags
            .get(&run_key(cluster_id, run_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn update_run_status(
        &self,
        cluster_id: &str,
        run_id: &str,
        status: RunStatus,
        failure_reason: Option<&str>,
    ) -> StoreResult<()> {
        let mut state = self.state()?;
        let run = state
            .runs
            .get_mut(&run_key(cluster_id, run_id))
            .ok_or_else(|| StoreError::NotFound {
                resource: "run",
                id: run_id.to_string(),
            })?;
        run.status = status;
        run.failure_reason = failure_reason
            .filter(|reason| !reason.is_empty())
            .map(str::to_string);
        Ok(())
    }

    async fn set_run_name(&self, cluster_id: &str, run_id: &str, name: &str) -> StoreResult<()> {
        let mut state = self.state()?;
        let run = state
            .runs
            .get_mut(&run_key(cluster_id, run_id))
            .ok_or_else(|| StoreError::NotFound {
                resource: "run",
                id: run_id.to_string(),
            })?;
        run.name = Some(name.to_string());
        Ok(())
    }
}

#[async_trait::async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, request: CreateJobRequest) -> StoreResult<CreatedJob> {
        if request.target_fn.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "job target function must not be empty".to_string(),
            ));
        }

        let mut state = self.state()?;
        let idempotency_key = job_idempotency_key(&request);
        if let Some(existing) = idempotency_key
            .as_ref()
            .and_then(|key| state.idempotency.get(key))
        {
            return Ok(CreatedJob {
                id: existing.clone(),
                created: false,
            });
        }

        let id = new_id();
        let job = Job {
            id: id.clone(),
            cluster_id: request.cluster_id.clone(),
            run_id: request.run_id,
            tool_call_id: request.tool_call_id,
            target_fn: request.target_fn,
            target_args: request.target_args,
            status: JobStatus::Pending,
            result: None,
            result_type: None,
        };
        let key = (request.cluster_id, id.clone());
        state.jobs.insert(key.clone(), job);
        state.job_order.push(key);
        if let Some(idempotency_key) = idempotency_key {
            state.idempotency.insert(idempotency_key, id.clone());
        }

        Ok(CreatedJob { id, created: true })
    }

    async fn get_job(&self, cluster_id: &str, job_id: &str) -> StoreResult<Option<Job>> {
        Ok(self
            .state()?
            .jobs
            .get(&(cluster_id.to_string(), job_id.to_string()))
            .cloned())
    }

    async fn get_waiting_job_ids(&self, cluster_id: &str, run_id: &str) -> StoreResult<Vec<JobId>> {
        let state = self.state()?;
        Ok(state
            .job_order
            .iter()
            .filter_map(|key| state.jobs.get(key))
            .filter(|job| {
                job.cluster_id == cluster_id
                    && job.run_id.as_deref() == Some(run_id)
                    && job.status.is_waiting()
            })
            .map(|job| job.id.clone())
            .collect())
    }
}

#[async_trait::async_trait]
impl ToolDefinitionStore for MemoryStore {
    async fn get_tool_definition(
        &self,
        cluster_id: &str,
        name: &str,
    ) -> StoreResult<Option<ToolDefinition>> {
        Ok(self
            .state()?
            .tools
            .get(cluster_id)
            .and_then(|tools| tools.get(name))
            .cloned())
    }

    async fn available_tools(&self, cluster_id: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .state()?
            .tools
            .get(cluster_id)
            .map(|tools| tools.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_cluster_settings(&self, cluster_id: &str) -> StoreResult<ClusterSettings> {
        Ok(self
            .state()?
            .settings
            .get(cluster_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl LockManager for MemoryStore {
    async fn try_lock(&self, key: &str, ttl: Duration) -> StoreResult<Option<LockHandle>> {
        let mut state = self.state()?;
        let now = Instant::now();
        if let Some(held) = state.locks.get(key) {
            if held.expires_at > now {
                tracing::debug!(lock_key = key, "lock is held by another worker");
                return Ok(None);
            }
        }
        let token = new_id();
        state.locks.insert(
            key.to_string(),
            HeldLock {
                token: token.clone(),
                expires_at: now + ttl,
            },
        );
        Ok(Some(LockHandle {
            key: key.to_string(),
            token,
        }))
    }

    async fn extend(&self, handle: &LockHandle, ttl: Duration) -> StoreResult<bool> {
        let mut state = self.state()?;
        match state.locks.get_mut(&handle.key) {
            Some(held) if held.token == handle.token => {
                held.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn unlock(&self, handle: LockHandle) -> StoreResult<()> {
        let mut state = self.state()?;
        // A lock that expired and was re-acquired belongs to the new holder.
        if state
            .locks
            .get(&handle.key)
            .is_some_and(|held| held.token == handle.token)
        {
            state.locks.remove(&handle.key);
        }
        Ok(())
    }
}
