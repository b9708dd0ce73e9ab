use std::collections::HashSet;
use std::sync::Arc;

use loom_store::{Invocation, JobId, MessageKind, Run, RunMessage, RunStatus};
use serde_json::Value;

/// Working set of one machine execution. `run`, `all_available_tools` and
/// `additional_context` are fixed for the execution; `messages` and
/// `waiting_jobs` only grow; `status` and `result` keep the latest write.
#[derive(Clone, Debug)]
pub struct RunGraphState {
    pub run: Arc<Run>,
    pub status: RunStatus,
    pub messages: Vec<RunMessage>,
    pub waiting_jobs: Vec<JobId>,
    pub all_available_tools: Arc<Vec<String>>,
    pub additional_context: Option<String>,
    pub result: Option<Value>,
}

/// Output of one node.
#[derive(Clone, Debug, Default)]
pub struct StateUpdate {
    pub messages: Vec<RunMessage>,
    pub waiting_jobs: Vec<JobId>,
    pub status: Option<RunStatus>,
    pub result: Option<Value>,
}

impl RunGraphState {
    pub fn new(run: Run, messages: Vec<RunMessage>) -> Self {
        let status = run.status;
        Self {
            run: Arc::new(run),
            status,
            messages,
            waiting_jobs: Vec::new(),
            all_available_tools: Arc::new(Vec::new()),
            additional_context: None,
            result: None,
        }
    }

    pub fn with_waiting_jobs(mut self, waiting_jobs: Vec<JobId>) -> Self {
        self.waiting_jobs = waiting_jobs;
        self
    }

    pub fn with_available_tools(mut self, tools: Vec<String>) -> Self {
        self.all_available_tools = Arc::new(tools);
        self
    }

    pub fn with_additional_context(mut self, context: Option<String>) -> Self {
        self.additional_context = context.filter(|context| !context.trim().is_empty());
        self
    }

    pub fn apply(&mut self, update: StateUpdate) {
        self.messages.extend(update.messages);
        self.waiting_jobs.extend(update.waiting_jobs);
        if let Some(status) = update.status {
            self.status = status;
        }
        if update.result.is_some() {
            self.result = update.result;
        }
    }

    pub fn last_message(&self) -> Option<&RunMessage> {
        self.messages.last()
    }

    pub fn last_kind(&self) -> Option<MessageKind> {
        self.last_message().map(RunMessage::kind)
    }

    pub fn resolved_invocation_ids(&self) -> HashSet<&str> {
        self.messages
            .iter()
            .filter_map(RunMessage::as_invocation_result)
            .map(|result| result.id.as_str())
            .collect()
    }

    /// True when some invocation anywhere in history has no matching result.
    pub fn has_outstanding_invocations(&self) -> bool {
        let resolved = self.resolved_invocation_ids();
        self.messages
            .iter()
            .filter_map(RunMessage::as_agent)
            .flat_map(|agent| agent.invocations.iter())
            .any(|invocation| !resolved.contains(invocation.id.as_str()))
    }

    /// Unresolved invocations of the most recent agent message that still has
    /// any.
    pub fn pending_invocations(&self) -> Vec<Invocation> {
        let resolved = self.resolved_invocation_ids();
        self.messages
            .iter()
            .rev()
            .filter_map(RunMessage::as_agent)
            .map(|agent| {
                agent
                    .invocations
                    .iter()
                    .filter(|invocation| !resolved.contains(invocation.id.as_str()))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .find(|pending| !pending.is_empty())
            .unwrap_or_default()
    }
}
