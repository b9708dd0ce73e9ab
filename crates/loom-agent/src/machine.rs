//! Run state machine: two nodes and three pure edge functions.

use std::sync::Arc;

use async_trait::async_trait;
use loom_llm::ChatModel;
use loom_store::{MessageKind, RunMessage, RunStatus};
use tracing::debug;

use crate::errors::AgentError;
use crate::nodes::{ModelNode, ToolNode};
use crate::state::RunGraphState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Next {
    Model,
    Tool,
    Halt,
}

/// Entry edge, evaluated once per execution.
pub fn post_start(state: &RunGraphState) -> Next {
    if !state.waiting_jobs.is_empty() {
        return Next::Halt;
    }
    if state.last_message().is_some_and(RunMessage::has_invocations) {
        return Next::Tool;
    }
    if state.has_outstanding_invocations() {
        return Next::Tool;
    }
    if state.last_kind() == Some(MessageKind::Agent) {
        return Next::Halt;
    }
    Next::Model
}

pub fn post_model(state: &RunGraphState) -> Next {
    if state.status != RunStatus::Running {
        return Next::Halt;
    }
    if state.last_message().is_some_and(RunMessage::has_invocations) {
        return Next::Tool;
    }
    if state.last_kind() == Some(MessageKind::Supervisor) {
        return Next::Model;
    }
    Next::Halt
}

pub fn post_tool(state: &RunGraphState) -> Next {
    match state.status {
        RunStatus::Done | RunStatus::Paused => Next::Halt,
        _ => Next::Model,
    }
}

/// Persists the messages a step produced before the next edge is evaluated.
/// Implementations write every message with `persisted == false` in order and
/// mark it persisted.
#[async_trait]
pub trait StepSaver: Send + Sync {
    async fn save(&self, messages: &mut [RunMessage]) -> Result<(), AgentError>;
}

/// Saver that only marks messages persisted.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopStepSaver;

#[async_trait]
impl StepSaver for NoopStepSaver {
    async fn save(&self, messages: &mut [RunMessage]) -> Result<(), AgentError> {
        for message in messages.iter_mut() {
            message.persisted = true;
        }
        Ok(())
    }
}

/// Picks the model that answers each model step.
pub trait ModelSource: Send + Sync {
    fn model_for(&self, state: &RunGraphState) -> Result<Arc<dyn ChatModel>, AgentError>;
}

impl ModelSource for Arc<dyn ChatModel> {
    fn model_for(&self, _state: &RunGraphState) -> Result<Arc<dyn ChatModel>, AgentError> {
        Ok(self.clone())
    }
}

pub struct RunMachine {
    model_node: ModelNode,
    tool_node: ToolNode,
    max_steps: usize,
}

impl RunMachine {
    pub fn new(model_node: ModelNode, tool_node: ToolNode, max_steps: usize) -> Self {
        Self {
            model_node,
            tool_node,
            max_steps,
        }
    }

    /// Drives `state` to a halting edge, saving after every step.
    pub async fn run(
        &self,
        mut state: RunGraphState,
        models: &dyn ModelSource,
        saver: &dyn StepSaver,
    ) -> Result<RunGraphState, AgentError> {
        let mut next = post_start(&state);
        let mut steps = 0;
        while next != Next::Halt {
            steps += 1;
            if steps > self.max_steps {
                return Err(AgentError::StepLimitExceeded(self.max_steps));
            }
            debug!(run_id = %state.run.id, step = steps, node = ?next, "running step");
            next = match next {
                Next::Model => {
                    let model = models.model_for(&state)?;
                    let update = self.model_node.run(&state, model.as_ref()).await?;
                    state.apply(update);
                    saver.save(&mut state.messages).await?;
                    post_model(&state)
                }
                Next::Tool => {
                    let update = self.tool_node.run(&state).await?;
                    state.apply(update);
                    saver.save(&mut state.messages).await?;
                    post_tool(&state)
                }
                Next::Halt => Next::Halt,
            };
        }
        Ok(state)
    }
}
