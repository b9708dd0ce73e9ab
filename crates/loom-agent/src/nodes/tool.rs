use std::sync::Arc;

use futures::future::join_all;
use loom_store::{Invocation, InvocationResultData, MessageData, ResultType, Run, RunMessage, RunStatus};
use serde_json::{Value, json};
use tracing::{Instrument, info, info_span, warn};

use crate::errors::{AgentError, ToolError};
use crate::state::{RunGraphState, StateUpdate};
use crate::tools::{ResolverChain, ToolCall, ToolOutcome, parse_tool_response};

enum CallOutcome {
    Recorded(RunMessage),
    Paused { job_ids: Vec<String> },
}

/// Executes every unresolved invocation of the latest agent message
/// concurrently. Any paused call pauses the step; completed siblings still
/// record their results.
pub struct ToolNode {
    resolver: ResolverChain,
}

impl ToolNode {
    pub fn new(resolver: ResolverChain) -> Self {
        Self { resolver }
    }

    pub async fn run(&self, state: &RunGraphState) -> Result<StateUpdate, AgentError> {
        let pending = state.pending_invocations();
        if pending.is_empty() {
            return Err(AgentError::ExpectedToolCall);
        }

        let calls = pending
            .into_iter()
            .map(|invocation| self.call(state.run.clone(), invocation));
        let outcomes = join_all(calls).await;

        let mut update = StateUpdate {
            status: Some(RunStatus::Running),
            ..StateUpdate::default()
        };
        for outcome in outcomes {
            match outcome {
                CallOutcome::Recorded(message) => update.messages.push(message),
                CallOutcome::Paused { job_ids } => {
                    update.waiting_jobs.extend(job_ids);
                    update.status = Some(RunStatus::Paused);
                }
            }
        }
        Ok(update)
    }

    async fn call(&self, run: Arc<Run>, invocation: Invocation) -> CallOutcome {
        let span = info_span!(
            "tool_call",
            tool = %invocation.tool_name,
            invocation_id = %invocation.id
        );
        async move {
            let tool_name = invocation.tool_name.clone();
            let tool = match self.resolver.resolve_tool(&run, &tool_name).await {
                Ok(tool) => tool,
                Err(error) => {
                    warn!(error = %error, "failed to resolve tool");
                    return CallOutcome::Recorded(invocation_result(
                        &run,
                        &invocation,
                        json!({
                            "message": format!(
                                "Failed to find tool: {tool_name}. This might mean that the service that provides this tool is down. Human must be prompted to ask the devs whether the tool \"{tool_name}\" is connected."
                            ),
                            "error": error.to_string(),
                        }),
                        ResultType::Rejection,
                    ));
                }
            };

            let raw = tool
                .execute(ToolCall {
                    id: invocation.id.clone(),
                    input: invocation.input.clone(),
                    run: run.clone(),
                })
                .await;

            let outcome = match raw {
                Ok(raw) => parse_tool_response(&raw),
                Err(ToolError::InvalidInput { errors }) => {
                    info!(errors = ?errors, "tool input did not match schema");
                    return CallOutcome::Recorded(invocation_result(
                        &run,
                        &invocation,
                        json!({
                            "message": format!("Provided input did not match schema for {tool_name}, check your input"),
                            "parseResult": errors,
                        }),
                        ResultType::Rejection,
                    ));
                }
                Err(error) => Err(AgentError::Tool(error)),
            };

            match outcome {
                Ok(ToolOutcome::Completed {
                    result,
                    result_type,
                    status,
                }) => CallOutcome::Recorded(invocation_result(
                    &run,
                    &invocation,
                    json!({
                        invocation.id.clone(): {
                            "result": result,
                            "resultType": result_type,
                            "status": status,
                        }
                    }),
                    result_type,
                )),
                Ok(ToolOutcome::JobTimeout { job_ids }) => {
                    info!(job_ids = ?job_ids, "tool is waiting on jobs, pausing run");
                    CallOutcome::Paused { job_ids }
                }
                Ok(ToolOutcome::Interrupt) => {
                    info!("tool interrupted run");
                    CallOutcome::Paused {
                        job_ids: Vec::new(),
                    }
                }
                Err(error) => {
                    warn!(error = %error, "tool invocation failed");
                    CallOutcome::Recorded(invocation_result(
                        &run,
                        &invocation,
                        json!({
                            "message": format!("Failed to invoke {tool_name}"),
                            "error": error.to_string(),
                        }),
                        ResultType::Rejection,
                    ))
                }
            }
        }
        .instrument(span)
        .await
    }
}

fn invocation_result(
    run: &Run,
    invocation: &Invocation,
    result: Value,
    result_type: ResultType,
) -> RunMessage {
    RunMessage::new(
        run,
        MessageData::InvocationResult(InvocationResultData {
            id: invocation.id.clone(),
            tool_name: invocation.tool_name.clone(),
            result,
            result_type,
        }),
    )
}
