use std::sync::Arc;

use loom_llm::{ChatModel, EXTRACT_TOOL_NAME, StructuredInput};
use loom_store::{AgentMessageData, Invocation, MessageData, MessageKind, RunMessage, RunStatus, new_id};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{Instrument, debug, info_span, warn};

use crate::config::RunnerConfig;
use crate::errors::AgentError;
use crate::messages::to_model_messages;
use crate::overflow::{TokenEstimator, handle_context_window_overflow};
use crate::prompt::{
    ModelSchemaInput, SystemPromptInput, build_model_schema, consolidated_prompt, system_prompt,
};
use crate::schema::{check_schema, validation_errors};
use crate::search::RelevantToolLookup;
use crate::state::{RunGraphState, StateUpdate};
use crate::tools::ToolDescriptor;

const INVALID_OUTPUT_CORRECTION: &str = "You provided an invalid output. Refer to the final_result_schema for the expected format. The validation errors are mentioned below.";
const MISSING_INVOCATION_CORRECTION: &str =
    "If you are not done, please provide an invocation, otherwise return done.";
const MISSING_RESULT_CORRECTION: &str = "Please provide a final result or a reason for stopping.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelInvocation {
    tool_name: String,
    #[serde(default)]
    input: Value,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelOutput {
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    issue: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    invocations: Vec<ModelInvocation>,
}

/// Rejects histories that are too long or stuck between agent and supervisor
/// messages with no new human input or tool results.
pub fn detect_cycle(messages: &[RunMessage], config: &RunnerConfig) -> Result<(), AgentError> {
    if messages.len() >= config.max_run_messages {
        return Err(AgentError::MessageLimitExceeded);
    }
    if config.cycle_window == 0 || messages.len() < config.cycle_window {
        return Ok(());
    }
    let recent = &messages[messages.len() - config.cycle_window..];
    let progressing = recent.iter().any(|message| {
        matches!(
            message.kind(),
            MessageKind::InvocationResult | MessageKind::Human
        )
    });
    if progressing {
        Ok(())
    } else {
        Err(AgentError::CycleDetected)
    }
}

/// Replaces a JSON-encoded string `result` with its decoded value.
fn rescue_stringified_result(data: &mut Value) {
    let Some(Value::String(encoded)) = data.get("result") else {
        return;
    };
    if let Ok(decoded) = serde_json::from_str::<Value>(encoded) {
        data["result"] = decoded;
    }
}

/// Asks the model for the next step and turns its structured answer into
/// exactly one agent message, or an agent-invalid and supervisor pair.
pub struct ModelNode {
    tools: Arc<dyn RelevantToolLookup>,
    estimator: Arc<dyn TokenEstimator>,
    config: RunnerConfig,
}

impl ModelNode {
    pub fn new(
        tools: Arc<dyn RelevantToolLookup>,
        estimator: Arc<dyn TokenEstimator>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            tools,
            estimator,
            config,
        }
    }

    pub async fn run(
        &self,
        state: &RunGraphState,
        model: &dyn ChatModel,
    ) -> Result<StateUpdate, AgentError> {
        detect_cycle(&state.messages, &self.config)?;
        let run = state.run.as_ref();

        let relevant = self.tools.find_relevant_tools(state).await?;
        let descriptors: Vec<ToolDescriptor> =
            relevant.iter().map(|tool| tool.descriptor().clone()).collect();

        if let Some(result_schema) = &run.result_schema {
            check_schema(result_schema).map_err(AgentError::InvalidResultSchema)?;
        }

        let schema = build_model_schema(&ModelSchemaInput {
            result_schema: run.result_schema.as_ref(),
            relevant_tools: &descriptors,
            all_available_tools: &state.all_available_tools,
            reasoning_traces: run.reasoning_traces,
        });
        let directives = system_prompt(&SystemPromptInput {
            has_result_schema: run.result_schema.is_some(),
            enable_result_grounding: run.enable_result_grounding,
            additional_context: state.additional_context.as_deref(),
            relevant_tools: &descriptors,
            all_available_tools: &state.all_available_tools,
        });
        let system = consolidated_prompt(&directives, &schema);

        let visible = handle_context_window_overflow(
            &state.messages,
            &system,
            model.context_window(),
            &self.config.context,
            self.estimator.as_ref(),
        )
        .await?;

        let output = model
            .structured(StructuredInput {
                system: Some(system),
                messages: to_model_messages(visible),
                tools: Vec::new(),
                max_tokens: None,
                schema: schema.clone(),
            })
            .instrument(info_span!("model_call", model = model.identifier()))
            .await?;

        let extracted: Vec<Value> = output
            .raw
            .tool_uses()
            .filter(|(_, name, _)| *name != EXTRACT_TOOL_NAME)
            .map(|(_, name, input)| {
                let mut invocation = json!({"toolName": name, "input": input});
                if run.reasoning_traces {
                    invocation["reasoning"] = json!("Extracted from tool calls");
                }
                invocation
            })
            .collect();

        let mut data = output.structured;
        rescue_stringified_result(&mut data);

        let mut errors =
            validation_errors(&schema, &data).map_err(AgentError::InvalidResultSchema)?;
        let parsed = if errors.is_empty() {
            match serde_json::from_value::<ModelOutput>(data.clone()) {
                Ok(parsed) => Some(parsed),
                Err(error) => {
                    errors.push(error.to_string());
                    None
                }
            }
        } else {
            None
        };
        let Some(mut parsed) = parsed else {
            warn!(run_id = %run.id, errors = ?errors, "model produced invalid output");
            let raw = serde_json::to_value(&output.raw).unwrap_or(Value::Null);
            return Ok(self.correction(
                state,
                RunMessage::agent_invalid(run, "Produced model output", Some(raw)),
                INVALID_OUTPUT_CORRECTION,
                Some(json!({"errors": errors})),
            ));
        };

        for extra in extracted {
            if let Ok(invocation) = serde_json::from_value::<ModelInvocation>(extra) {
                parsed.invocations.push(invocation);
            }
        }

        let mut done = parsed.done.unwrap_or(false);
        let mut result = parsed.result;
        let mut message = match parsed.message {
            Some(Value::String(text)) => Some(text),
            _ => None,
        };

        if done && !parsed.invocations.is_empty() {
            debug!(run_id = %run.id, "model returned done with invocations, continuing");
            done = false;
            result = None;
            message = None;
        }

        if !done && parsed.invocations.is_empty() {
            return Ok(self.correction(
                state,
                RunMessage::agent_invalid(run, "Invalid model response.", Some(data)),
                MISSING_INVOCATION_CORRECTION,
                None,
            ));
        }

        if done && result.is_none() && message.is_none() {
            return Ok(self.correction(
                state,
                RunMessage::agent_invalid(run, "Produced model output", Some(data)),
                MISSING_RESULT_CORRECTION,
                None,
            ));
        }

        let invocations = parsed
            .invocations
            .into_iter()
            .map(|invocation| Invocation {
                id: new_id(),
                tool_name: invocation.tool_name,
                input: invocation.input,
                reasoning: invocation.reasoning,
            })
            .collect();

        let agent = RunMessage::new(
            run,
            MessageData::Agent(AgentMessageData {
                invocations,
                result: result.clone(),
                message,
                issue: parsed.issue,
                done: Some(done),
            }),
        );

        Ok(StateUpdate {
            messages: vec![agent],
            waiting_jobs: Vec::new(),
            status: Some(if done {
                RunStatus::Done
            } else {
                RunStatus::Running
            }),
            result,
        })
    }

    fn correction(
        &self,
        state: &RunGraphState,
        invalid: RunMessage,
        correction: &str,
        details: Option<Value>,
    ) -> StateUpdate {
        StateUpdate {
            messages: vec![
                invalid,
                RunMessage::supervisor(state.run.as_ref(), correction, details),
            ],
            waiting_jobs: Vec::new(),
            status: Some(RunStatus::Running),
            result: None,
        }
    }
}
