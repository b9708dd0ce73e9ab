use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use loom_store::{ResultType, Run};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::errors::{AgentError, ToolError};
use crate::schema::validation_errors;

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send>>;
pub type ToolExecutor = Arc<dyn Fn(ToolCall) -> ToolFuture + Send + Sync>;

/// One execution request handed to a tool executor.
#[derive(Clone, Debug)]
pub struct ToolCall {
    /// Invocation id. Remote tools use it as the job idempotency key.
    pub id: String,
    pub input: Value,
    pub run: Arc<Run>,
}

/// Name, description and input schema of a tool as presented to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
        }
    }

    /// Builds a descriptor from a registered service function definition.
    pub fn from_definition(definition: &loom_store::ToolDefinition) -> Self {
        let description = definition
            .description
            .clone()
            .unwrap_or_else(|| format!("{} function", definition.name));
        Self {
            name: definition.name.clone(),
            description: description.chars().take(1024).collect(),
            schema: definition.schema.clone().unwrap_or_else(empty_object_schema),
        }
    }

    /// `<name> - <description> <schema>` line used in the system prompt.
    pub fn prompt_line(&self) -> String {
        format!("{} - {} {}", self.name, self.description, self.schema)
    }
}

pub fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// A callable tool, rebuilt per step. Input is validated against the
/// descriptor's schema before the executor runs.
#[derive(Clone)]
pub struct AgentTool {
    descriptor: ToolDescriptor,
    executor: ToolExecutor,
}

impl std::fmt::Debug for AgentTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTool")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl AgentTool {
    pub fn new(descriptor: ToolDescriptor, executor: ToolExecutor) -> Self {
        Self {
            descriptor,
            executor,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    pub async fn execute(&self, call: ToolCall) -> Result<String, ToolError> {
        let errors = validation_errors(&self.descriptor.schema, &call.input)
            .map_err(ToolError::InvalidSchema)?;
        if !errors.is_empty() {
            return Err(ToolError::InvalidInput { errors });
        }
        (self.executor)(call).await
    }
}

/// Wire format every tool executor returns, JSON encoded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub result: Value,
    pub result_type: ResultType,
    pub status: String,
}

impl ToolResponse {
    pub fn resolution(result: Value) -> Self {
        Self {
            result,
            result_type: ResultType::Resolution,
            status: "success".to_string(),
        }
    }

    pub fn rejection(result: Value, status: impl Into<String>) -> Self {
        Self {
            result,
            result_type: ResultType::Rejection,
            status: status.into(),
        }
    }

    pub fn job_timeout(job_ids: Vec<String>) -> Self {
        Self {
            result: json!(job_ids),
            result_type: ResultType::JobTimeout,
            status: "success".to_string(),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn encode(&self) -> Result<String, ToolError> {
        serde_json::to_string(self).map_err(|error| ToolError::Execution(error.to_string()))
    }
}

/// Interpreted tool response.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutcome {
    /// Resolution or rejection, recorded as an invocation result.
    Completed {
        result: Value,
        result_type: ResultType,
        status: String,
    },
    /// Backing jobs are still pending or running.
    JobTimeout { job_ids: Vec<String> },
    Interrupt,
}

/// Parses the JSON string a tool returned. A string `result` is decoded as
/// JSON when it parses; a `jobTimeout` result must be an array of job ids.
pub fn parse_tool_response(raw: &str) -> Result<ToolOutcome, AgentError> {
    let mut response: ToolResponse = serde_json::from_str(raw)
        .map_err(|error| AgentError::InvalidToolResponse(error.to_string()))?;

    if let Value::String(encoded) = &response.result {
        if let Ok(decoded) = serde_json::from_str::<Value>(encoded) {
            response.result = decoded;
        }
    }

    match response.result_type {
        ResultType::JobTimeout => {
            let job_ids = serde_json::from_value::<Vec<String>>(response.result).map_err(|_| {
                AgentError::InvalidToolResponse(
                    "jobTimeout result must be an array of job ids".to_string(),
                )
            })?;
            Ok(ToolOutcome::JobTimeout { job_ids })
        }
        ResultType::Interrupt => Ok(ToolOutcome::Interrupt),
        result_type => Ok(ToolOutcome::Completed {
            result: response.result,
            result_type,
            status: response.status,
        }),
    }
}
