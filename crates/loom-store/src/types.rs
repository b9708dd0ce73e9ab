use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub type ClusterId = String;
pub type RunId = String;
pub type MessageId = String;
pub type JobId = String;
pub type RunTags = BTreeMap<String, String>;

/// Time-ordered identifier used for messages, invocations and jobs.
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Paused,
    Done,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestMock {
    pub output: Value,
}

/// Run configuration. Read-only for the duration of one execution.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: RunId,
    pub cluster_id: ClusterId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model_identifier: Option<String>,
    #[serde(default)]
    pub result_schema: Option<Value>,
    #[serde(default)]
    pub attached_functions: Vec<String>,
    #[serde(default)]
    pub reasoning_traces: bool,
    #[serde(default)]
    pub test: bool,
    #[serde(default)]
    pub test_mocks: BTreeMap<String, TestMock>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub on_status_change: Option<String>,
    #[serde(default)]
    pub enable_summarization: bool,
    #[serde(default)]
    pub enable_result_grounding: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl Run {
    pub fn new(cluster_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cluster_id: cluster_id.into(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    pub id: String,
    pub tool_name: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultType {
    #[serde(rename = "resolution")]
    Resolution,
    #[serde(rename = "rejection")]
    Rejection,
    #[serde(rename = "interrupt")]
    Interrupt,
    /// Pause signal: the backing job is still pending or running.
    #[serde(rename = "jobTimeout", alias = "inferableJobTimeout")]
    JobTimeout,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolution => "resolution",
            Self::Rejection => "rejection",
            Self::Interrupt => "interrupt",
            Self::JobTimeout => "jobTimeout",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenericMessageData {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMessageData {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invocations: Vec<Invocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResultData {
    pub id: String,
    #[serde(default)]
    pub tool_name: String,
    pub result: Value,
    #[serde(default = "default_result_type")]
    pub result_type: ResultType,
}

fn default_result_type() -> ResultType {
    ResultType::Resolution
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum MessageData {
    Human(GenericMessageData),
    Template(GenericMessageData),
    Supervisor(GenericMessageData),
    Agent(AgentMessageData),
    AgentInvalid(GenericMessageData),
    InvocationResult(InvocationResultData),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Human,
    Template,
    Supervisor,
    Agent,
    AgentInvalid,
    InvocationResult,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Template => "template",
            Self::Supervisor => "supervisor",
            Self::Agent => "agent",
            Self::AgentInvalid => "agent-invalid",
            Self::InvocationResult => "invocation-result",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MessageData {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Human(_) => MessageKind::Human,
            Self::Template(_) => MessageKind::Template,
            Self::Supervisor(_) => MessageKind::Supervisor,
            Self::Agent(_) => MessageKind::Agent,
            Self::AgentInvalid(_) => MessageKind::AgentInvalid,
            Self::InvocationResult(_) => MessageKind::InvocationResult,
        }
    }
}

/// One entry of a Run's append-only message log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMessage {
    pub id: MessageId,
    pub cluster_id: ClusterId,
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub data: MessageData,
    /// Set once the message has been written to the message store.
    #[serde(skip)]
    pub persisted: bool,
}

impl RunMessage {
    pub fn new(run: &Run, data: MessageData) -> Self {
        Self {
            id: new_id(),
            cluster_id: run.cluster_id.clone(),
            run_id: run.id.clone(),
            created_at: Utc::now(),
            data,
            persisted: false,
        }
    }

    pub fn human(run: &Run, message: impl Into<String>) -> Self {
        Self::new(
            run,
            MessageData::Human(GenericMessageData {
                message: message.into(),
                details: None,
            }),
        )
    }

    pub fn supervisor(run: &Run, message: impl Into<String>, details: Option<Value>) -> Self {
        Self::new(
            run,
            MessageData::Supervisor(GenericMessageData {
                message: message.into(),
                details,
            }),
        )
    }

    pub fn agent_invalid(run: &Run, message: impl Into<String>, details: Option<Value>) -> Self {
        Self::new(
            run,
            MessageData::AgentInvalid(GenericMessageData {
                message: message.into(),
                details,
            }),
        )
    }

    pub fn kind(&self) -> MessageKind {
        self.data.kind()
    }

    pub fn as_agent(&self) -> Option<&AgentMessageData> {
        match &self.data {
            MessageData::Agent(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_invocation_result(&self) -> Option<&InvocationResultData> {
        match &self.data {
            MessageData::InvocationResult(data) => Some(data),
            _ => None,
        }
    }

    pub fn has_invocations(&self) -> bool {
        self.as_agent()
            .is_some_and(|agent| !agent.invocations.is_empty())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failure,
    Stalled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Stalled => "stalled",
        }
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

/// Asynchronous unit of work backing a remote tool invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub cluster_id: ClusterId,
    pub run_id: Option<RunId>,
    pub tool_call_id: Option<String>,
    pub target_fn: String,
    pub target_args: Value,
    pub status: JobStatus,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub result_type: Option<ResultType>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub cluster_id: ClusterId,
    pub run_id: Option<RunId>,
    /// Idempotency key: at most one job exists per (cluster, run, tool call id).
    pub tool_call_id: Option<String>,
    pub target_fn: String,
    pub target_args: Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedJob {
    pub id: JobId,
    pub created: bool,
}

/// A registered service function exposed to runs as a tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub schema: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSettings {
    #[serde(default)]
    pub enable_knowledgebase: bool,
    #[serde(default = "enabled")]
    pub enable_calculator: bool,
    #[serde(default)]
    pub enable_get_url: bool,
    #[serde(default)]
    pub context_text: Option<String>,
}

fn enabled() -> bool {
    true
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            enable_knowledgebase: false,
            enable_calculator: true,
            enable_get_url: false,
            context_text: None,
        }
    }
}
