use thiserror::Error;

/// Fatal run errors. The display text becomes the run's failure reason.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Maximum Run message length exceeded.")]
    MessageLimitExceeded,
    #[error("Detected cycle in Run.")]
    CycleDetected,
    #[error("Run exceeded the maximum of {0} steps.")]
    StepLimitExceeded(usize),
    #[error("Run state is invalid")]
    InvalidRunState,
    #[error("System prompt can not exceed {limit} tokens")]
    SystemPromptTooLarge { limit: u64 },
    #[error("Result schema is not valid JSON Schema: {0}")]
    InvalidResultSchema(String),
    #[error("Expected a tool call")]
    ExpectedToolCall,
    #[error("Tool {tool} not found in cluster {cluster_id}")]
    AttachedToolNotFound { tool: String, cluster_id: String },
    #[error("Failed to parse tool response: {0}")]
    InvalidToolResponse(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error(transparent)]
    Llm(#[from] loom_llm::LlmError),
    #[error(transparent)]
    Store(#[from] loom_store::StoreError),
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Errors raised while resolving or executing a single tool. These are turned
/// into invocation results and never fail the run on their own.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("input did not match schema: {}", .errors.join("; "))]
    InvalidInput { errors: Vec<String> },
    #[error("invalid tool schema: {0}")]
    InvalidSchema(String),
    #[error("tool execution failed: {0}")]
    Execution(String),
    #[error(transparent)]
    Store(#[from] loom_store::StoreError),
    #[error(transparent)]
    Llm(#[from] loom_llm::LlmError),
}
