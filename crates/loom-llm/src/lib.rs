pub mod anthropic;
pub mod errors;
pub mod mock;
pub mod model;
pub mod provider;
pub mod rate_limit;
pub mod retry;
pub mod routing;
pub mod types;

pub use anthropic::{AnthropicAdapter, default_routing};
pub use errors::LlmError;
pub use mock::ScriptedModel;
pub use model::{
    ChatModel, EXTRACT_TOOL_NAME, ModelBuilder, ModelOptions, ModelRouter, RetryPredicate,
    RoutedModel, parse_structured_response,
};
pub use provider::ProviderAdapter;
pub use rate_limit::{ClusterRateLimiter, RateLimitConfig, RateLimitDecision};
pub use retry::RetryPolicy;
pub use routing::{Route, RoutingTable};
pub use types::{
    CallInput, CallOutput, ChatMessage, CompletionRequest, ContentBlock, ModelResponse, Role,
    StructuredInput, StructuredOutput, ToolChoice, ToolSpec, Usage,
};
