pub mod functions;
pub mod mock;
pub mod resolver;
pub mod stdlib;
pub mod tool;

use std::sync::Arc;

use loom_store::ToolDefinitionStore;

pub use functions::{ServiceFunctionResolver, ServiceFunctionTools};
pub use mock::MockToolResolver;
pub use resolver::{ResolverChain, ToolResolver};
pub use stdlib::{ClusterSettingsCache, StdlibTools};
pub use tool::{
    AgentTool, ToolCall, ToolDescriptor, ToolExecutor, ToolFuture, ToolOutcome, ToolResponse,
    parse_tool_response,
};

/// Resolution order: test mocks, then stdlib tools, then registered service
/// functions.
pub fn default_resolver_chain(
    definitions: Arc<dyn ToolDefinitionStore>,
    stdlib: Arc<StdlibTools>,
    functions: ServiceFunctionTools,
) -> ResolverChain {
    ResolverChain::new()
        .with(Arc::new(MockToolResolver::new(definitions.clone())))
        .with(stdlib)
        .with(Arc::new(ServiceFunctionResolver::new(definitions, functions)))
}
