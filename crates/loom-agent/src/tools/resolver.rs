use std::sync::Arc;

use async_trait::async_trait;
use loom_store::Run;

use crate::errors::ToolError;
use crate::tools::tool::AgentTool;

/// One source of tools. `Ok(None)` means the name is not handled here and the
/// next resolver in the chain is asked.
#[async_trait]
pub trait ToolResolver: Send + Sync {
    async fn resolve(&self, run: &Run, tool_name: &str) -> Result<Option<AgentTool>, ToolError>;
}

/// Ordered resolvers; the first match wins.
#[derive(Clone, Default)]
pub struct ResolverChain {
    resolvers: Vec<Arc<dyn ToolResolver>>,
}

impl ResolverChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resolver: Arc<dyn ToolResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    pub async fn resolve_tool(&self, run: &Run, tool_name: &str) -> Result<AgentTool, ToolError> {
        for resolver in &self.resolvers {
            if let Some(tool) = resolver.resolve(run, tool_name).await? {
                return Ok(tool);
            }
        }
        Err(ToolError::NotFound(tool_name.to_string()))
    }
}
