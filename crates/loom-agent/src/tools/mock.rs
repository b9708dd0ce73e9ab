use std::sync::Arc;

use async_trait::async_trait;
use loom_store::{Run, ToolDefinition, ToolDefinitionStore};
use tracing::info;

use crate::errors::ToolError;
use crate::tools::resolver::ToolResolver;
use crate::tools::tool::{AgentTool, ToolCall, ToolDescriptor, ToolResponse};

/// Serves a run's configured test mocks. Only consulted for runs flagged
/// `test`; the schema comes from the registered definition when one exists.
pub struct MockToolResolver {
    definitions: Arc<dyn ToolDefinitionStore>,
}

impl MockToolResolver {
    pub fn new(definitions: Arc<dyn ToolDefinitionStore>) -> Self {
        Self { definitions }
    }
}

#[async_trait]
impl ToolResolver for MockToolResolver {
    async fn resolve(&self, run: &Run, tool_name: &str) -> Result<Option<AgentTool>, ToolError> {
        if !run.test {
            return Ok(None);
        }
        let Some(mock) = run.test_mocks.get(tool_name) else {
            return Ok(None);
        };

        let definition = self
            .definitions
            .get_tool_definition(&run.cluster_id, tool_name)
            .await?
            .unwrap_or_else(|| ToolDefinition {
                name: tool_name.to_string(),
                description: None,
                schema: None,
            });

        let output = mock.output.clone();
        let name = tool_name.to_string();
        Ok(Some(AgentTool::new(
            ToolDescriptor::from_definition(&definition),
            Arc::new(move |call: ToolCall| {
                let output = output.clone();
                let name = name.clone();
                Box::pin(async move {
                    info!(tool = %name, invocation_id = %call.id, "mock tool call");
                    ToolResponse::resolution(output).encode()
                })
            }),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_store::{MemoryStore, TestMock};
    use serde_json::json;

    fn test_run() -> Run {
        let mut run = Run::new("cluster-1", "run-1");
        run.test = true;
        run.test_mocks.insert(
            "lookup".to_string(),
            TestMock {
                output: json!({"id": 7}),
            },
        );
        run
    }

    #[tokio::test(flavor = "current_thread")]
    async fn mock_resolver_returns_configured_output() {
        let resolver = MockToolResolver::new(Arc::new(MemoryStore::new()));
        let run = test_run();

        let tool = resolver
            .resolve(&run, "lookup")
            .await
            .expect("resolve")
            .expect("mocked");
        let raw = tool
            .execute(ToolCall {
                id: "inv-1".to_string(),
                input: json!({}),
                run: Arc::new(run),
            })
            .await
            .expect("execute");
        let response: ToolResponse = serde_json::from_str(&raw).expect("decode");
        assert_eq!(response.result, json!({"id": 7}));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn mock_resolver_ignores_non_test_runs() {
        let resolver = MockToolResolver::new(Arc::new(MemoryStore::new()));
        let mut run = test_run();
        run.test = false;

        assert!(resolver.resolve(&run, "lookup").await.expect("resolve").is_none());
    }
}
