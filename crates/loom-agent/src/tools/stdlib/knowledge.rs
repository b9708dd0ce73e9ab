use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::tools::tool::{AgentTool, ToolCall, ToolDescriptor, ToolResponse};

pub const ACCESS_KNOWLEDGE_ARTIFACTS_TOOL_NAME: &str = "accessKnowledgeArtifacts";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeArtifact {
    pub id: String,
    pub title: String,
    pub data: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub similarity: f64,
}

/// Knowledge base lookup for a cluster.
#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    async fn tags(&self, cluster_id: &str) -> Result<Vec<String>, String>;

    async fn search(
        &self,
        cluster_id: &str,
        query: &str,
        tag: Option<&str>,
    ) -> Result<Vec<KnowledgeArtifact>, String>;
}

/// Builds the tool for one cluster. The `tag` enum is limited to the
/// cluster's known tags and omitted when there are none.
pub async fn access_knowledge_artifacts_tool(
    search: Arc<dyn KnowledgeSearch>,
    cluster_id: &str,
) -> AgentTool {
    let tags = search.tags(cluster_id).await.unwrap_or_else(|message| {
        error!(cluster_id, error = %message, "failed to load knowledge tags");
        Vec::new()
    });
    let mut properties = json!({
        "query": {
            "type": "string",
            "description": "The query to search for knowledge artifacts"
        }
    });
    if !tags.is_empty() {
        properties["tag"] = json!({
            "type": "string",
            "enum": tags,
            "description": "The tag to filter the knowledge artifacts by. If not provided, all artifacts are returned."
        });
    }

    AgentTool::new(
        ToolDescriptor::new(
            ACCESS_KNOWLEDGE_ARTIFACTS_TOOL_NAME,
            "Retrieves relevant knowledge artifacts based on a given query.",
            json!({
                "type": "object",
                "properties": properties,
                "required": ["query"]
            }),
        ),
        Arc::new(move |call: ToolCall| {
            let search = search.clone();
            Box::pin(async move {
                let query = call
                    .input
                    .get("query")
                    .and_then(|value| value.as_str())
                    .unwrap_or_default();
                let tag = call.input.get("tag").and_then(|value| value.as_str());
                info!(cluster_id = %call.run.cluster_id, query, tag, "accessing knowledge artifacts");

                match search.search(&call.run.cluster_id, query, tag).await {
                    Ok(artifacts) => ToolResponse::resolution(json!(artifacts)).encode(),
                    Err(message) => {
                        error!(error = %message, "error accessing knowledge artifacts");
                        ToolResponse::rejection(json!("Internal error, please try again."), "error")
                            .encode()
                    }
                }
            })
        }),
    )
}
