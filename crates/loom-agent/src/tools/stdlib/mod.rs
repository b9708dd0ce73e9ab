//! Tools provided by the control plane itself rather than by a registered
//! service.

pub mod calculator;
pub mod date_time;
pub mod get_url;
pub mod knowledge;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loom_store::{ClusterSettings, Run, StoreResult, ToolDefinitionStore};

use crate::cache::TtlCache;
use crate::errors::ToolError;
use crate::tools::resolver::ToolResolver;
use crate::tools::tool::AgentTool;

pub use calculator::{CALCULATOR_TOOL_NAME, calculator_tool, evaluate};
pub use date_time::{CURRENT_DATE_TIME_TOOL_NAME, current_date_time_tool};
pub use get_url::{FetchedPage, GET_URL_TOOL_NAME, HttpFetcher, UrlFetcher, get_url_tool};
pub use knowledge::{
    ACCESS_KNOWLEDGE_ARTIFACTS_TOOL_NAME, KnowledgeArtifact, KnowledgeSearch,
    access_knowledge_artifacts_tool,
};

/// Cluster settings read through a TTL cache.
pub struct ClusterSettingsCache {
    definitions: Arc<dyn ToolDefinitionStore>,
    cache: TtlCache<String, ClusterSettings>,
}

impl ClusterSettingsCache {
    pub fn new(definitions: Arc<dyn ToolDefinitionStore>, ttl: Duration) -> Self {
        Self {
            definitions,
            cache: TtlCache::new(ttl),
        }
    }

    pub async fn get(&self, cluster_id: &str) -> StoreResult<ClusterSettings> {
        let key = format!("cluster:{cluster_id}");
        if let Some(settings) = self.cache.get(&key) {
            return Ok(settings);
        }
        let settings = self.definitions.get_cluster_settings(cluster_id).await?;
        self.cache.insert(key, settings.clone());
        Ok(settings)
    }
}

/// Builds the stdlib tools a cluster has enabled.
pub struct StdlibTools {
    settings: Arc<ClusterSettingsCache>,
    fetcher: Option<Arc<dyn UrlFetcher>>,
    knowledge: Option<Arc<dyn KnowledgeSearch>>,
}

impl StdlibTools {
    pub fn new(settings: Arc<ClusterSettingsCache>) -> Self {
        Self {
            settings,
            fetcher: None,
            knowledge: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn UrlFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeSearch>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn is_stdlib_name(name: &str) -> bool {
        matches!(
            name,
            CALCULATOR_TOOL_NAME
                | CURRENT_DATE_TIME_TOOL_NAME
                | GET_URL_TOOL_NAME
                | ACCESS_KNOWLEDGE_ARTIFACTS_TOOL_NAME
        )
    }

    /// The named tool when it is enabled for the cluster.
    pub async fn get(&self, cluster_id: &str, name: &str) -> Result<Option<AgentTool>, ToolError> {
        if !Self::is_stdlib_name(name) {
            return Ok(None);
        }
        let settings = self.settings.get(cluster_id).await?;
        let tool = match name {
            CALCULATOR_TOOL_NAME if settings.enable_calculator => Some(calculator_tool()),
            CURRENT_DATE_TIME_TOOL_NAME => Some(current_date_time_tool()),
            GET_URL_TOOL_NAME if settings.enable_get_url => {
                self.fetcher.clone().map(get_url_tool)
            }
            ACCESS_KNOWLEDGE_ARTIFACTS_TOOL_NAME if settings.enable_knowledgebase => {
                match &self.knowledge {
                    Some(search) => {
                        Some(access_knowledge_artifacts_tool(search.clone(), cluster_id).await)
                    }
                    None => None,
                }
            }
            _ => None,
        };
        Ok(tool)
    }

    /// Every tool enabled for the cluster, in a stable order.
    pub async fn available(&self, cluster_id: &str) -> Result<Vec<AgentTool>, ToolError> {
        let mut tools = Vec::new();
        for name in [
            ACCESS_KNOWLEDGE_ARTIFACTS_TOOL_NAME,
            CALCULATOR_TOOL_NAME,
            CURRENT_DATE_TIME_TOOL_NAME,
            GET_URL_TOOL_NAME,
        ] {
            if let Some(tool) = self.get(cluster_id, name).await? {
                tools.push(tool);
            }
        }
        Ok(tools)
    }
}

#[async_trait]
impl ToolResolver for StdlibTools {
    async fn resolve(&self, run: &Run, tool_name: &str) -> Result<Option<AgentTool>, ToolError> {
        self.get(&run.cluster_id, tool_name).await
    }
}
