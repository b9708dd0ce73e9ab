//! Selection of the tools presented to the model for one step.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use loom_llm::{CallInput, ContentBlock, ModelBuilder, ModelOptions};
use loom_store::{
    AgentMessageData, MessageData, RunMessage, ToolDefinition, ToolDefinitionStore,
};
use tracing::{info, warn};

use crate::errors::AgentError;
use crate::messages::{message_data_json, to_model_messages};
use crate::state::RunGraphState;
use crate::tools::{AgentTool, ServiceFunctionTools, StdlibTools};

const SEARCH_QUERY_SYSTEM_PROMPT: &str = "You are a helpful assistant. You are give a message history conducted by an agent X. Agent X has requested your help in generating a plain text search query to find relevant tools to call. The search query should be a at most 2 sentences.";

const STDLIB_PREFIX: &str = "inferable_";

/// Finds the tools relevant to the current state of a run.
#[async_trait]
pub trait RelevantToolLookup: Send + Sync {
    async fn find_relevant_tools(&self, state: &RunGraphState) -> Result<Vec<AgentTool>, AgentError>;
}

/// Ranks registered service functions against a free-text query.
#[async_trait]
pub trait ToolSimilaritySearch: Send + Sync {
    async fn find_similar(
        &self,
        cluster_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ToolDefinition>, AgentError>;
}

/// Unranked search returning every registered definition up to `limit`.
pub struct RegistrySimilaritySearch {
    definitions: Arc<dyn ToolDefinitionStore>,
}

impl RegistrySimilaritySearch {
    pub fn new(definitions: Arc<dyn ToolDefinitionStore>) -> Self {
        Self { definitions }
    }
}

#[async_trait]
impl ToolSimilaritySearch for RegistrySimilaritySearch {
    async fn find_similar(
        &self,
        cluster_id: &str,
        _query: &str,
        limit: usize,
    ) -> Result<Vec<ToolDefinition>, AgentError> {
        let mut names = self.definitions.available_tools(cluster_id).await?;
        names.sort();
        let mut found = Vec::new();
        for name in names.into_iter().take(limit) {
            if let Some(definition) = self.definitions.get_tool_definition(cluster_id, &name).await? {
                found.push(definition);
            }
        }
        Ok(found)
    }
}

pub struct ToolSearch {
    models: Arc<dyn ModelBuilder>,
    definitions: Arc<dyn ToolDefinitionStore>,
    similarity: Arc<dyn ToolSimilaritySearch>,
    stdlib: Arc<StdlibTools>,
    functions: ServiceFunctionTools,
    search_model: String,
    limit: usize,
}

impl ToolSearch {
    pub fn new(
        models: Arc<dyn ModelBuilder>,
        definitions: Arc<dyn ToolDefinitionStore>,
        similarity: Arc<dyn ToolSimilaritySearch>,
        stdlib: Arc<StdlibTools>,
        functions: ServiceFunctionTools,
    ) -> Self {
        Self {
            models,
            definitions,
            similarity,
            stdlib,
            functions,
            search_model: "claude-3-5-sonnet".to_string(),
            limit: 50,
        }
    }

    pub fn with_search_model(mut self, model: impl Into<String>) -> Self {
        self.search_model = model.into();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    async fn attached_tools(&self, state: &RunGraphState) -> Result<Vec<AgentTool>, AgentError> {
        let run = state.run.as_ref();
        let not_found = |tool: &str| AgentError::AttachedToolNotFound {
            tool: tool.to_string(),
            cluster_id: run.cluster_id.clone(),
        };

        let mut tools = Vec::with_capacity(run.attached_functions.len());
        for attached in &run.attached_functions {
            if attached.to_lowercase().starts_with(STDLIB_PREFIX) {
                let internal = attached.split('_').nth(1).unwrap_or_default();
                match self.stdlib.get(&run.cluster_id, internal).await? {
                    Some(tool) => tools.push(tool),
                    None => {
                        warn!(tool = %attached, "tool not found in stdlib");
                        return Err(not_found(attached));
                    }
                }
                continue;
            }

            let definition = self
                .definitions
                .get_tool_definition(&run.cluster_id, attached)
                .await?
                .ok_or_else(|| not_found(attached))?;
            tools.push(self.functions.build_tool(&definition));
        }
        Ok(tools)
    }

    async fn search_query(&self, state: &RunGraphState) -> Result<Option<String>, AgentError> {
        let run = state.run.as_ref();
        let history = state
            .messages
            .iter()
            .map(|message| message_data_json(message).to_string())
            .collect::<Vec<_>>();

        let system_prompt = run.system_prompt.as_deref().unwrap_or("(empty)");
        let prompt_messages = [
            RunMessage::human(
                run,
                format!("Here is the system prompt for Agent X:\n{system_prompt}"),
            ),
            agent_text(run, "Acknowledged. Give me the message history conducted by Agent X."),
            RunMessage::human(
                run,
                std::iter::once("Here is the message history conducted by Agent X:".to_string())
                    .chain(history)
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            agent_text(
                run,
                "Acknowledged. I have thought deeply, and you must search for tools that can:",
            ),
        ];

        let mut options = ModelOptions::for_run(&run.cluster_id, &run.id)
            .with_purpose("agent.tool-search-query");
        options.temperature = 0.2;
        let model = self.models.build_model(&self.search_model, options);
        let output = model
            .call(CallInput {
                system: Some(SEARCH_QUERY_SYSTEM_PROMPT.to_string()),
                messages: to_model_messages(&prompt_messages),
                tools: Vec::new(),
                max_tokens: Some(100),
            })
            .await?;

        Ok(match output.raw.content.first() {
            Some(ContentBlock::Text { text }) if !text.trim().is_empty() => Some(text.clone()),
            _ => None,
        })
    }
}

fn agent_text(run: &loom_store::Run, message: &str) -> RunMessage {
    RunMessage::new(
        run,
        MessageData::Agent(AgentMessageData {
            message: Some(message.to_string()),
            ..AgentMessageData::default()
        }),
    )
}

#[async_trait]
impl RelevantToolLookup for ToolSearch {
    async fn find_relevant_tools(&self, state: &RunGraphState) -> Result<Vec<AgentTool>, AgentError> {
        if !state.run.attached_functions.is_empty() {
            return self.attached_tools(state).await;
        }

        let started = Instant::now();
        let run = state.run.as_ref();
        let query = self.search_query(state).await?;
        let search = match &query {
            Some(query) => query.clone(),
            None => {
                warn!(run_id = %run.id, "failed to parse search query, using message history instead");
                state
                    .messages
                    .iter()
                    .map(|message| message_data_json(message).to_string())
                    .chain(std::iter::once(run.system_prompt.clone().unwrap_or_default()))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };

        let mut tools: Vec<AgentTool> = self
            .similarity
            .find_similar(&run.cluster_id, &search, self.limit)
            .await?
            .iter()
            .map(|definition| self.functions.build_tool(definition))
            .collect();
        tools.extend(self.stdlib.available(&run.cluster_id).await?);

        info!(
            run_id = %run.id,
            cluster_id = %run.cluster_id,
            query = query.as_deref().unwrap_or("(message history)"),
            tools = ?tools.iter().map(AgentTool::name).collect::<Vec<_>>(),
            duration_ms = started.elapsed().as_millis() as u64,
            "function registry search completed"
        );
        Ok(tools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ClusterSettingsCache;
    use loom_llm::ScriptedModel;
    use loom_store::{MemoryStore, Run};
    use std::time::Duration;

    fn search(store: &Arc<MemoryStore>, model: &ScriptedModel) -> ToolSearch {
        let stdlib = Arc::new(StdlibTools::new(Arc::new(ClusterSettingsCache::new(
            store.clone(),
            Duration::from_secs(120),
        ))));
        ToolSearch::new(
            Arc::new(model.clone()),
            store.clone(),
            Arc::new(RegistrySimilaritySearch::new(store.clone())),
            stdlib,
            ServiceFunctionTools::new(store.clone()),
        )
    }

    fn register(store: &MemoryStore, name: &str) {
        store
            .register_tool(
                "cluster-1",
                ToolDefinition {
                    name: name.to_string(),
                    description: Some(format!("{name} tool")),
                    schema: None,
                },
            )
            .expect("register");
    }

    fn state(run: Run) -> RunGraphState {
        let human = RunMessage::human(&run, "look up the order");
        RunGraphState::new(run, vec![human])
    }

    #[tokio::test(flavor = "current_thread")]
    async fn attached_functions_skip_search_and_map_stdlib_prefix() {
        let store = Arc::new(MemoryStore::new());
        register(&store, "lookup");
        let model = ScriptedModel::new("mock");
        let mut run = Run::new("cluster-1", "run-1");
        run.attached_functions = vec!["lookup".to_string(), "inferable_calculator".to_string()];

        let tools = search(&store, &model)
            .find_relevant_tools(&state(run))
            .await
            .expect("tools");

        let names: Vec<&str> = tools.iter().map(AgentTool::name).collect();
        assert_eq!(names, vec!["lookup", "calculator"]);
        assert!(model.call_requests().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unknown_attached_function_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let model = ScriptedModel::new("mock");
        let mut run = Run::new("cluster-1", "run-1");
        run.attached_functions = vec!["missing".to_string()];

        let error = search(&store, &model)
            .find_relevant_tools(&state(run))
            .await
            .expect_err("missing tool");
        assert!(matches!(error, AgentError::AttachedToolNotFound { tool, .. } if tool == "missing"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn discovery_asks_model_for_query_then_appends_stdlib() {
        let store = Arc::new(MemoryStore::new());
        register(&store, "lookup");
        let model = ScriptedModel::new("mock");
        model.push_text("find order lookup tools");

        let tools = search(&store, &model)
            .find_relevant_tools(&state(Run::new("cluster-1", "run-1")))
            .await
            .expect("tools");

        let names: Vec<&str> = tools.iter().map(AgentTool::name).collect();
        assert_eq!(names, vec!["lookup", "calculator", "currentDateTime"]);
        let requests = model.call_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].max_tokens, Some(100));
        assert_eq!(requests[0].messages.len(), 4);
    }
}
