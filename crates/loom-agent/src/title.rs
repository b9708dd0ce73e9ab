use std::sync::Arc;

use loom_llm::{ChatMessage, LlmError, ModelBuilder, ModelOptions, StructuredInput};
use loom_store::RunStore;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::errors::AgentError;

#[derive(Debug, Deserialize)]
struct TitleOutput {
    summary: String,
}

/// Generates short human-readable run names.
#[derive(Clone)]
pub struct TitleGenerator {
    models: Arc<dyn ModelBuilder>,
    model: String,
    words: usize,
}

impl TitleGenerator {
    pub fn new(models: Arc<dyn ModelBuilder>, model: impl Into<String>, words: usize) -> Self {
        Self {
            models,
            model: model.into(),
            words,
        }
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are a title generation assistant that is capable of succintly summarizing a set of messages in a single sentence. The title should be no more than {} words. Generate title for the following messages. Use identifying information such as names, dates, and locations if necessary. Good examples:\n- Ticket information for Bob\n- Refund request for Alice\n- List of capabilites for the assistant\nBad examples:\n- I am capable of generating titles for messages",
            self.words
        )
    }

    pub async fn generate_title(
        &self,
        cluster_id: &str,
        run_id: &str,
        content: &str,
    ) -> Result<String, LlmError> {
        let model = self.models.build_model(
            &self.model,
            ModelOptions::for_run(cluster_id, run_id).with_purpose("agent_loop.generate_title"),
        );
        let schema = json!({
            "type": "object",
            "properties": { "summary": { "type": "string" } },
            "required": ["summary"],
            "additionalProperties": false
        });
        let mut input = StructuredInput::new(vec![ChatMessage::user(content)], schema);
        input.system = Some(self.system_prompt());

        let output = model.structured(input).await?;
        serde_json::from_value::<TitleOutput>(output.structured)
            .map(|title| title.summary)
            .map_err(|err| {
                error!(error = %err, "model did not return valid title output");
                LlmError::Retryable("Invalid title output from model".to_string())
            })
    }

    /// Names the run from `content` unless it already has a name.
    pub async fn generate_run_name(
        &self,
        runs: &dyn RunStore,
        cluster_id: &str,
        run_id: &str,
        content: &str,
    ) -> Result<Option<String>, AgentError> {
        let run = runs.get_run(cluster_id, run_id).await?.ok_or_else(|| {
            loom_store::StoreError::NotFound {
                resource: "run",
                id: run_id.to_string(),
            }
        })?;
        if let Some(name) = run.name.filter(|name| !name.is_empty()) {
            info!(run_id, name = %name, "skipping run name generation, name already set");
            return Ok(None);
        }

        let title = self.generate_title(cluster_id, run_id, content).await?;
        runs.set_run_name(cluster_id, run_id, &title).await?;
        Ok(Some(title))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_llm::ScriptedModel;
    use loom_store::{MemoryStore, Run};

    #[tokio::test(flavor = "current_thread")]
    async fn generate_run_name_sets_name_once() {
        let store = MemoryStore::new();
        store.insert_run(Run::new("c", "r")).expect("run");
        let model = ScriptedModel::new("claude-3-haiku");
        model.push_structured(json!({"summary": "Refund request for Alice"}));
        let titles = TitleGenerator::new(Arc::new(model.clone()), "claude-3-haiku", 10);

        let first = titles
            .generate_run_name(&store, "c", "r", "Alice wants a refund")
            .await
            .expect("named");
        let second = titles
            .generate_run_name(&store, "c", "r", "Alice wants a refund")
            .await
            .expect("noop");

        assert_eq!(first.as_deref(), Some("Refund request for Alice"));
        assert_eq!(second, None);
        assert_eq!(model.structured_requests().len(), 1);
        let run = store.get_run("c", "r").await.expect("get").expect("run");
        assert_eq!(run.name.as_deref(), Some("Refund request for Alice"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn invalid_title_output_is_retryable() {
        let model = ScriptedModel::new("claude-3-haiku");
        model.push_structured(json!({"title": "wrong field"}));
        let titles = TitleGenerator::new(Arc::new(model), "claude-3-haiku", 10);

        let error = titles
            .generate_title("c", "r", "hello")
            .await
            .expect_err("invalid output");
        assert!(error.is_retryable());
    }
}
