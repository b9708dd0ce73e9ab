//! Shrinks oversized job results with a secondary model before they enter the
//! message log.

use std::sync::Arc;

use loom_llm::{CallInput, ChatMessage, ContentBlock, LlmError, ModelBuilder, ModelOptions};
use serde_json::{Value, json};
use tracing::{error, info};

use crate::overflow::CharTokenEstimator;

#[derive(Clone)]
pub struct ResultSummarizer {
    models: Arc<dyn ModelBuilder>,
    model: String,
    threshold_chars: usize,
}

/// Where a summarized result came from, for model tracking and logs.
#[derive(Clone, Copy, Debug)]
pub struct SummaryTarget<'a> {
    pub cluster_id: &'a str,
    pub run_id: &'a str,
    pub target_fn: &'a str,
    pub purpose: Option<&'a str>,
}

impl ResultSummarizer {
    pub fn new(models: Arc<dyn ModelBuilder>, model: impl Into<String>, threshold_chars: usize) -> Self {
        Self {
            models,
            model: model.into(),
            threshold_chars,
        }
    }

    pub fn needs_summarizing(&self, result: &Value) -> bool {
        match result {
            Value::Null => false,
            Value::String(text) => text.chars().count() > self.threshold_chars,
            other => other.to_string().chars().count() > self.threshold_chars,
        }
    }

    /// Returns `result` unchanged when it is small enough, otherwise
    /// `{summary, originalResultSize, summarySize}`.
    pub async fn summarize_if_necessary(
        &self,
        result: Value,
        target: SummaryTarget<'_>,
    ) -> Result<Value, LlmError> {
        if !self.needs_summarizing(&result) {
            return Ok(result);
        }
        info!(
            cluster_id = target.cluster_id,
            run_id = target.run_id,
            target_fn = target.target_fn,
            "summarizing result because it is too large"
        );

        let model = self.models.build_model(
            &self.model,
            ModelOptions::for_run(target.cluster_id, target.run_id)
                .with_purpose("agent_loop.summarize_result"),
        );
        let encoded = result.to_string();
        let purpose = target
            .purpose
            .map(|purpose| format!(" for the purpose of {purpose}."))
            .unwrap_or_else(|| ".".to_string());
        let prompt = format!(
            "This following is a json result from a job.\n\nSummarize the result in a way that it preserves the most important information{purpose}\n\n<JOB_RESULT>\n{encoded}\n</JOB_RESULT>"
        );

        let output = model
            .call(CallInput {
                messages: vec![ChatMessage::user(prompt)],
                ..CallInput::default()
            })
            .await
            .inspect_err(|err| error!(error = %err, "error summarizing result"))?;

        let summary = match output.raw.content.as_slice() {
            [ContentBlock::Text { text }] => text.clone(),
            _ => {
                return Err(LlmError::InvalidResponse(
                    "Unexpected content blocks in response".to_string(),
                ));
            }
        };

        Ok(json!({
            "summary": summary,
            "originalResultSize": CharTokenEstimator::count(&encoded),
            "summarySize": CharTokenEstimator::count(&summary),
        }))
    }
}
