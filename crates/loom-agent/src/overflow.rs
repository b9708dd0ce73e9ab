//! Context window handling for the model-facing view of a run.

use async_trait::async_trait;
use loom_store::{MessageKind, RunMessage};
use tracing::info;

use crate::config::ContextWindowConfig;
use crate::errors::AgentError;
use crate::messages::to_model_message;

/// Token estimate for a piece of prompt text. Implementations may call out
/// to a tokenizer service or a count-tokens endpoint.
#[async_trait]
pub trait TokenEstimator: Send + Sync {
    async fn estimate(&self, text: &str) -> Result<u64, AgentError>;
}

/// Four characters per token, rounded up.
#[derive(Clone, Copy, Debug, Default)]
pub struct CharTokenEstimator;

impl CharTokenEstimator {
    pub fn count(text: &str) -> u64 {
        (text.chars().count() as u64).div_ceil(4)
    }
}

#[async_trait]
impl TokenEstimator for CharTokenEstimator {
    async fn estimate(&self, text: &str) -> Result<u64, AgentError> {
        Ok(Self::count(text))
    }
}

fn render_messages(messages: &[RunMessage]) -> String {
    messages
        .iter()
        .map(|message| serde_json::to_string(&to_model_message(message)).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n")
}

async fn estimate_messages(
    messages: &[RunMessage],
    estimator: &dyn TokenEstimator,
) -> Result<u64, AgentError> {
    estimator.estimate(&render_messages(messages)).await
}

fn is_leading_kind(message: &RunMessage) -> bool {
    matches!(message.kind(), MessageKind::Human | MessageKind::Template)
}

/// Trims `messages` from the front until they fit the window together with
/// the system prompt and start with a human or template message. The
/// persisted log is never touched; the returned slice is a suffix of
/// `messages`.
pub async fn handle_context_window_overflow<'a>(
    messages: &'a [RunMessage],
    system_prompt: &str,
    context_window: Option<u64>,
    config: &ContextWindowConfig,
    estimator: &dyn TokenEstimator,
) -> Result<&'a [RunMessage], AgentError> {
    let window = context_window.unwrap_or(config.default_window) as f64;
    let system_tokens = estimator.estimate(system_prompt).await?;
    let system_limit = window * config.system_prompt_threshold;
    if system_tokens as f64 > system_limit {
        return Err(AgentError::SystemPromptTooLarge {
            limit: system_limit.floor() as u64,
        });
    }
    if messages.is_empty() {
        return Err(AgentError::InvalidRunState);
    }

    let total_limit = window * config.total_threshold;
    let mut start = 0;
    while (estimate_messages(&messages[start..], estimator).await? + system_tokens) as f64
        > total_limit
    {
        if messages.len() - start == 1 {
            return Err(AgentError::InvalidRunState);
        }
        start += 1;
    }

    while !is_leading_kind(&messages[start]) {
        if messages.len() - start == 1 {
            return Err(AgentError::InvalidRunState);
        }
        start += 1;
    }

    if start > 0 {
        let removed = messages[..start]
            .iter()
            .map(|message| message.id.as_str())
            .collect::<Vec<_>>();
        info!(
            removed = removed.len(),
            removed_ids = ?removed,
            remaining = messages.len() - start,
            "truncated run history to fit context window"
        );
    }

    Ok(&messages[start..])
}
