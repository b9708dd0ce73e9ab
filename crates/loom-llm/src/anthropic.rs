//! Anthropic Messages API adapter.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::LlmError;
use crate::provider::ProviderAdapter;
use crate::routing::{Route, RoutingTable};
use crate::types::{CompletionRequest, ModelResponse};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const API_VERSION: &str = "2023-06-01";

pub const SONNET: &str = "claude-3-5-sonnet";
pub const HAIKU: &str = "claude-3-haiku";

#[derive(Clone)]
pub struct AnthropicAdapter {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for AnthropicAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicAdapter")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    /// Reads `ANTHROPIC_API_KEY` and optional `ANTHROPIC_BASE_URL`.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())?;
        let base_url = std::env::var("ANTHROPIC_BASE_URL").ok();
        Some(Self::new(api_key, base_url))
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<ModelResponse, LlmError> {
        let response = self
            .http
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(provider_error(self.name(), status.as_u16(), &body));
        }

        Ok(response.json::<ModelResponse>().await?)
    }
}

/// Maps an error response to `LlmError::Provider`, preferring the API's own
/// error message when the body is the documented error envelope.
pub fn provider_error(provider: &str, status: u16, body: &str) -> LlmError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string());
    LlmError::Provider {
        provider: provider.to_string(),
        status,
        message,
    }
}

/// Default chat routing served entirely by one Anthropic adapter.
pub fn default_routing(adapter: Arc<dyn ProviderAdapter>) -> RoutingTable {
    let mut table = RoutingTable::new();
    table.add_chat_route(
        SONNET,
        Route::new(adapter.clone(), "claude-3-5-sonnet-20241022"),
    );
    table.add_chat_route(HAIKU, Route::new(adapter, "claude-3-haiku-20240307"));
    table.set_context_window(SONNET, 200_000);
    table.set_context_window(HAIKU, 200_000);
    table
}
