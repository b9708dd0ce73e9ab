use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::LlmError;
use crate::provider::ProviderAdapter;

/// A concrete endpoint serving a logical model identifier.
#[derive(Clone)]
pub struct Route {
    pub provider: Arc<dyn ProviderAdapter>,
    pub model_id: String,
}

impl Route {
    pub fn new(provider: Arc<dyn ProviderAdapter>, model_id: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("provider", &self.provider.name())
            .field("model_id", &self.model_id)
            .finish()
    }
}

/// Maps logical model identifiers to ordered endpoint lists. Built once and
/// shared read-only for the process lifetime.
#[derive(Clone, Debug, Default)]
pub struct RoutingTable {
    chat: BTreeMap<String, Vec<Route>>,
    embedding: BTreeMap<String, Vec<Route>>,
    context_windows: BTreeMap<String, u64>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a chat identifier with no routes yet. `validate` rejects it
    /// until a route is added.
    pub fn declare_chat(&mut self, identifier: impl Into<String>) {
        self.chat.entry(identifier.into()).or_default();
    }

    pub fn add_chat_route(&mut self, identifier: impl Into<String>, route: Route) {
        self.chat.entry(identifier.into()).or_default().push(route);
    }

    pub fn add_embedding_route(&mut self, identifier: impl Into<String>, route: Route) {
        self.embedding
            .entry(identifier.into())
            .or_default()
            .push(route);
    }

    pub fn set_context_window(&mut self, identifier: impl Into<String>, tokens: u64) {
        self.context_windows.insert(identifier.into(), tokens);
    }

    pub fn with_chat_route(mut self, identifier: impl Into<String>, route: Route) -> Self {
        self.add_chat_route(identifier, route);
        self
    }

    pub fn context_window(&self, identifier: &str) -> Option<u64> {
        self.context_windows.get(identifier).copied()
    }

    pub fn is_chat_identifier(&self, identifier: &str) -> bool {
        self.chat.contains_key(identifier)
    }

    pub fn is_embedding_identifier(&self, identifier: &str) -> bool {
        self.embedding.contains_key(identifier)
    }

    pub fn chat_identifiers(&self) -> impl Iterator<Item = &str> {
        self.chat.keys().map(String::as_str)
    }

    /// Route for a zero-based attempt index. Indices past the end wrap around.
    pub fn route(&self, identifier: &str, index: usize) -> Result<&Route, LlmError> {
        select(&self.chat, identifier, index)
    }

    pub fn embedding_route(&self, identifier: &str, index: usize) -> Result<&Route, LlmError> {
        select(&self.embedding, identifier, index)
    }

    /// Fails when any declared identifier has no endpoint.
    pub fn validate(&self) -> Result<(), LlmError> {
        for (identifier, routes) in self.chat.iter().chain(self.embedding.iter()) {
            if routes.is_empty() {
                return Err(LlmError::Configuration(format!(
                    "no provider available for {identifier}"
                )));
            }
        }
        Ok(())
    }
}

fn select<'a>(
    table: &'a BTreeMap<String, Vec<Route>>,
    identifier: &str,
    index: usize,
) -> Result<&'a Route, LlmError> {
    let routes = table
        .get(identifier)
        .filter(|routes| !routes.is_empty())
        .ok_or_else(|| LlmError::NoRoute(identifier.to_string()))?;

    let mut index = index;
    if index >= routes.len() {
        tracing::warn!(identifier, index, "routing index out of bounds");
        index %= routes.len();
    }
    routes
        .get(index)
        .ok_or_else(|| LlmError::NoRoute(identifier.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompletionRequest, ModelResponse};
    use async_trait::async_trait;

    struct NamedAdapter(&'static str);

    #[async_trait]
    impl ProviderAdapter for NamedAdapter {
        fn name(&self) -> &str {
            self.0
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<ModelResponse, LlmError> {
            Ok(ModelResponse::default())
        }
    }

    fn table() -> RoutingTable {
        RoutingTable::new()
            .with_chat_route("claude", Route::new(Arc::new(NamedAdapter("us-west")), "m-1"))
            .with_chat_route("claude", Route::new(Arc::new(NamedAdapter("us-east")), "m-2"))
    }

    #[test]
    fn route_index_past_end_wraps_modulo_route_count() {
        let table = table();
        assert_eq!(table.route("claude", 0).expect("route").model_id, "m-1");
        assert_eq!(table.route("claude", 1).expect("route").model_id, "m-2");
        assert_eq!(table.route("claude", 4).expect("route").model_id, "m-1");
        assert_eq!(table.route("claude", 5).expect("route").model_id, "m-2");
    }

    #[test]
    fn route_unknown_identifier_expected_no_route_error() {
        let error = table().route("gpt", 0).expect_err("unknown identifier");
        assert!(matches!(error, LlmError::NoRoute(identifier) if identifier == "gpt"));
    }

    #[test]
    fn validate_declared_identifier_without_routes_fails() {
        let mut table = table();
        assert!(table.validate().is_ok());

        table.declare_chat("claude-3-haiku");
        let error = table.validate().expect_err("empty route list");
        assert!(error.to_string().contains("claude-3-haiku"));
    }
}
