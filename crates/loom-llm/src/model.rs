//! Model router: routed, retried and rate-accounted calls to chat endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use crate::errors::LlmError;
use crate::rate_limit::ClusterRateLimiter;
use crate::retry::RetryPolicy;
use crate::routing::{Route, RoutingTable};
use crate::types::{
    CallInput, CallOutput, ChatMessage, CompletionRequest, ModelResponse, StructuredInput,
    StructuredOutput, ToolChoice, ToolSpec,
};

/// Name of the synthetic tool used to force structured output.
pub const EXTRACT_TOOL_NAME: &str = "extract";

const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Model abstraction consumed by the run engine.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn identifier(&self) -> &str;

    fn context_window(&self) -> Option<u64>;

    async fn call(&self, input: CallInput) -> Result<CallOutput, LlmError>;

    async fn structured(&self, input: StructuredInput) -> Result<StructuredOutput, LlmError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

/// Builds models per call site (run processing, summarization, titles).
pub trait ModelBuilder: Send + Sync {
    fn build_model(&self, identifier: &str, options: ModelOptions) -> Arc<dyn ChatModel>;
}

pub type RetryPredicate = Arc<dyn Fn(&LlmError) -> bool + Send + Sync>;

#[derive(Clone, Debug, PartialEq)]
pub struct ModelOptions {
    pub temperature: f32,
    pub cluster_id: Option<String>,
    pub run_id: Option<String>,
    pub purpose: Option<String>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            temperature: 0.5,
            cluster_id: None,
            run_id: None,
            purpose: None,
        }
    }
}

impl ModelOptions {
    pub fn for_run(cluster_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            cluster_id: Some(cluster_id.into()),
            run_id: Some(run_id.into()),
            ..Self::default()
        }
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }
}

/// Shared router state. Cheap to clone; every clone shares the routing table
/// and rate-limit counters.
#[derive(Clone)]
pub struct ModelRouter {
    routing: Arc<RoutingTable>,
    retry: RetryPolicy,
    rate_limiter: Arc<ClusterRateLimiter>,
    is_retryable: RetryPredicate,
}

impl ModelRouter {
    pub fn new(routing: RoutingTable) -> Self {
        Self {
            routing: Arc::new(routing),
            retry: RetryPolicy::default(),
            rate_limiter: Arc::new(ClusterRateLimiter::default()),
            is_retryable: Arc::new(LlmError::is_retryable),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limiter(mut self, rate_limiter: ClusterRateLimiter) -> Self {
        self.rate_limiter = Arc::new(rate_limiter);
        self
    }

    pub fn with_retry_predicate(mut self, is_retryable: RetryPredicate) -> Self {
        self.is_retryable = is_retryable;
        self
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn build(&self, identifier: impl Into<String>, options: ModelOptions) -> RoutedModel {
        RoutedModel {
            identifier: identifier.into(),
            router: self.clone(),
            options,
        }
    }
}

impl ModelBuilder for ModelRouter {
    fn build_model(&self, identifier: &str, options: ModelOptions) -> Arc<dyn ChatModel> {
        Arc::new(self.build(identifier, options))
    }
}

pub struct RoutedModel {
    identifier: String,
    router: ModelRouter,
    options: ModelOptions,
}

impl RoutedModel {
    fn account_tokens(&self, messages: &[ChatMessage], route: &Route) {
        let Some(cluster_id) = self.options.cluster_id.as_deref() else {
            return;
        };
        let bytes = serde_json::to_vec(messages)
            .map(|encoded| encoded.len())
            .unwrap_or_default();
        let tokens = u32::try_from(bytes).unwrap_or(u32::MAX);
        let decision = self.router.rate_limiter.check(cluster_id, tokens);
        if !decision.allowed() {
            tracing::warn!(
                model_id = %route.model_id,
                cluster_id,
                minute_allowed = decision.minute_allowed,
                hour_allowed = decision.hour_allowed,
                "rate limit exceeded (logged only, request not blocked)"
            );
        }
    }

    async fn complete_with_retry(
        &self,
        system: Option<String>,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolSpec>,
        tool_choice: Option<ToolChoice>,
        max_tokens: Option<u32>,
    ) -> Result<ModelResponse, LlmError> {
        if !self.router.routing.is_chat_identifier(&self.identifier) {
            return Err(LlmError::NotChatModel(self.identifier.clone()));
        }

        let max_attempts = self.router.retry.max_attempts.max(1);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let route = self
                .router
                .routing
                .route(&self.identifier, (attempt - 1) as usize)?;
            self.account_tokens(&messages, route);

            let request = CompletionRequest {
                model: route.model_id.clone(),
                system: system.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
                tool_choice: tool_choice.clone(),
                max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                temperature: self.options.temperature,
            };

            match route.provider.complete(request).await {
                Ok(response) => {
                    tracing::info!(
                        model_id = %route.model_id,
                        provider = route.provider.name(),
                        input_tokens = response.usage.input_tokens,
                        output_tokens = response.usage.output_tokens,
                        purpose = self.options.purpose.as_deref().unwrap_or_default(),
                        "model usage"
                    );
                    return Ok(response);
                }
                Err(error) if !(self.router.is_retryable)(&error) => {
                    tracing::error!(
                        model_id = %route.model_id,
                        attempt,
                        error = %error,
                        "model call failed with non-retryable error"
                    );
                    return Err(error);
                }
                Err(error) => {
                    tracing::warn!(
                        model_id = %route.model_id,
                        attempt,
                        error = %error,
                        "model call failed with retryable error"
                    );
                    if attempt >= max_attempts {
                        return Err(error);
                    }
                    tokio::time::sleep(self.router.retry.delay_for_attempt(attempt)).await;
                }
            }
        }
    }
}

#[async_trait]
impl ChatModel for RoutedModel {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn context_window(&self) -> Option<u64> {
        self.router.routing.context_window(&self.identifier)
    }

    async fn call(&self, input: CallInput) -> Result<CallOutput, LlmError> {
        let span = tracing::info_span!("model_call", identifier = %self.identifier);
        let raw = self
            .complete_with_retry(input.system, input.messages, input.tools, None, input.max_tokens)
            .instrument(span)
            .await?;
        Ok(CallOutput { raw })
    }

    async fn structured(&self, input: StructuredInput) -> Result<StructuredOutput, LlmError> {
        let mut tools = input.tools;
        tools.push(ToolSpec {
            name: EXTRACT_TOOL_NAME.to_string(),
            description: None,
            input_schema: input.schema,
        });
        let span = tracing::info_span!("model_structured", identifier = %self.identifier);
        let raw = self
            .complete_with_retry(
                input.system,
                input.messages,
                tools,
                Some(ToolChoice::Tool {
                    name: EXTRACT_TOOL_NAME.to_string(),
                }),
                input.max_tokens,
            )
            .instrument(span)
            .await?;
        parse_structured_response(raw)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        if !self.router.routing.is_embedding_identifier(&self.identifier) {
            return Err(LlmError::NotEmbeddingModel(self.identifier.clone()));
        }
        let route = self.router.routing.embedding_route(&self.identifier, 0)?;
        route.provider.embed(&route.model_id, text).await
    }
}

/// Pulls the `extract` tool input out of a forced-tool-choice response.
pub fn parse_structured_response(raw: ModelResponse) -> Result<StructuredOutput, LlmError> {
    let structured = raw
        .tool_uses()
        .find(|(_, name, _)| *name == EXTRACT_TOOL_NAME)
        .map(|(_, _, input)| input.clone())
        .ok_or(LlmError::MissingStructuredOutput)?;
    Ok(StructuredOutput { raw, structured })
}
