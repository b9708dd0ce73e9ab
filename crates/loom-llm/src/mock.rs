use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::LlmError;
use crate::model::{ChatModel, ModelBuilder, ModelOptions};
use crate::types::{CallInput, CallOutput, ModelResponse, StructuredInput, StructuredOutput};

enum Scripted {
    Structured(Value),
    Text(String),
    Error(LlmError),
}

#[derive(Default)]
struct ScriptState {
    responses: VecDeque<Scripted>,
    structured_requests: Vec<StructuredInput>,
    call_requests: Vec<CallInput>,
}

/// Model that replays a fixed script of responses and records what it was
/// asked. Used for dry runs and tests.
#[derive(Clone)]
pub struct ScriptedModel {
    identifier: String,
    context_window: Option<u64>,
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedModel {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            context_window: None,
            state: Arc::new(Mutex::new(ScriptState::default())),
        }
    }

    /// Script of structured payloads encoded as JSON strings.
    pub fn from_json_responses(responses: &[String]) -> Result<Self, LlmError> {
        let model = Self::new("mock");
        for response in responses {
            model.push_structured(serde_json::from_str(response)?);
        }
        Ok(model)
    }

    pub fn with_context_window(mut self, tokens: u64) -> Self {
        self.context_window = Some(tokens);
        self
    }

    pub fn push_structured(&self, structured: Value) -> &Self {
        self.push(Scripted::Structured(structured))
    }

    pub fn push_text(&self, text: impl Into<String>) -> &Self {
        self.push(Scripted::Text(text.into()))
    }

    pub fn push_error(&self, error: LlmError) -> &Self {
        self.push(Scripted::Error(error))
    }

    pub fn structured_requests(&self) -> Vec<StructuredInput> {
        self.lock()
            .map(|state| state.structured_requests.clone())
            .unwrap_or_default()
    }

    pub fn call_requests(&self) -> Vec<CallInput> {
        self.lock()
            .map(|state| state.call_requests.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.lock()
            .map(|state| state.responses.len())
            .unwrap_or_default()
    }

    fn push(&self, scripted: Scripted) -> &Self {
        if let Ok(mut state) = self.lock() {
            state.responses.push_back(scripted);
        }
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ScriptState>, LlmError> {
        self.state
            .lock()
            .map_err(|_| LlmError::Configuration("scripted model mutex poisoned".to_string()))
    }

    fn next(&self) -> Result<Scripted, LlmError> {
        self.lock()?
            .responses
            .pop_front()
            .ok_or_else(|| LlmError::Configuration("mock model ran out of responses".to_string()))
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn context_window(&self) -> Option<u64> {
        self.context_window
    }

    async fn call(&self, input: CallInput) -> Result<CallOutput, LlmError> {
        self.lock()?.call_requests.push(input);
        match self.next()? {
            Scripted::Text(text) => Ok(CallOutput {
                raw: ModelResponse {
                    content: vec![crate::types::ContentBlock::text(text)],
                    ..ModelResponse::default()
                },
            }),
            Scripted::Error(error) => Err(error),
            Scripted::Structured(_) => Err(LlmError::Configuration(
                "next scripted response is structured, expected text".to_string(),
            )),
        }
    }

    async fn structured(&self, input: StructuredInput) -> Result<StructuredOutput, LlmError> {
        self.lock()?.structured_requests.push(input);
        match self.next()? {
            Scripted::Structured(structured) => Ok(StructuredOutput {
                raw: ModelResponse::default(),
                structured,
            }),
            Scripted::Error(error) => Err(error),
            Scripted::Text(_) => Err(LlmError::Configuration(
                "next scripted response is text, expected structured".to_string(),
            )),
        }
    }

    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
        Err(LlmError::Unsupported("mock model has no embeddings".to_string()))
    }
}

/// Hands out the same scripted model for every identifier.
impl ModelBuilder for ScriptedModel {
    fn build_model(&self, _identifier: &str, _options: ModelOptions) -> Arc<dyn ChatModel> {
        Arc::new(self.clone())
    }
}
