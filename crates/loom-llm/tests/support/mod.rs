#![allow(dead_code)]

use async_trait::async_trait;
use loom_llm::{
    CompletionRequest, ContentBlock, LlmError, ModelResponse, ProviderAdapter, Usage,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Adapter replaying queued outcomes. Every call is appended to a log shared
/// across adapters so tests can assert the routing order.
#[derive(Clone)]
pub struct SequenceAdapter {
    pub name: String,
    pub responses: Arc<Mutex<VecDeque<Result<ModelResponse, LlmError>>>>,
    pub requests: Arc<Mutex<Vec<CompletionRequest>>>,
    pub call_log: Arc<Mutex<Vec<String>>>,
}

impl SequenceAdapter {
    pub fn new(name: &str, call_log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            call_log,
        }
    }

    pub fn push(&self, outcome: Result<ModelResponse, LlmError>) {
        self.responses
            .lock()
            .expect("responses mutex")
            .push_back(outcome);
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().expect("requests mutex").clone()
    }
}

#[async_trait]
impl ProviderAdapter for SequenceAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<ModelResponse, LlmError> {
        self.call_log
            .lock()
            .expect("call log mutex")
            .push(self.name.clone());
        self.requests.lock().expect("requests mutex").push(request);
        self.responses
            .lock()
            .expect("responses mutex")
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Configuration("no response queued".to_string())))
    }
}

pub fn extract_response(structured: Value) -> ModelResponse {
    ModelResponse {
        id: "msg_1".to_string(),
        model: "test-model".to_string(),
        content: vec![ContentBlock::ToolUse {
            id: "toolu_extract".to_string(),
            name: "extract".to_string(),
            input: structured,
        }],
        stop_reason: Some("tool_use".to_string()),
        usage: Usage {
            input_tokens: 10,
            output_tokens: 5,
        },
    }
}

pub fn text_response(text: &str) -> ModelResponse {
    ModelResponse {
        content: vec![ContentBlock::text(text)],
        ..ModelResponse::default()
    }
}

pub fn overloaded() -> LlmError {
    LlmError::Provider {
        provider: "test".to_string(),
        status: 529,
        message: "Overloaded".to_string(),
    }
}
