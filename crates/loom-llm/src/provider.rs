//! Provider adapter contract.

use async_trait::async_trait;

use crate::errors::LlmError;
use crate::types::{CompletionRequest, ModelResponse};

/// One concrete endpoint family (a cloud region, a vendor API).
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<ModelResponse, LlmError>;

    async fn embed(&self, model: &str, _input: &str) -> Result<Vec<f32>, LlmError> {
        Err(LlmError::Unsupported(format!(
            "{} does not serve embeddings for {model}",
            self.name()
        )))
    }
}
