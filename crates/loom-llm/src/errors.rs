//! Error taxonomy and the default retry classification.

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("{provider} returned status {status}: {message}")]
    Provider {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("retryable model error: {0}")]
    Retryable(String),

    #[error("could not get model routing for {0}")]
    NoRoute(String),

    #[error("{0} is not a chat model")]
    NotChatModel(String),

    #[error("{0} is not an embedding model")]
    NotEmbeddingModel(String),

    #[error("model did not return structured output")]
    MissingStructuredOutput,

    #[error("invalid model response: {0}")]
    InvalidResponse(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl LlmError {
    /// Default transient-error classifier used by the model router.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { status, .. } => {
                matches!(*status, 408 | 409 | 429 | 529) || *status >= 500
            }
            Self::Transport(_) | Self::Retryable(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            return Self::InvalidResponse(error.to_string());
        }
        Self::Transport(error.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidResponse(error.to_string())
    }
}
