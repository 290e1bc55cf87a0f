//! LLM error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during LLM operations
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("API key not found: set the {0} environment variable")]
    MissingApiKey(String),

    #[error("Unknown LLM provider: '{0}'. Supported: anthropic, openai")]
    UnknownProvider(String),
}

impl LlmError {
    /// Check if this is a rate limit error
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }

    /// Check if the provider would likely succeed on a later attempt
    ///
    /// Informational only: the step executor retries every error.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::ApiError { status, .. } => *status >= 500 || *status == 408,
            LlmError::Network(_) => true,
            LlmError::Timeout(_) => true,
            LlmError::EmptyResponse => true,
            LlmError::InvalidResponse(_) => false,
            LlmError::Json(_) => false,
            LlmError::MissingApiKey(_) => false,
            LlmError::UnknownProvider(_) => false,
        }
    }
}
