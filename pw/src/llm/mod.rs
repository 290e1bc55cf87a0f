//! LLM client module
//!
//! A single `complete` call per request. Retries and backoff live in the
//! step executor, not here.

use std::sync::Arc;

use tracing::debug;

mod anthropic;
pub mod client;
mod error;
mod openai;
mod scripted;
mod types;

pub use anthropic::AnthropicClient;
pub use client::{LlmClient, UnconfiguredClient};
pub use error::LlmError;
pub use openai::OpenAIClient;
pub use scripted::{ScriptedLlmClient, ScriptedReply};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, StopReason, TokenUsage};

use crate::config::LlmConfig;

/// Create an LLM client based on the provider specified in config
///
/// Supports "anthropic" and "openai" (any OpenAI-compatible endpoint).
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    debug!(provider = %config.provider, "create_client: called");
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicClient::from_config(config)?)),
        "openai" => Ok(Arc::new(OpenAIClient::from_config(config)?)),
        other => Err(LlmError::UnknownProvider(other.to_string())),
    }
}
