//! OpenAI-compatible chat completions client
//!
//! Works against any endpoint that speaks the `/chat/completions` protocol:
//! OpenAI, OpenRouter, Ollama's `/v1`, and Gemini's OpenAI compatibility layer.
//! The configured base URL includes the version segment.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError, Role, StopReason, TokenUsage};
use crate::config::LlmConfig;

/// OpenAI-compatible API client
pub struct OpenAIClient {
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
    timeout: Duration,
}

impl OpenAIClient {
    /// Create a new client from configuration
    ///
    /// Reads the API key from the environment variable named in config.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        debug!(base_url = %config.base_url, "from_config: called");
        let api_key = config.api_key()?;
        let timeout = Duration::from_millis(config.timeout_ms);
        let http = Client::builder().timeout(timeout).build().map_err(LlmError::Network)?;

        Ok(Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            max_tokens: config.max_tokens,
            timeout,
        })
    }

    /// Build the request body for the chat completions API
    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        debug!(model = %request.model, %request.max_tokens, "build_request_body: called");
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(ref system) = request.system_prompt {
            messages.push(serde_json::json!({
                "role": "system",
                "content": system,
            }));
        }
        for msg in &request.messages {
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(serde_json::json!({
                "role": role,
                "content": msg.content,
            }));
        }

        let max_tokens = request.max_tokens.min(self.max_tokens);

        // GPT-5.x and o1/o3 models use max_completion_tokens instead of max_tokens
        let uses_completion_tokens =
            request.model.starts_with("gpt-5") || request.model.starts_with("o1") || request.model.starts_with("o3");

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
        });

        if uses_completion_tokens {
            body["max_completion_tokens"] = serde_json::json!(max_tokens);
        } else {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if request.json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        body
    }

    fn parse_response(&self, requested_model: &str, api_response: OpenAIResponse) -> CompletionResponse {
        let choice = api_response.choices.into_iter().next();
        let (content, stop_reason) = match choice {
            Some(c) => (
                c.message.content,
                c.finish_reason
                    .as_deref()
                    .map(StopReason::from_openai)
                    .unwrap_or(StopReason::EndTurn),
            ),
            None => {
                debug!("parse_response: no choices");
                (None, StopReason::Other)
            }
        };

        let usage = api_response
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        CompletionResponse {
            content,
            model: api_response.model.unwrap_or_else(|| requested_model.to_string()),
            stop_reason,
            usage,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(model = %request.model, %request.max_tokens, "complete: called");
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request_body(&request);

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.timeout)
                } else {
                    LlmError::Network(e)
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            debug!("complete: rate limited (429)");
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !response.status().is_success() {
            debug!(%status, "complete: API error");
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError { status, message });
        }

        let api_response: OpenAIResponse = response.json().await?;
        Ok(self.parse_response(&request.model, api_response))
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}
