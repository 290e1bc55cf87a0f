//! Anthropic Messages API client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError, StopReason, TokenUsage};
use crate::config::LlmConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude API client
pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
    timeout: Duration,
}

impl AnthropicClient {
    /// Create a new client from configuration
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

    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        debug!(model = %request.model, %request.max_tokens, "build_request_body: called");
        let messages: Vec<_> = request
            .messages
            .iter()
            .map(|msg| {
                serde_json::json!({
                    "role": msg.role,
                    "content": msg.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": request.model,
            "max_tokens": request.max_tokens.min(self.max_tokens),
            "messages": messages,
        });

        let mut system = request.system_prompt.clone().unwrap_or_default();
        if request.json_mode {
            // The Messages API has no response_format; ask in the system prompt
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str("Respond with a single valid JSON value and nothing else.");
        }
        if !system.is_empty() {
            body["system"] = serde_json::json!(system);
        }

        body
    }

    fn parse_response(&self, requested_model: &str, api_response: AnthropicResponse) -> CompletionResponse {
        let text: Vec<String> = api_response
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text),
                AnthropicContentBlock::Other => None,
            })
            .collect();

        CompletionResponse {
            content: if text.is_empty() { None } else { Some(text.join("")) },
            model: api_response.model.unwrap_or_else(|| requested_model.to_string()),
            stop_reason: api_response
                .stop_reason
                .as_deref()
                .map(StopReason::from_anthropic)
                .unwrap_or(StopReason::EndTurn),
            usage: TokenUsage {
                input_tokens: api_response.usage.input_tokens,
                output_tokens: api_response.usage.output_tokens,
            },
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(model = %request.model, %request.max_tokens, "complete: called");
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_request_body(&request);

        let response = self
            .http
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
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

        let api_response: AnthropicResponse = response.json().await?;
        Ok(self.parse_response(&request.model, api_response))
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    model: Option<String>,
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AnthropicClient {
        AnthropicClient {
            api_key: "test-key".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            http: Client::new(),
            max_tokens: 4096,
            timeout: Duration::from_secs(300),
        }
    }

    #[test]
    fn test_build_request_body() {
        let request = CompletionRequest::prompt("claude-sonnet-4", "Hello", 10_000).with_system("Be brief");
        let body = client().build_request_body(&request);

        assert_eq!(body["model"], "claude-sonnet-4");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["system"], "Be brief");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Hello");
    }

    #[test]
    fn test_json_mode_adds_system_instruction() {
        let body = client().build_request_body(&CompletionRequest::prompt("m", "Hi", 10).json());
        assert!(body["system"].as_str().is_some_and(|s| s.contains("JSON")));
    }

    #[test]
    fn test_parse_response_joins_text_blocks() {
        let api: AnthropicResponse = serde_json::from_value(serde_json::json!({
            "content": [
                {"type": "text", "text": "Hello "},
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "world"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 1, "output_tokens": 2}
        }))
        .unwrap();
        let resp = client().parse_response("m", api);
        assert_eq!(resp.content.as_deref(), Some("Hello world"));
        assert_eq!(resp.stop_reason, StopReason::EndTurn);
    }
}
