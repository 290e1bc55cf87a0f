//! LLM request/response types
//!
//! Provider-agnostic shapes for a single, stateless completion call.

use serde::{Deserialize, Serialize};

/// A completion request - everything needed for one LLM call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Model identifier sent to the provider
    pub model: String,

    /// Optional system prompt
    pub system_prompt: Option<String>,

    /// Conversation messages (a single user message for step execution)
    pub messages: Vec<Message>,

    /// Max tokens for the response
    pub max_tokens: u32,

    /// Ask the provider for a JSON object response
    pub json_mode: bool,
}

impl CompletionRequest {
    /// Single user-message request
    pub fn prompt(model: impl Into<String>, prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            messages: vec![Message::user(prompt)],
            max_tokens,
            json_mode: false,
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    /// All message text concatenated, used by test doubles for matching
    pub fn text(&self) -> String {
        self.messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n")
    }
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Response from a completion request
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    /// Text content (absent or empty when the model produced nothing)
    pub content: Option<String>,

    /// Model that actually served the request
    pub model: String,

    /// Why the model stopped
    pub stop_reason: StopReason,

    /// Token usage for cost tracking
    pub usage: TokenUsage,
}

impl CompletionResponse {
    /// Plain text response, mostly for tests and scripted clients
    pub fn text(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            model: model.into(),
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        }
    }

    /// Content if present and non-empty
    pub fn non_empty_content(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }
}

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    Other,
}

impl StopReason {
    /// Parse from Anthropic `stop_reason`
    pub fn from_anthropic(s: &str) -> Self {
        match s {
            "end_turn" => StopReason::EndTurn,
            "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            _ => StopReason::Other,
        }
    }

    /// Parse from OpenAI `finish_reason`
    pub fn from_openai(s: &str) -> Self {
        match s {
            "stop" => StopReason::EndTurn,
            "length" => StopReason::MaxTokens,
            _ => StopReason::Other,
        }
    }
}

/// Token usage for cost tracking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}
