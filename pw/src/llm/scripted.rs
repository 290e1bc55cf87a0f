//! Deterministic LLM client driven by prompt-substring rules
//!
//! Used by integration tests and offline runs. Each rule owns a queue of
//! replies; the last reply in a queue is sticky and repeats forever.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError};

/// One scripted outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Successful response with this content
    Text(String),
    /// Successful response with no content
    Empty,
    /// Provider failure with this message
    Error(String),
}

impl ScriptedReply {
    pub fn text(s: impl Into<String>) -> Self {
        ScriptedReply::Text(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        ScriptedReply::Error(s.into())
    }
}

struct Rule {
    needle: String,
    replies: VecDeque<ScriptedReply>,
}

/// LLM client that answers from a script instead of a provider
#[derive(Default)]
pub struct ScriptedLlmClient {
    rules: Mutex<Vec<Rule>>,
    fallback: Option<ScriptedReply>,
    latency: Option<Duration>,
    calls: Mutex<Vec<(CompletionRequest, Instant)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer prompts containing `needle` with `replies`, in order
    ///
    /// Rules are matched in registration order against the system prompt and
    /// all message text.
    pub fn on(self, needle: impl Into<String>, replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        let rule = Rule {
            needle: needle.into(),
            replies: replies.into_iter().collect(),
        };
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(rule);
        }
        self
    }

    /// Reply used when no rule matches
    pub fn otherwise(mut self, reply: ScriptedReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// Simulated provider latency applied to every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Number of recorded calls whose prompt contains `needle`
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.iter().filter(|(r, _)| request_text(r).contains(needle)).count())
            .unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.call_log().into_iter().map(|(request, _)| request).collect()
    }

    /// Recorded calls with the (tokio) instant each one started
    pub fn call_log(&self) -> Vec<(CompletionRequest, Instant)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Highest number of calls that were in flight at the same time
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, text: &str) -> Option<ScriptedReply> {
        let mut rules = self.rules.lock().ok()?;
        for rule in rules.iter_mut() {
            if !text.contains(&rule.needle) {
                continue;
            }
            let reply = if rule.replies.len() > 1 {
                rule.replies.pop_front()
            } else {
                rule.replies.front().cloned()
            };
            if reply.is_some() {
                return reply;
            }
        }
        self.fallback.clone()
    }
}

fn request_text(request: &CompletionRequest) -> String {
    match request.system_prompt {
        Some(ref system) => format!("{}\n{}", system, request.text()),
        None => request.text(),
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let text = request_text(&request);
        let model = request.model.clone();
        debug!(%model, prompt_len = text.len(), "ScriptedLlmClient::complete: called");

        if let Ok(mut calls) = self.calls.lock() {
            calls.push((request, Instant::now()));
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.next_reply(&text) {
            Some(ScriptedReply::Text(content)) => Ok(CompletionResponse::text(model, content)),
            Some(ScriptedReply::Empty) => Ok(CompletionResponse {
                content: None,
                ..CompletionResponse::text(model, "")
            }),
            Some(ScriptedReply::Error(message)) => Err(LlmError::ApiError { status: 503, message }),
            None => Err(LlmError::InvalidResponse("No scripted reply matches the prompt".to_string())),
        }
    }
}
