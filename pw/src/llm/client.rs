//! LlmClient trait definition

use async_trait::async_trait;

use super::{CompletionRequest, CompletionResponse, LlmError};

/// Stateless LLM client - each call is independent (fresh context)
///
/// Implementations perform exactly one provider call per `complete`.
/// Retry policy belongs to the caller.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a single completion request
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

/// Stand-in used when no API key is configured
///
/// Commands that never reach a model (show, list, approve) still need a
/// client to build the orchestrator; any call fails with `MissingApiKey`.
#[derive(Debug, Clone)]
pub struct UnconfiguredClient {
    api_key_env: String,
}

impl UnconfiguredClient {
    pub fn new(api_key_env: impl Into<String>) -> Self {
        Self {
            api_key_env: api_key_env.into(),
        }
    }
}

#[async_trait]
impl LlmClient for UnconfiguredClient {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Err(LlmError::MissingApiKey(self.api_key_env.clone()))
    }
}


#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::debug;

    /// One scripted outcome of a mock call
    #[derive(Debug, Clone)]
    pub enum MockReply {
        Text(String),
        Empty,
        Error(String),
    }

    impl MockReply {
        pub fn text(s: impl Into<String>) -> Self {
            MockReply::Text(s.into())
        }
    }

    /// Mock LLM client for unit tests
    ///
    /// Replies are consumed in order. With `repeat_last`, the final reply is
    /// returned forever once the script runs out.
    pub struct MockLlmClient {
        replies: Vec<MockReply>,
        repeat_last: bool,
        call_count: AtomicUsize,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl MockLlmClient {
        pub fn new(replies: Vec<MockReply>) -> Self {
            debug!(reply_count = %replies.len(), "MockLlmClient::new: called");
            Self {
                replies,
                repeat_last: false,
                call_count: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Every call returns the same reply
        pub fn always(reply: MockReply) -> Self {
            Self {
                repeat_last: true,
                ..Self::new(vec![reply])
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        pub fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().map(|r| r.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            debug!(%idx, "MockLlmClient::complete: called");
            let model = request.model.clone();
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request);
            }

            let reply = match self.replies.get(idx) {
                Some(reply) => reply.clone(),
                None if self.repeat_last && !self.replies.is_empty() => self.replies[self.replies.len() - 1].clone(),
                None => return Err(LlmError::InvalidResponse("No more mock responses".to_string())),
            };

            match reply {
                MockReply::Text(text) => Ok(CompletionResponse::text(model, text)),
                MockReply::Empty => Ok(CompletionResponse {
                    content: None,
                    ..CompletionResponse::text(model, "")
                }),
                MockReply::Error(message) => Err(LlmError::InvalidResponse(message)),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_mock_client_returns_replies_in_order() {
            let client = MockLlmClient::new(vec![MockReply::text("Response 1"), MockReply::text("Response 2")]);
            let req = CompletionRequest::prompt("m", "hi", 100);

            let resp1 = client.complete(req.clone()).await.unwrap();
            assert_eq!(resp1.content.as_deref(), Some("Response 1"));
            let resp2 = client.complete(req.clone()).await.unwrap();
            assert_eq!(resp2.content.as_deref(), Some("Response 2"));

            assert_eq!(client.call_count(), 2);
            assert_eq!(client.requests().len(), 2);
        }

        #[tokio::test]
        async fn test_mock_client_errors_when_exhausted() {
            let client = MockLlmClient::new(vec![]);
            let result = client.complete(CompletionRequest::prompt("m", "hi", 100)).await;
            assert!(result.is_err());
        }

        #[tokio::test]
        async fn test_mock_client_always() {
            let client = MockLlmClient::always(MockReply::Error("down".to_string()));
            for _ in 0..3 {
                assert!(client.complete(CompletionRequest::prompt("m", "hi", 100)).await.is_err());
            }
            assert_eq!(client.call_count(), 3);
        }
    }
}
