//! Mock LLM Provider for testing
//!
//! Replies are queued per marker: the first marker found in the request's
//! system prompt selects the queue. Requests that match no queued marker get
//! the default reply.

use crate::completion::{CompletionRequest, CompletionResponse, TokenUsage};
use crate::error::{Error, Result};
use crate::provider::LlmProvider;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A scripted reply
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return this text as the completion content
    Text(String),
    /// Fail with an API error carrying this message
    Error(String),
    /// Never complete (exercises timeouts and cancellation)
    Hang,
}

/// A mock provider that returns scripted replies.
pub struct MockProvider {
    queues: Arc<Mutex<Vec<(String, VecDeque<MockReply>)>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    default_reply: MockReply,
    latency: Option<Duration>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create a new mock provider.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queues: Arc::new(Mutex::new(Vec::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            default_reply: MockReply::Text("mock response".to_string()),
            latency: None,
        }
    }

    /// Set the reply used when no queued reply matches
    #[must_use]
    pub fn with_default_reply(mut self, reply: MockReply) -> Self {
        self.default_reply = reply;
        self
    }

    /// Delay every reply by `latency`
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue a text reply for requests whose system prompt contains `marker`.
    pub fn push_text(&self, marker: &str, content: impl Into<String>) {
        self.push(marker, MockReply::Text(content.into()));
    }

    /// Queue a reply for requests whose system prompt contains `marker`.
    pub fn push(&self, marker: &str, reply: MockReply) {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, queue)) = queues.iter_mut().find(|(m, _)| m == marker) {
            queue.push_back(reply);
        } else {
            queues.push((marker.to_string(), VecDeque::from([reply])));
        }
    }

    /// All requests received so far
    #[must_use]
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of requests whose system prompt contained `marker`
    #[must_use]
    pub fn call_count(&self, marker: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.system_prompt().is_some_and(|s| s.contains(marker)))
            .count()
    }

    fn next_reply(&self, request: &CompletionRequest) -> MockReply {
        let system = request.system_prompt().unwrap_or_default();
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues
            .iter_mut()
            .filter(|(marker, _)| system.contains(marker.as_str()))
            .find_map(|(_, queue)| queue.pop_front())
            .unwrap_or_else(|| self.default_reply.clone())
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let reply = self.next_reply(&request);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match reply {
            MockReply::Text(content) => Ok(CompletionResponse {
                usage: Some(TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                }),
                content,
                finish_reason: Some("stop".to_string()),
                model: "mock-model".to_string(),
            }),
            MockReply::Error(message) => Err(Error::Api(message)),
            MockReply::Hang => {
                std::future::pending::<()>().await;
                Err(Error::Timeout(0))
            }
        }
    }
}
