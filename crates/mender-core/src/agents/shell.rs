//! Agent execution shell
//!
//! Builds the completion request, races it against the agent deadline,
//! extracts the JSON object and hands it to the stage parser. Every outcome
//! is folded into an [`AgentResult`].

use super::parse::parse_object;
use super::{AgentConfig, AgentFailure, AgentResult};
use crate::error::{Error, Result};
use mender_llm::{CompletionRequest, ImageContent, LlmProvider, Message};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// User turn of an agent request
#[derive(Debug, Clone, Default)]
pub struct UserContent {
    /// Prompt text
    pub text: String,
    /// Inlined screenshots
    pub images: Vec<ImageContent>,
}

impl UserContent {
    /// Text-only content
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }

    /// Attach images
    #[must_use]
    pub fn with_images(mut self, images: Vec<ImageContent>) -> Self {
        self.images = images;
        self
    }
}

/// Shared request/timeout/parse wrapper
#[derive(Clone)]
pub struct AgentShell {
    provider: Arc<dyn LlmProvider>,
    config: AgentConfig,
}

impl AgentShell {
    /// Create a shell over a provider
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>, config: AgentConfig) -> Self {
        Self { provider, config }
    }

    /// Request settings
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn build_request(&self, system_prompt: &str, content: UserContent) -> CompletionRequest {
        let model = self
            .config
            .model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string());

        CompletionRequest::new(model)
            .with_message(Message::system(system_prompt))
            .with_message(Message::user(content.text).with_images(content.images))
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens)
            .with_json_mode(true)
    }

    /// Run one completion and parse it with `parser`
    #[instrument(skip(self, system_prompt, content, parser), fields(agent = %agent))]
    pub async fn run<T, F>(
        &self,
        agent: &str,
        system_prompt: &str,
        content: UserContent,
        parser: F,
    ) -> AgentResult<T>
    where
        T: Send,
        F: FnOnce(&Map<String, Value>) -> Result<T> + Send,
    {
        let start = Instant::now();
        let request = self.build_request(system_prompt, content);
        let timeout_ms = self.config.timeout.as_millis() as u64;

        debug!(images = request.messages.iter().map(|m| m.images.len()).sum::<usize>(), "Sending agent request");

        let outcome = tokio::time::timeout(self.config.timeout, self.provider.complete(request)).await;
        let elapsed = || start.elapsed().as_millis() as u64;

        let response = match outcome {
            Err(_) => {
                warn!(timeout_ms, "Agent call timed out");
                return AgentResult::failed(
                    AgentFailure::Timeout,
                    format!("{agent} timed out after {timeout_ms}ms"),
                    elapsed(),
                    1,
                );
            }
            Ok(Err(mender_llm::Error::Timeout(ms))) => {
                warn!(timeout_ms = ms, "Provider request timed out");
                return AgentResult::failed(
                    AgentFailure::Timeout,
                    format!("{agent} provider timed out after {ms}ms"),
                    elapsed(),
                    1,
                );
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Agent call failed");
                return AgentResult::failed(AgentFailure::Provider, e.to_string(), elapsed(), 1);
            }
            Ok(Ok(response)) => response,
        };

        let tokens_used = response.usage.as_ref().map(|u| u.total_tokens);

        let parsed = parse_object(&response.content).and_then(|map| parser(&map));
        match parsed {
            Ok(data) => {
                debug!(elapsed_ms = elapsed(), tokens = ?tokens_used, "Agent call succeeded");
                AgentResult::ok(data, elapsed(), 1, tokens_used)
            }
            Err(e) => {
                let failure = match e {
                    Error::Parse(_) => AgentFailure::Parse,
                    _ => AgentFailure::Invalid,
                };
                warn!(error = %e, ?failure, "Agent output rejected");
                let mut result = AgentResult::failed(failure, e.to_string(), elapsed(), 1);
                result.tokens_used = tokens_used;
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::parse::Fields;
    use mender_llm::{MockProvider, MockReply};
    use std::time::Duration;

    fn shell(provider: MockProvider, timeout: Duration) -> (Arc<MockProvider>, AgentShell) {
        let provider = Arc::new(provider);
        let shell = AgentShell::new(provider.clone(), AgentConfig::new().with_timeout(timeout));
        (provider, shell)
    }

    fn parse_value(map: &Map<String, Value>) -> Result<u8> {
        Fields::new(map).required_confidence(&["confidence"])
    }

    #[tokio::test]
    async fn test_run_parses_and_records_usage() {
        let (provider, shell) = shell(MockProvider::new(), Duration::from_secs(1));
        provider.push_text("[t]", "sure: {\"confidence\": 77}");

        let content = UserContent::text("hello")
            .with_images(vec![ImageContent::from_base64("image/png", "AAAA")]);
        let result = shell.run("test", "[t] system", content, parse_value).await;

        assert!(result.success);
        assert_eq!(result.data, Some(77));
        assert_eq!(result.api_calls, 1);
        assert_eq!(result.tokens_used, Some(15));

        let request = &provider.requests()[0];
        assert!(request.json_mode);
        assert_eq!(request.model, "mock-model");
        assert_eq!(request.messages[1].images.len(), 1);
    }

    #[tokio::test]
    async fn test_run_timeout_is_typed_failure() {
        let (_, shell) = shell(
            MockProvider::new().with_default_reply(MockReply::Hang),
            Duration::from_millis(20),
        );
        let result = shell.run("slow", "sys", UserContent::text("x"), parse_value).await;
        assert!(!result.success);
        assert_eq!(result.failure, Some(AgentFailure::Timeout));
        assert!(result.error_message().contains("slow timed out"));
    }

    #[tokio::test]
    async fn test_run_classifies_failures() {
        let (provider, shell) = shell(MockProvider::new(), Duration::from_secs(1));
        provider.push("[a]", MockReply::Error("boom".into()));
        provider.push_text("[b]", "not json");
        provider.push_text("[c]", "{\"confidence\": \"high\"}");

        let a = shell.run("a", "[a]", UserContent::text("x"), parse_value).await;
        let b = shell.run("b", "[b]", UserContent::text("x"), parse_value).await;
        let c = shell.run("c", "[c]", UserContent::text("x"), parse_value).await;

        assert_eq!(a.failure, Some(AgentFailure::Provider));
        assert_eq!(b.failure, Some(AgentFailure::Parse));
        assert_eq!(c.failure, Some(AgentFailure::Invalid));
        assert!(c.data.is_none());
    }
}
