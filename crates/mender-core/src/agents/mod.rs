//! Reasoning agents
//!
//! Five stages share one execution shell:
//!
//! - `analysis`: root-cause classification of the failure
//! - `code_reading`: fetches the test file and its support files
//! - `investigation`: cross-references selectors against sources and diff
//! - `fix_generation`: proposes literal `oldCode → newCode` edits
//! - `review`: checks proposed edits and re-derives approval
//!
//! Every agent returns an [`AgentResult`]; none of them return `Err`.

mod analysis;
mod code_reading;
mod fix_generation;
mod investigation;
pub(crate) mod parse;
mod review;
pub(crate) mod selectors;
mod shell;

pub use analysis::{
    AnalysisAgent, AnalysisOutput, IssueLocation, PatternFlags, RootCauseCategory,
};
pub use code_reading::{
    CodeReadingAgent, CodeReadingInput, CodeReadingOutput, PageObject, RelatedFile, MAX_FILE_CHARS,
};
pub use fix_generation::{
    unverified_selectors, FixGenerationAgent, FixGenerationInput, FixGenerationOutput,
};
pub use investigation::{
    collect_evidence, FindingType, InvestigationAgent, InvestigationFinding, InvestigationInput,
    InvestigationOutput, SelectorEvidence, SelectorUpdate, Severity,
};
pub use parse::normalize_enum;
pub use review::{
    derive_approval, feedback_from_issues, validate_old_code_exists, validate_old_code_per_file, ReviewAgent,
    ReviewInput, ReviewIssue, ReviewOutput, ReviewSeverity,
};
pub use shell::{AgentShell, UserContent};

use crate::context::RepairContext;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Why an agent call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentFailure {
    /// The per-agent deadline elapsed
    Timeout,
    /// The completion service returned an error
    Provider,
    /// No parseable JSON object in the completion
    Parse,
    /// JSON parsed but a required field is missing or malformed
    Invalid,
    /// The agent could not obtain its own inputs
    Input,
    /// Cancelled by the orchestrator
    Cancelled,
}

/// Uniform envelope returned by every agent call
///
/// `data` is present iff `success`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult<T> {
    /// Whether the stage produced usable output
    pub success: bool,
    /// Stage output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure kind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<AgentFailure>,
    /// Wall-clock time spent in the stage
    pub execution_time_ms: u64,
    /// Completion calls made
    pub api_calls: u32,
    /// Tokens consumed, when the provider reports usage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
}

impl<T> AgentResult<T> {
    /// Successful result
    #[must_use]
    pub fn ok(data: T, execution_time_ms: u64, api_calls: u32, tokens_used: Option<u32>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            failure: None,
            execution_time_ms,
            api_calls,
            tokens_used,
        }
    }

    /// Failed result
    #[must_use]
    pub fn failed(
        failure: AgentFailure,
        error: impl Into<String>,
        execution_time_ms: u64,
        api_calls: u32,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            failure: Some(failure),
            execution_time_ms,
            api_calls,
            tokens_used: None,
        }
    }

    /// Transform the payload, keeping the accounting
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> AgentResult<U> {
        AgentResult {
            success: self.success,
            data: self.data.map(f),
            error: self.error,
            failure: self.failure,
            execution_time_ms: self.execution_time_ms,
            api_calls: self.api_calls,
            tokens_used: self.tokens_used,
        }
    }

    /// Error text, or a generic message
    #[must_use]
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown error")
    }
}

/// Per-agent request settings
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Deadline for one completion call
    pub timeout: Duration,
    /// Sampling temperature
    pub temperature: f32,
    /// Completion token limit
    pub max_tokens: u32,
    /// Model override; the provider default when `None`
    pub model: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            temperature: 0.3,
            max_tokens: 4096,
            model: None,
        }
    }
}

impl AgentConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-call timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the token limit
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Override the model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// A pipeline stage
#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    /// Stage input beyond the shared context
    type Input: Send + Sync;
    /// Stage output
    type Output: Send;

    /// Stage name used in logs and errors
    fn name(&self) -> &'static str;

    /// Run the stage
    async fn execute(
        &self,
        input: &Self::Input,
        context: &RepairContext,
    ) -> AgentResult<Self::Output>;
}
