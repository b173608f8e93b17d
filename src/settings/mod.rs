//! Application settings
//!
//! Loaded by [`loader::load_config`]; converted into the library
//! configuration types at the edges.

mod loader;

pub use loader::load_config;

use mender_core::agents::AgentConfig;
use mender_core::OrchestratorConfig;
use mender_github::{ApplierConfig, RetryConfig};
use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Model provider settings
    pub llm: LlmSettings,
    /// Pipeline settings
    pub orchestrator: OrchestratorSettings,
    /// Hosting settings
    pub github: GitHubSettings,
}

/// Model provider settings
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSettings {
    /// OpenAI-compatible endpoint
    pub base_url: String,
    /// Model name
    pub model: String,
    /// HTTP timeout
    pub request_timeout_secs: u64,
    /// Deadline for one agent call
    pub agent_timeout_secs: u64,
    /// Sampling temperature
    pub temperature: f32,
    /// Completion token limit
    pub max_tokens: u32,
}

/// Pipeline settings
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSettings {
    /// Fix-generation rounds
    pub max_iterations: u32,
    /// Confidence gate
    pub min_confidence: u8,
    /// Run the review stage
    pub require_review: bool,
    /// Global run deadline
    pub total_timeout_secs: u64,
    /// One-shot generation when a fatal stage fails
    pub single_shot_fallback: bool,
}

/// Hosting settings
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubSettings {
    /// REST API base
    pub api_base: String,
    /// Branch fixes are based on
    pub base_branch: String,
    /// Prefix for fix branches
    pub branch_prefix: String,
    /// Applier confidence floor
    pub min_confidence: u8,
    /// Attempts per hosting call
    pub retry_max_attempts: u32,
    /// Workflow dispatched after apply
    #[serde(default)]
    pub validation_workflow: Option<String>,
}

impl LlmSettings {
    /// Per-agent settings
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig::new()
            .with_timeout(Duration::from_secs(self.agent_timeout_secs))
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }
}

impl OrchestratorSettings {
    /// Library configuration
    pub fn to_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::new()
            .with_max_iterations(self.max_iterations)
            .with_min_confidence(self.min_confidence)
            .with_require_review(self.require_review)
            .with_total_timeout(Duration::from_secs(self.total_timeout_secs))
            .with_single_shot_fallback(self.single_shot_fallback)
    }
}

impl GitHubSettings {
    /// Retry policy for hosting calls
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new().with_max_attempts(self.retry_max_attempts)
    }

    /// Applier configuration
    pub fn applier_config(&self) -> ApplierConfig {
        let config = ApplierConfig::new()
            .with_base_branch(&self.base_branch)
            .with_branch_prefix(&self.branch_prefix)
            .with_min_confidence(self.min_confidence)
            .with_retry(self.retry());
        match &self.validation_workflow {
            Some(workflow) => config.with_validation_workflow(workflow),
            None => config,
        }
    }
}
