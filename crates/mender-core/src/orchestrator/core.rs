//! Orchestrator core structure
//!
//! Contains the `Orchestrator` struct and its builder methods.

use crate::agents::{
    AgentConfig, AgentShell, AnalysisAgent, CodeReadingAgent, FixGenerationAgent,
    InvestigationAgent, ReviewAgent,
};
use crate::source::SourceFetcher;
use mender_llm::LlmProvider;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::config::OrchestratorConfig;

/// Coordinates the repair agents for one failure at a time
pub struct Orchestrator {
    pub(crate) analysis: AnalysisAgent,
    pub(crate) code_reading: CodeReadingAgent,
    pub(crate) investigation: InvestigationAgent,
    pub(crate) fix_generation: FixGenerationAgent,
    pub(crate) review: ReviewAgent,
    pub(crate) config: OrchestratorConfig,
    provider: Arc<dyn LlmProvider>,
    source: Arc<dyn SourceFetcher>,
    /// Parent of every per-run cancellation token
    pub(crate) shutdown: CancellationToken,
}

impl Orchestrator {
    /// Create a new orchestrator with default agent settings
    #[must_use]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        source: Arc<dyn SourceFetcher>,
        config: OrchestratorConfig,
    ) -> Self {
        Self::build(provider, source, config, AgentConfig::default())
    }

    fn build(
        provider: Arc<dyn LlmProvider>,
        source: Arc<dyn SourceFetcher>,
        config: OrchestratorConfig,
        agent_config: AgentConfig,
    ) -> Self {
        let shell = AgentShell::new(provider.clone(), agent_config);
        Self {
            analysis: AnalysisAgent::new(shell.clone()),
            code_reading: CodeReadingAgent::new(shell.clone(), source.clone()),
            investigation: InvestigationAgent::new(shell.clone()),
            fix_generation: FixGenerationAgent::new(shell.clone()),
            review: ReviewAgent::new(shell),
            config,
            provider,
            source,
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the per-agent settings (timeout, temperature, model)
    #[must_use]
    pub fn with_agent_config(self, agent_config: AgentConfig) -> Self {
        Self::build(self.provider, self.source, self.config, agent_config)
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Name of the underlying provider
    #[must_use]
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Cancel every in-flight and future run of this orchestrator
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Token whose cancellation stops every run of this orchestrator
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
