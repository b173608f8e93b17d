//! Orchestrator configuration

use std::time::Duration;

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Generate/review rounds before giving up
    pub max_iterations: u32,
    /// Fixes below this confidence are never reviewed or accepted
    pub min_confidence: u8,
    /// Whether a fix must be approved by review
    pub require_review: bool,
    /// Deadline for the whole pipeline
    pub total_timeout: Duration,
    /// Try one unguided generation when a fatal stage fails
    pub single_shot_fallback: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            min_confidence: 70,
            require_review: true,
            total_timeout: Duration::from_secs(120),
            single_shot_fallback: false,
        }
    }
}

impl OrchestratorConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum iterations
    #[must_use]
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set the confidence floor
    #[must_use]
    pub fn with_min_confidence(mut self, min: u8) -> Self {
        self.min_confidence = min.min(100);
        self
    }

    /// Set whether review is required
    #[must_use]
    pub fn with_require_review(mut self, required: bool) -> Self {
        self.require_review = required;
        self
    }

    /// Set the global deadline
    #[must_use]
    pub fn with_total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = timeout;
        self
    }

    /// Enable the single-shot fallback
    #[must_use]
    pub fn with_single_shot_fallback(mut self, enabled: bool) -> Self {
        self.single_shot_fallback = enabled;
        self
    }
}
