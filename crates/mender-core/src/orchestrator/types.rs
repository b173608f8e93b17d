//! Orchestration result types
//!
//! - `Phase` for the state-machine position
//! - `RepairOutcome` for the enumerated terminal states
//! - `OrchestrationResult` and `AgentResults` for the caller-facing record

use crate::agents::{
    AgentResult, AnalysisOutput, CodeReadingOutput, FixGenerationOutput, InvestigationOutput,
    ReviewOutput,
};
use crate::patch::FixRecommendation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position in the repair state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Phase {
    /// Not started
    #[default]
    Init,
    /// Running Analysis
    Analyzing,
    /// Running Code-Reading
    Reading,
    /// Running Investigation
    Investigating,
    /// Running Fix-Generation
    Generating {
        /// 1-based round
        iteration: u32,
    },
    /// Applying the confidence gate
    Gating {
        /// 1-based round
        iteration: u32,
    },
    /// Running Review
    Reviewing {
        /// 1-based round
        iteration: u32,
    },
    /// Running the patch validator
    Validating {
        /// 1-based round
        iteration: u32,
    },
    /// Single-shot fallback generation
    SingleShot,
    /// Finished
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("init"),
            Self::Analyzing => f.write_str("analysis"),
            Self::Reading => f.write_str("code-reading"),
            Self::Investigating => f.write_str("investigation"),
            Self::Generating { iteration } => write!(f, "fix-generation (iteration {iteration})"),
            Self::Gating { iteration } => write!(f, "confidence gate (iteration {iteration})"),
            Self::Reviewing { iteration } => write!(f, "review (iteration {iteration})"),
            Self::Validating { iteration } => write!(f, "validation (iteration {iteration})"),
            Self::SingleShot => f.write_str("single-shot generation"),
            Self::Done => f.write_str("done"),
        }
    }
}

/// Terminal state of one orchestration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RepairOutcome {
    /// A fix passed the confidence gate, review (when required) and validation
    Approved,
    /// Iterations ran out; the last fix passed the gate and was never rejected
    DegradedAccept,
    /// Iterations ran out without an acceptable fix
    Exhausted,
    /// A fatal stage failed
    StageFailed {
        /// Stage name
        stage: String,
    },
    /// The global deadline elapsed
    TimedOut {
        /// Phase in flight when it elapsed
        phase: Phase,
    },
    /// Cancelled by the caller
    Cancelled,
    /// Accepted from the single-shot fallback
    SingleShot,
}

impl RepairOutcome {
    /// Whether this outcome carries a fix
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Approved | Self::DegradedAccept | Self::SingleShot)
    }
}

/// How the fix was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Approach {
    /// Full multi-agent pipeline
    Agentic,
    /// Single unguided generation
    SingleShot,
    /// No fix produced
    Failed,
}

/// Every agent result produced during one orchestration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResults {
    /// Analysis
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AgentResult<AnalysisOutput>>,
    /// Code-Reading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_reading: Option<AgentResult<CodeReadingOutput>>,
    /// Investigation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub investigation: Option<AgentResult<InvestigationOutput>>,
    /// Fix-Generation, one per round
    pub fix_generation: Vec<AgentResult<FixGenerationOutput>>,
    /// Review, one per reviewed round
    pub review: Vec<AgentResult<ReviewOutput>>,
}

impl AgentResults {
    /// Completion calls across all stages
    #[must_use]
    pub fn total_api_calls(&self) -> u32 {
        self.analysis.as_ref().map_or(0, |r| r.api_calls)
            + self.code_reading.as_ref().map_or(0, |r| r.api_calls)
            + self.investigation.as_ref().map_or(0, |r| r.api_calls)
            + self.fix_generation.iter().map(|r| r.api_calls).sum::<u32>()
            + self.review.iter().map(|r| r.api_calls).sum::<u32>()
    }

    /// Tokens across all stages that reported usage
    #[must_use]
    pub fn total_tokens(&self) -> u32 {
        self.analysis.as_ref().and_then(|r| r.tokens_used).unwrap_or(0)
            + self.code_reading.as_ref().and_then(|r| r.tokens_used).unwrap_or(0)
            + self.investigation.as_ref().and_then(|r| r.tokens_used).unwrap_or(0)
            + self.fix_generation.iter().filter_map(|r| r.tokens_used).sum::<u32>()
            + self.review.iter().filter_map(|r| r.tokens_used).sum::<u32>()
    }
}

/// Result of one orchestration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationResult {
    /// A fix is present
    pub success: bool,
    /// The accepted fix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<FixRecommendation>,
    /// Failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration
    pub total_time_ms: u64,
    /// Generate/review rounds started
    pub iterations: u32,
    /// How the fix was produced
    pub approach: Approach,
    /// Terminal state
    pub outcome: RepairOutcome,
    /// Per-stage results
    pub agent_results: AgentResults,
}
