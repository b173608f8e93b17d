//! Mender Core - Agentic repair pipeline for failing end-to-end tests
//!
//! This crate contains the repair logic:
//! - Context: the failure record and its fetched sources
//! - Agents: Analysis, Code-Reading, Investigation, Fix-Generation, Review
//! - Orchestrator: the gated iteration loop with a global deadline
//! - Validator: deterministic checks on proposed change sets
//! - Source: the source-fetching seam

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agents;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod patch;
pub mod source;
pub mod validator;

pub use context::{ChangedFile, DiffMetadata, Framework, RepairContext, RepoTarget, Screenshot};
pub use error::{Error, Result};
pub use orchestrator::{
    AgentResults, Approach, OrchestrationResult, Orchestrator, OrchestratorConfig, Phase,
    RepairOutcome,
};
pub use patch::{ChangeType, CodeChange, FixRecommendation};
pub use source::{InMemorySource, LocalSource, SourceFetcher};
pub use validator::{
    apply_changes, replace_anchored, validate_change_set, validate_changes, validate_fix,
    validate_syntax, ValidationReport,
};
