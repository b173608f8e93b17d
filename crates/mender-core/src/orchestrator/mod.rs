//! Orchestrator - repair state machine
//!
//! Drives one failure through Analysis, Code-Reading and Investigation,
//! then a Fix-Generation / Review loop behind a confidence gate, and
//! validates the accepted change set.
//!
//! # Module Structure
//!
//! - `types`: Phase, RepairOutcome, OrchestrationResult
//! - `config`: OrchestratorConfig
//! - `core`: Orchestrator struct and builder methods
//! - `process`: Pipeline, iteration loop and global deadline

mod config;
mod core;
mod process;
mod types;

#[cfg(test)]
mod tests;

pub use config::OrchestratorConfig;
pub use core::Orchestrator;
pub use types::{AgentResults, Approach, OrchestrationResult, Phase, RepairOutcome};
