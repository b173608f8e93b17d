//! Error types for mender-core

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Completion provider error
    #[error("llm error: {0}")]
    Llm(#[from] mender_llm::Error),

    /// Requested source file does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Source fetch failed for another reason
    #[error("source error: {0}")]
    Source(String),

    /// Model output could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// Deterministic validation rejected a patch
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Deadline elapsed
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// Cancelled by the caller
    #[error("cancelled")]
    Cancelled,

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error means the file simply does not exist
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
