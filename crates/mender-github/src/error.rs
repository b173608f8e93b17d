//! Error types for mender-github

use std::time::Duration;
use thiserror::Error;

/// Result type for hosting operations
pub type Result<T> = std::result::Result<T, Error>;

/// Hosting API errors
#[derive(Debug, Error)]
pub enum Error {
    /// Primary or secondary rate limit hit
    #[error("rate limited by GitHub{}", retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default())]
    RateLimited {
        /// Server-provided wait hint
        retry_after: Option<Duration>,
    },

    /// Resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Token lacks access
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Ref or resource already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Any other non-success status
    #[error("GitHub API error ({status}): {message}")]
    Api {
        /// HTTP status
        status: u16,
        /// Response message
        message: String,
    },

    /// Transport failure
    #[error("network error: {0}")]
    Network(String),

    /// Unexpected response body
    #[error("decode error: {0}")]
    Decode(String),
}

impl Error {
    /// Only rate limits are retried
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Server-provided wait hint
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Classify a non-success response
    ///
    /// 401/403 count as rate limits when the quota is exhausted or the
    /// message says so (secondary limits).
    #[must_use]
    pub fn from_status(
        status: u16,
        message: &str,
        retry_after: Option<Duration>,
        remaining: Option<u64>,
    ) -> Self {
        let lower = message.to_lowercase();
        match status {
            429 => Self::RateLimited { retry_after },
            401 | 403 if remaining == Some(0) || lower.contains("rate limit") => {
                Self::RateLimited { retry_after }
            }
            401 | 403 => Self::PermissionDenied(message.to_string()),
            404 => Self::NotFound(message.to_string()),
            422 if lower.contains("already exists") => Self::AlreadyExists(message.to_string()),
            _ => Self::Api {
                status,
                message: message.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<Error> for mender_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound(message) => mender_core::Error::NotFound(message),
            other => mender_core::Error::Source(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(matches!(
            Error::from_status(429, "slow down", None, None),
            Error::RateLimited { .. }
        ));
        assert!(matches!(
            Error::from_status(403, "API rate limit exceeded for user", None, Some(12)),
            Error::RateLimited { .. }
        ));
        assert!(matches!(
            Error::from_status(403, "Forbidden", None, Some(0)),
            Error::RateLimited { .. }
        ));
        assert!(matches!(
            Error::from_status(403, "Resource not accessible by integration", None, Some(4999)),
            Error::PermissionDenied(_)
        ));
        assert!(matches!(Error::from_status(401, "Bad credentials", None, None), Error::PermissionDenied(_)));
        assert!(matches!(Error::from_status(404, "Not Found", None, None), Error::NotFound(_)));
        assert!(matches!(
            Error::from_status(422, "Reference already exists", None, None),
            Error::AlreadyExists(_)
        ));
        assert!(matches!(
            Error::from_status(422, "Invalid request", None, None),
            Error::Api { status: 422, .. }
        ));
        assert!(matches!(Error::from_status(502, "Bad gateway", None, None), Error::Api { status: 502, .. }));
    }

    #[test]
    fn test_only_rate_limits_retry() {
        let limited = Error::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert!(limited.is_retryable());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(limited.to_string(), "rate limited by GitHub (retry after 7s)");

        assert!(!Error::NotFound("x".into()).is_retryable());
        assert!(!Error::PermissionDenied("x".into()).is_retryable());
        assert!(!Error::Network("reset".into()).is_retryable());
    }

    #[test]
    fn test_core_error_conversion() {
        let core: mender_core::Error = Error::NotFound("a.ts".into()).into();
        assert!(core.is_not_found());
        let core: mender_core::Error = Error::Network("reset".into()).into();
        assert!(matches!(core, mender_core::Error::Source(_)));
    }
}
