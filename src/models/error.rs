//! Error types for fanout.
//!
//! Epistemic taxonomy:
//! - K_i violated: Caller broke a precondition (hard error, never retried)
//! - I^B materialized: Remote call failed (captured per call, retried)
//! - B_i falsified: Local setup failed (config, files, parsing)

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for fanout.
///
/// Only precondition violations and setup failures surface as this type.
/// Per-call remote failures are captured in the dispatch result instead.
#[derive(Debug, Error)]
pub enum FanoutError {
    // ═══════════════════════════════════════════════════════════════════
    // K_i VIOLATED — Caller bug, fail fast
    // ═══════════════════════════════════════════════════════════════════
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ═══════════════════════════════════════════════════════════════════
    // B_i FALSIFIED — Local setup went wrong
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    // ═══════════════════════════════════════════════════════════════════
    // K_i VIOLATED — Our own invariant broke
    // ═══════════════════════════════════════════════════════════════════
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FanoutError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Shorthand for a precondition violation.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

/// Failure of a single executor attempt.
///
/// Every variant is transient from the dispatcher's point of view: it consumes
/// one attempt and the call is retried while attempts remain.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutorError {
    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: f64 },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

impl ExecutorError {
    /// Short stable label for attempt records and logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Network(_) => "network",
            Self::RateLimited { .. } => "rate_limited",
            Self::Api { .. } => "api",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Other(_) => "other",
        }
    }

    /// Whether a provider would expect this to succeed on retry.
    ///
    /// Informational only. The dispatcher retries every category.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500 || *status == 408,
            Self::InvalidResponse(_) | Self::Other(_) => false,
        }
    }
}

/// Result type alias for fanout.
pub type Result<T> = std::result::Result<T, FanoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_error_categories() {
        assert_eq!(ExecutorError::Timeout(Duration::from_secs(1)).category(), "timeout");
        assert_eq!(
            ExecutorError::RateLimited {
                retry_after_secs: 2.0
            }
            .category(),
            "rate_limited"
        );
        assert_eq!(ExecutorError::Other("boom".into()).to_string(), "boom");
    }

    #[test]
    fn test_retryable_hints() {
        assert!(ExecutorError::Network("reset".into()).is_retryable());
        assert!(
            ExecutorError::Api {
                status: 503,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(
            !ExecutorError::Api {
                status: 401,
                message: String::new()
            }
            .is_retryable()
        );
    }
}
