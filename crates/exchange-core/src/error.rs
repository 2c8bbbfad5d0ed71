//! Error types for the Futures Guard system.

use thiserror::Error;

/// Messages exchanges return when a setting is already in the requested state.
const IDEMPOTENT_NOOP_PATTERNS: &[&str] = &["no need to change"];

/// Failure reported by an exchange gateway call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Gateway call `{operation}` timed out after {after_ms}ms")]
    Timeout {
        operation: &'static str,
        after_ms: u64,
    },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Exchange rejected request ({code:?}): {message}")]
    Rejected { code: Option<i64>, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl GatewayError {
    pub fn rejected(code: i64, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Network, timeout and rate-limit failures.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout { .. } | Self::RateLimited(_)
        )
    }

    /// True when the exchange rejected a request only because the target
    /// state already holds, e.g. "No need to change position side."
    pub fn is_idempotent_noop(&self) -> bool {
        match self {
            Self::Rejected { message, .. } => {
                let message = message.to_lowercase();
                IDEMPOTENT_NOOP_PATTERNS
                    .iter()
                    .any(|pattern| message.contains(pattern))
            }
            _ => false,
        }
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
