//! Error types shared across the engine
//!
//! Most plumbing returns `anyhow::Result`. The types here exist where a
//! caller has to branch on what went wrong: a message source failure that is
//! worth retrying next cycle versus one that is not, and the classification
//! used at the cycle and request boundary.

use thiserror::Error;

/// Failure talking to the message provider
#[derive(Debug, Error)]
pub enum SourceError {
    /// Provider unreachable, rate-limited, or a 5xx. Retry next cycle.
    #[error("Transient provider error during {operation}: {message}")]
    Transient { operation: String, message: String },

    /// The provider rejected the request or returned something unusable
    #[error("Provider error during {operation}: {message}")]
    Rejected { operation: String, message: String },
}

impl SourceError {
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Errors surfaced at the cycle or request boundary
#[derive(Debug, Error)]
pub enum NurtureError {
    #[error("Transient error: {message}")]
    Transient { message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Nurturing loop is not running")]
    NotRunning,
}

impl NurtureError {
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence {
            message: format!("{:#}", err),
        }
    }

    pub fn config(err: impl std::fmt::Display) -> Self {
        Self::Config {
            message: format!("{:#}", err),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

impl From<SourceError> for NurtureError {
    fn from(e: SourceError) -> Self {
        NurtureError::Transient {
            message: e.to_string(),
        }
    }
}
