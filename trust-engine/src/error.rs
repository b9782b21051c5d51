//! Error types for the trust engine

use thiserror::Error;

/// Trust engine error
#[derive(Debug, Error)]
pub enum Error {
    /// A signal source could not answer; degrades the sub-score to neutral
    #[error("Signal unavailable ({source_name}): {reason}")]
    SignalUnavailable {
        /// Collector or source name
        source_name: String,
        /// Why the data is missing
        reason: String,
    },

    /// A processor adapter could not answer a lookup
    #[error("Processor adapter unavailable ({processor}): {reason}")]
    AdapterUnavailable {
        /// Adapter name
        processor: String,
        /// Why the lookup failed
        reason: String,
    },

    /// Policy cannot be applied to this request (unknown currency, bad rule set)
    #[error("Policy misconfiguration: {0}")]
    PolicyMisconfiguration(String),

    /// Backing store or cache unreachable; aborts the request
    #[error("Infrastructure failure: {0}")]
    Infrastructure(String),

    /// Request failed validation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(uuid::Uuid),

    /// Illegal lifecycle transition
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failure must abort the whole request (fail-safe path)
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Error::Infrastructure(_))
    }

    /// Shorthand for a degraded signal source
    pub fn unavailable(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::SignalUnavailable {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
