//! Error types for processor adapters

use thiserror::Error;

/// Result type for adapter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Adapter errors
#[derive(Error, Debug)]
pub enum Error {
    /// Circuit breaker open
    #[error("Circuit breaker open for processor {processor}: {reason}")]
    CircuitBreakerOpen {
        /// Processor name
        processor: String,
        /// Reason
        reason: String,
    },

    /// Timeout
    #[error("Timeout after {millis}ms: {operation}")]
    Timeout {
        /// Timeout duration
        millis: u64,
        /// Operation
        operation: String,
    },

    /// Processor API error
    #[error("Processor API error {status_code}: {message}")]
    ProcessorApi {
        /// HTTP-style status code
        status_code: u16,
        /// Error message
        message: String,
    },

    /// Record rejected on insert
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Convert into the engine's error for processor `name`
    pub fn into_engine(self, name: &str) -> trust_engine::Error {
        match self {
            Error::InvalidRecord(msg) => trust_engine::Error::InvalidRequest(msg),
            Error::Config(msg) => trust_engine::Error::PolicyMisconfiguration(msg),
            other => trust_engine::Error::AdapterUnavailable {
                processor: name.to_string(),
                reason: other.to_string(),
            },
        }
    }
}
