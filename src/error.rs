//! Error types for the quota-gate service.

use thiserror::Error;

/// Main error type for quota-gate operations.
///
/// Admission decisions never produce errors; these only cover startup and
/// serving.
#[derive(Error, Debug)]
pub enum QuotaGateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for QuotaGateError {
    fn from(err: ::config::ConfigError) -> Self {
        QuotaGateError::Config(err.to_string())
    }
}

/// Result type alias for quota-gate operations.
pub type Result<T> = std::result::Result<T, QuotaGateError>;
