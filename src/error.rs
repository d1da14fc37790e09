//! Error types for windowlimit.

use thiserror::Error;

/// Main error type for windowlimit operations.
///
/// Admission decisions themselves never fail; these cover the layers around
/// the limiter.
#[derive(Error, Debug)]
pub enum WindowLimitError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The limiter worker task has stopped and no longer accepts commands
    #[error("Limiter worker is no longer running")]
    WorkerClosed,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for WindowLimitError {
    fn from(err: ::config::ConfigError) -> Self {
        WindowLimitError::Config(err.to_string())
    }
}

/// Result type alias for windowlimit operations.
pub type Result<T> = std::result::Result<T, WindowLimitError>;
