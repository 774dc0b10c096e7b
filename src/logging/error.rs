//! Error types for the log pipeline

use crate::error::AppError;

/// Result type for log writers
pub type LoggingResult<T> = std::result::Result<T, LoggingError>;

/// Errors raised while building or driving log writers
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Writer misconfiguration, reported at startup
    #[error("Writer configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database-backed writer failures
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<LoggingError> for AppError {
    fn from(err: LoggingError) -> Self {
        match err {
            LoggingError::Configuration(msg) => AppError::Configuration(msg),
            LoggingError::Io(e) => AppError::Io(e),
            LoggingError::Serialization(e) => AppError::Serialization(e.to_string()),
            LoggingError::Storage(msg) => AppError::Database(msg),
        }
    }
}
