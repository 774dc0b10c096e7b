//! Error types for messaging operations

use crate::error::AppError;

/// Result type for messaging operations
pub type MessagingResult<T> = std::result::Result<T, MessagingError>;

/// Errors that can occur during messaging operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessagingError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection did not become ready before the deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// No live transport is available
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Exchange or queue declaration failed
    #[error("Declare failed: {0}")]
    DeclareFailed(String),

    /// Queue binding failed
    #[error("Bind failed: {0}")]
    BindFailed(String),

    /// Publish failed
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Subscribe failed
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Connection state machine rejected a transition
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        MessagingError::SerializationError(err.to_string())
    }
}

impl From<lapin::Error> for MessagingError {
    fn from(err: lapin::Error) -> Self {
        MessagingError::ConnectionFailed(err.to_string())
    }
}

impl From<MessagingError> for AppError {
    fn from(err: MessagingError) -> Self {
        match err {
            MessagingError::ConfigurationError(msg) => AppError::Configuration(msg),
            MessagingError::Timeout(msg) => AppError::Timeout(msg),
            MessagingError::InvalidTransition(msg) => AppError::InvalidStateTransition(msg),
            MessagingError::ConnectionFailed(msg) | MessagingError::NotConnected(msg) => {
                AppError::Broker(msg)
            }
            _ => AppError::Internal(err.to_string()),
        }
    }
}
