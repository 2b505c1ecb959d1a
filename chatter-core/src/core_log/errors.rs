//! Error types for the message log

use crate::core_identity::ConversationKey;
use thiserror::Error;

/// Errors that can occur appending to or reading the message log
#[derive(Debug, Error)]
pub enum LogError {
    /// Message text is blank after trimming
    #[error("Empty message")]
    EmptyMessage,

    /// Conversation row has not been created yet
    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationKey),

    /// The durable store cannot be reached; transient, safe to retry
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Result type for log operations
pub type LogResult<T> = Result<T, LogError>;

impl LogError {
    /// Whether a retry with backoff may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, LogError::StoreUnavailable(_))
    }
}

impl From<rusqlite::Error> for LogError {
    fn from(err: rusqlite::Error) -> Self {
        LogError::StoreUnavailable(err.to_string())
    }
}

impl From<r2d2::Error> for LogError {
    fn from(err: r2d2::Error) -> Self {
        LogError::StoreUnavailable(err.to_string())
    }
}
