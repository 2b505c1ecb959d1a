//! Error types for the mirror store

use thiserror::Error;

/// Errors that can occur upserting or reading mirror entries
#[derive(Debug, Error)]
pub enum MirrorError {
    /// The durable store cannot be reached; transient, safe to retry
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Result type for mirror operations
pub type MirrorResult<T> = Result<T, MirrorError>;

impl MirrorError {
    /// Whether a retry with backoff may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, MirrorError::StoreUnavailable(_))
    }
}

impl From<rusqlite::Error> for MirrorError {
    fn from(err: rusqlite::Error) -> Self {
        MirrorError::StoreUnavailable(err.to_string())
    }
}

impl From<r2d2::Error> for MirrorError {
    fn from(err: r2d2::Error) -> Self {
        MirrorError::StoreUnavailable(err.to_string())
    }
}
