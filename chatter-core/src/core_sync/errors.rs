//! Error types for the sync coordinator

use crate::core_channel::ChannelError;
use crate::core_identity::IdentityError;
use crate::core_log::LogError;
use crate::core_mirror::MirrorError;
use thiserror::Error;

/// Umbrella error for coordinator operations
///
/// Only the identity variants and `EmptyMessage` are user-correctable;
/// transient store failures are retried internally and never surface
/// from `send` (a send whose mirrors lag resolves as delivery-delayed,
/// not as an error).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Result type for coordinator operations
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        let err: SyncError = IdentityError::InvalidParticipant("x".to_string()).into();
        assert!(matches!(err, SyncError::Identity(_)));

        let err: SyncError = LogError::EmptyMessage.into();
        assert!(matches!(err, SyncError::Log(LogError::EmptyMessage)));

        let err: SyncError = MirrorError::StoreUnavailable("down".to_string()).into();
        assert!(matches!(err, SyncError::Mirror(_)));

        let err: SyncError = ChannelError::SubscriptionOverflow.into();
        assert!(matches!(err, SyncError::Channel(_)));
    }
}
