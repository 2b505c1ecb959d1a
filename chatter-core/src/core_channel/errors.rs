//! Error types for realtime subscriptions

use thiserror::Error;

/// Errors surfaced to a subscriber
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The subscriber fell behind the bounded buffer and was disconnected;
    /// it must resubscribe and take a fresh snapshot
    #[error("Subscription overflow: subscriber fell behind and was disconnected")]
    SubscriptionOverflow,

    /// The publishing side went away
    #[error("Subscription closed")]
    Closed,
}

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;
