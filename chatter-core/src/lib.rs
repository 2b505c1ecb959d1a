/*
    chatter-core - Two-party chat synchronization engine

    Canonical conversation identity, strictly ordered message delivery,
    and per-participant conversation summaries kept eventually consistent
    across both sides of every conversation.

    Layers, leaves first:
    - core_identity: symmetric conversation keys
    - core_log:      append-only ordered message history
    - core_mirror:   denormalized list-view summaries (last-writer-wins)
    - core_sync:     send orchestration, retries, reconciliation
    - core_channel:  snapshot-then-incremental push subscriptions

    The Identity Provider, Directory Service, and Presentation Layer are
    external collaborators; `providers` holds the consumed interfaces and
    `SyncCoordinator` is the entire produced surface.
*/

pub mod config;
pub mod core_channel;
pub mod core_identity;
pub mod core_log;
pub mod core_mirror;
pub mod core_sync;
pub mod logging;
pub mod metrics;
pub mod providers;
pub mod shutdown;
pub mod storage;
pub mod test_utils;

// Re-export commonly used types
pub use config::Config;
pub use core_channel::{ChannelError, MessageSubscription, MirrorSubscription, RealtimeChannel};
pub use core_identity::{ConversationKey, IdentityError, ParticipantId};
pub use core_log::{Conversation, Cursor, LogError, Message, MessageLog, Timestamp};
pub use core_mirror::{MirrorEntry, MirrorError, MirrorStore, SqlMirrorStore};
pub use core_sync::{
    DeliveryState, Reconciler, ReconcilerConfig, RetryPolicy, SendReceipt, SyncCoordinator,
    SyncError,
};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogLevel};
pub use providers::{Credentials, DirectoryService, IdentityProvider, MemoryDirectory, Profile};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        // Ensure the main exports are accessible
        let _ = LogLevel::Info;
        let _ = Cursor::ZERO;
    }
}
