/*
    core_channel - Realtime push subscriptions

    Snapshot-then-incremental delivery for conversation message streams
    and per-participant mirror lists. The registry is the only in-memory
    state shared across requests; everything else lives in the store.
*/

pub mod errors;
pub mod events;
pub mod registry;
pub mod subscription;

pub use errors::{ChannelError, ChannelResult};
pub use events::MirrorUpdate;
pub use registry::{RealtimeChannel, DEFAULT_BUFFER_CAPACITY};
pub use subscription::{MessageSubscription, MirrorSubscription};
