/*
    core_log - Ordered per-conversation message history

    Append-only log with a server-assigned total order per conversation
    and idempotent appends, plus the conversation rows themselves.
*/

pub mod errors;
pub mod log;
pub mod model;

pub use errors::{LogError, LogResult};
pub use log::{AppendOutcome, MessageLog};
pub use model::{Conversation, Cursor, Message, Timestamp};
