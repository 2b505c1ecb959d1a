/*
    model.rs - Message and conversation records

    A Message is immutable once appended. Its position in the conversation
    is (server_ts, seq): server_ts comes from the log's per-conversation
    monotonic clock, seq is the insertion sequence used as tie-break.
*/

use crate::core_identity::{ConversationKey, ParticipantId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unix timestamp in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create a timestamp representing the current time
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("System clock is before UNIX epoch");
        Timestamp(duration.as_millis() as u64)
    }

    /// Create a timestamp from milliseconds since epoch
    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    /// Get milliseconds since epoch
    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position in a conversation's message stream
///
/// Field order gives the lexicographic ordering the log reads by:
/// server timestamp first, insertion sequence as tie-break.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Cursor {
    pub server_ts: u64,
    pub seq: u64,
}

impl Cursor {
    /// Cursor before the first message; reads everything
    pub const ZERO: Cursor = Cursor { server_ts: 0, seq: 0 };

    pub fn new(server_ts: u64, seq: u64) -> Self {
        Cursor { server_ts, seq }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.server_ts, self.seq)
    }
}

/// A single message in a conversation, immutable once appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Conversation this message belongs to
    pub conversation_key: ConversationKey,

    /// Participant who sent it
    pub sender_id: ParticipantId,

    /// Message body, trimmed at append time
    pub text: String,

    /// Server-assigned timestamp (per-conversation monotonic clock)
    pub server_ts: Timestamp,

    /// Insertion sequence within the conversation, tie-break for server_ts
    pub seq: u64,

    /// Caller-supplied id used for idempotent retry deduplication
    pub client_message_id: String,
}

impl Message {
    /// This message's position in the conversation stream
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.server_ts.as_millis(), self.seq)
    }
}

/// Conversation record, created lazily on first contact and never deleted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Canonical symmetric key; the sole identifier
    pub key: ConversationKey,

    /// Participant pair in canonical order
    pub participant_lo: ParticipantId,
    pub participant_hi: ParticipantId,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,

    /// Text of the newest message, empty until the first send settles
    pub last_message_text: String,
}

impl Conversation {
    /// Both participants, canonical order
    pub fn participants(&self) -> (&ParticipantId, &ParticipantId) {
        (&self.participant_lo, &self.participant_hi)
    }
}
