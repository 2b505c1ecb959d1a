/*
    model.rs - Per-participant conversation summary

    One MirrorEntry per (owner, conversation): the denormalized record
    backing the owner's conversation list. Two entries exist per
    conversation and converge to the same last_message_text/updated_at
    once a send settles; the display fields are a cached snapshot of the
    counter-party's profile and may go stale between refreshes.
*/

use crate::core_identity::{ConversationKey, ParticipantId};
use crate::core_log::Timestamp;
use serde::{Deserialize, Serialize};

/// Denormalized conversation summary owned by one participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorEntry {
    /// Conversation this entry summarizes
    pub conversation_key: ConversationKey,

    /// The counter-party from the owner's point of view
    pub other_id: ParticipantId,

    /// Cached display snapshot of the counter-party
    pub other_display_name: String,
    pub other_avatar_url: Option<String>,

    /// Text of the newest message the owner's list should show
    pub last_message_text: String,

    /// Last-writer-wins ordering field; also the list sort key
    pub updated_at: Timestamp,
}

impl MirrorEntry {
    /// Entry for a conversation with no messages yet (first contact seed)
    pub fn seed(
        conversation_key: ConversationKey,
        other_id: ParticipantId,
        created_at: Timestamp,
    ) -> Self {
        MirrorEntry {
            conversation_key,
            other_id,
            other_display_name: String::new(),
            other_avatar_url: None,
            last_message_text: String::new(),
            updated_at: created_at,
        }
    }

    pub fn with_display(mut self, name: impl Into<String>, avatar: Option<String>) -> Self {
        self.other_display_name = name.into();
        self.other_avatar_url = avatar;
        self
    }
}
