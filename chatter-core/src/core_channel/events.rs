//! Incremental events carried by the realtime channel

use crate::core_identity::ParticipantId;
use crate::core_mirror::MirrorEntry;
use serde::{Deserialize, Serialize};

/// A mirror entry update for one owner's conversation list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorUpdate {
    /// Participant whose list changed
    pub owner: ParticipantId,

    /// The new state of the entry
    pub entry: MirrorEntry,
}
