/*
    subscription.rs - Snapshot-then-incremental subscriptions

    A subscriber first takes the full current state (message tail or
    mirror list), then consumes strictly ordered increments. Events at or
    below the snapshot boundary are filtered out, so the handoff between
    snapshot and stream has no duplicates and no gaps: anything published
    before the snapshot read was already durable and therefore inside it.

    Reconnection after an overflow re-snapshots instead of replaying the
    incremental log.
*/

use crate::core_channel::errors::{ChannelError, ChannelResult};
use crate::core_channel::events::MirrorUpdate;
use crate::core_identity::ConversationKey;
use crate::core_log::{Cursor, Message, Timestamp};
use crate::core_mirror::MirrorEntry;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// Live stream of one conversation's messages
#[derive(Debug)]
pub struct MessageSubscription {
    snapshot: Vec<Message>,
    rx: broadcast::Receiver<Arc<Message>>,

    /// Highest cursor already covered by the snapshot (or the caller's
    /// starting cursor); incremental events at or below it are dropped
    floor: Cursor,
}

impl MessageSubscription {
    pub(crate) fn new(
        snapshot: Vec<Message>,
        rx: broadcast::Receiver<Arc<Message>>,
        since: Cursor,
    ) -> Self {
        let floor = snapshot.last().map(Message::cursor).unwrap_or(since);
        MessageSubscription { snapshot, rx, floor }
    }

    /// The full current tail, ordered ascending; delivered once
    pub fn snapshot(&self) -> &[Message] {
        &self.snapshot
    }

    /// Consume the snapshot, leaving the incremental stream
    pub fn take_snapshot(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.snapshot)
    }

    /// Next incremental message, in (server_ts, seq) order
    ///
    /// Returns `SubscriptionOverflow` when this subscriber lagged past
    /// the bounded buffer; the subscription is dead at that point and the
    /// caller must resubscribe for a fresh snapshot.
    pub async fn next(&mut self) -> ChannelResult<Message> {
        loop {
            match self.rx.recv().await {
                Ok(message) => {
                    let cursor = message.cursor();
                    if cursor <= self.floor {
                        continue;
                    }
                    self.floor = cursor;
                    return Ok((*message).clone());
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    counter!("chat.channel.overflow").increment(1);
                    warn!(skipped, "Subscriber fell behind; disconnecting");
                    return Err(ChannelError::SubscriptionOverflow);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(ChannelError::Closed);
                }
            }
        }
    }
}

/// Live stream of one participant's mirror list
pub struct MirrorSubscription {
    snapshot: Vec<MirrorEntry>,
    rx: broadcast::Receiver<MirrorUpdate>,

    /// Per-conversation floor: last updated_at already delivered (from
    /// the snapshot or a previous increment); older echoes are dropped
    floors: HashMap<ConversationKey, Timestamp>,
}

impl MirrorSubscription {
    pub(crate) fn new(snapshot: Vec<MirrorEntry>, rx: broadcast::Receiver<MirrorUpdate>) -> Self {
        let floors = snapshot
            .iter()
            .map(|e| (e.conversation_key.clone(), e.updated_at))
            .collect();
        MirrorSubscription { snapshot, rx, floors }
    }

    /// The full current list, updated_at descending; delivered once
    pub fn snapshot(&self) -> &[MirrorEntry] {
        &self.snapshot
    }

    /// Consume the snapshot, leaving the incremental stream
    pub fn take_snapshot(&mut self) -> Vec<MirrorEntry> {
        std::mem::take(&mut self.snapshot)
    }

    /// Next mirror entry update
    ///
    /// Per conversation, updates arrive in non-decreasing updated_at
    /// order. Strictly older echoes are dropped; an update carrying the
    /// same updated_at passes, mirroring the store's last-writer-wins
    /// rule where equal timestamps apply.
    pub async fn next(&mut self) -> ChannelResult<MirrorEntry> {
        loop {
            match self.rx.recv().await {
                Ok(update) => {
                    let key = update.entry.conversation_key.clone();
                    if let Some(floor) = self.floors.get(&key) {
                        if update.entry.updated_at < *floor {
                            continue;
                        }
                    }
                    self.floors.insert(key, update.entry.updated_at);
                    return Ok(update.entry);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    counter!("chat.channel.overflow").increment(1);
                    warn!(skipped, "Mirror subscriber fell behind; disconnecting");
                    return Err(ChannelError::SubscriptionOverflow);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(ChannelError::Closed);
                }
            }
        }
    }
}
