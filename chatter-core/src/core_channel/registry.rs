/*
    registry.rs - Process-local subscription registry

    One broadcast topic per conversation (message stream) and one per
    participant (mirror list). Topics are created on first subscribe and
    pruned once their last receiver goes away. Publishing never blocks:
    a subscriber that cannot keep up with the bounded buffer is lagged
    out by the broadcast channel and surfaces SubscriptionOverflow.
*/

use crate::core_channel::events::MirrorUpdate;
use crate::core_identity::{ConversationKey, ParticipantId};
use crate::core_log::Message;
use crate::core_mirror::MirrorEntry;
use metrics::counter;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::trace;

/// Default per-subscription buffer capacity
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

/// Push-subscription hub for message and mirror events
pub struct RealtimeChannel {
    /// Bounded buffer size for every topic
    capacity: usize,

    message_topics: RwLock<HashMap<ConversationKey, broadcast::Sender<Arc<Message>>>>,
    mirror_topics: RwLock<HashMap<ParticipantId, broadcast::Sender<MirrorUpdate>>>,
}

impl RealtimeChannel {
    pub fn new(capacity: usize) -> Self {
        RealtimeChannel {
            capacity,
            message_topics: RwLock::new(HashMap::new()),
            mirror_topics: RwLock::new(HashMap::new()),
        }
    }

    /// Receiver for a conversation's incremental message events
    pub fn message_receiver(&self, key: &ConversationKey) -> broadcast::Receiver<Arc<Message>> {
        let mut topics = self.message_topics.write().expect("registry lock poisoned");
        topics
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Receiver for a participant's incremental mirror events
    pub fn mirror_receiver(&self, owner: &ParticipantId) -> broadcast::Receiver<MirrorUpdate> {
        let mut topics = self.mirror_topics.write().expect("registry lock poisoned");
        topics
            .entry(owner.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Push a freshly appended message to conversation subscribers
    pub fn publish_message(&self, message: Arc<Message>) {
        let key = message.conversation_key.clone();
        let delivered = {
            let topics = self.message_topics.read().expect("registry lock poisoned");
            match topics.get(&key) {
                Some(tx) => tx.send(message).is_ok(),
                None => return,
            }
        };

        counter!("chat.channel.messages.published").increment(1);
        if !delivered {
            self.prune_message_topic(&key);
        }
    }

    /// Push an applied mirror upsert to the owner's list subscribers
    pub fn publish_mirror(&self, owner: &ParticipantId, entry: MirrorEntry) {
        let delivered = {
            let topics = self.mirror_topics.read().expect("registry lock poisoned");
            match topics.get(owner) {
                Some(tx) => tx.send(MirrorUpdate { owner: owner.clone(), entry }).is_ok(),
                None => return,
            }
        };

        counter!("chat.channel.mirrors.published").increment(1);
        if !delivered {
            self.prune_mirror_topic(owner);
        }
    }

    /// Number of live message subscribers for a conversation
    pub fn message_subscriber_count(&self, key: &ConversationKey) -> usize {
        let topics = self.message_topics.read().expect("registry lock poisoned");
        topics.get(key).map(|tx| tx.receiver_count()).unwrap_or(0)
    }

    /// Number of live mirror subscribers for a participant
    pub fn mirror_subscriber_count(&self, owner: &ParticipantId) -> usize {
        let topics = self.mirror_topics.read().expect("registry lock poisoned");
        topics.get(owner).map(|tx| tx.receiver_count()).unwrap_or(0)
    }

    fn prune_message_topic(&self, key: &ConversationKey) {
        let mut topics = self.message_topics.write().expect("registry lock poisoned");
        if topics.get(key).map(|tx| tx.receiver_count()) == Some(0) {
            topics.remove(key);
            trace!(key = %key, "Pruned idle message topic");
        }
    }

    fn prune_mirror_topic(&self, owner: &ParticipantId) {
        let mut topics = self.mirror_topics.write().expect("registry lock poisoned");
        if topics.get(owner).map(|tx| tx.receiver_count()) == Some(0) {
            topics.remove(owner);
            trace!(owner = %owner, "Pruned idle mirror topic");
        }
    }
}

impl Default for RealtimeChannel {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}
