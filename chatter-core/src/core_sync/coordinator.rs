/*
    coordinator.rs - Per-send orchestration

    Drives the short-lived send state machine
    Identified -> Appended -> {MirroredSelf, MirroredOther} -> Done
    with no backward transitions.

    Appends within one conversation are serialized through a per-key lock
    so (server_ts, seq) is a true total order; the message event is
    published while that lock is still held, which keeps every
    subscriber's view identical to the append order. The two mirror
    upserts then run concurrently, each with its own bounded retries, and
    neither re-runs the append. A send whose mirrors exhaust retries
    resolves as delivery-delayed; the reconciliation pass owns
    convergence from there.
*/

use crate::core_channel::{MessageSubscription, MirrorSubscription, RealtimeChannel};
use crate::core_identity::{ConversationKey, ParticipantId};
use crate::core_log::{AppendOutcome, Cursor, LogError, Message, MessageLog};
use crate::core_mirror::{MirrorEntry, MirrorStore, UpsertOutcome};
use crate::core_sync::errors::SyncResult;
use crate::core_sync::retry::RetryPolicy;
use crate::providers::{IdentityProvider, Profile};
use metrics::{counter, histogram};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, warn};

/// States of the per-send protocol; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Identified,
    Appended,
    MirroredSelf,
    MirroredOther,
    Done,
}

/// Whether a send's summaries settled before the receipt was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Message durable and both mirrors current
    Delivered,

    /// Message durable but one or both conversation lists lag; the
    /// reconciliation pass will converge them
    DeliveryDelayed,
}

/// What the caller gets back from `send`
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// The stored message (the original one, on an idempotent replay)
    pub message: Message,

    /// True when this call was deduplicated against an earlier send
    pub duplicate: bool,

    pub delivery: DeliveryState,
}

/// Orchestrates sends, first contact, and subscriptions
///
/// This is the entire public surface consumed by the Presentation Layer:
/// `open_conversation`, `send`, `subscribe_messages`, `subscribe_mirrors`.
pub struct SyncCoordinator {
    log: Arc<MessageLog>,
    mirrors: Arc<dyn MirrorStore>,
    channel: Arc<RealtimeChannel>,
    identity: Arc<dyn IdentityProvider>,
    retry: RetryPolicy,

    /// Per-conversation append serialization points
    send_locks: Mutex<HashMap<ConversationKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl SyncCoordinator {
    pub fn new(
        log: Arc<MessageLog>,
        mirrors: Arc<dyn MirrorStore>,
        channel: Arc<RealtimeChannel>,
        identity: Arc<dyn IdentityProvider>,
        retry: RetryPolicy,
    ) -> Self {
        SyncCoordinator {
            log,
            mirrors,
            channel,
            identity,
            retry,
            send_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Derive the key for a pair and create the conversation if absent
    ///
    /// Both mirror entries are seeded with the counter-party's profile
    /// snapshot and an empty last message. Concurrent first contact from
    /// both sides produces exactly one conversation and identical seeds.
    pub async fn open_conversation(
        &self,
        me: &ParticipantId,
        other: &ParticipantId,
    ) -> SyncResult<ConversationKey> {
        let key = ConversationKey::derive(me, other)?;

        let created = self.log.create_conversation_if_absent(&key)?;
        let conversation = self.log.get_conversation(&key)?.ok_or_else(|| {
            LogError::StoreUnavailable("conversation missing right after create".to_string())
        })?;

        if created {
            debug!(key = %key, "Opened conversation");
        }

        for (owner, counterparty) in [(me, other), (other, me)] {
            let (display_name, avatar_url) = self.display_snapshot(counterparty).await;
            let entry = MirrorEntry::seed(key.clone(), counterparty.clone(), conversation.created_at)
                .with_display(display_name, avatar_url);

            match self.mirrors.seed(owner, &entry) {
                Ok(true) => self.channel.publish_mirror(owner, entry),
                Ok(false) => {}
                // seeding is best-effort; the reconciler re-seeds
                Err(e) => warn!(owner = %owner, key = %key, error = %e, "Mirror seed failed"),
            }
        }

        Ok(key)
    }

    /// Append a message and fan out both mirror updates
    pub async fn send(
        &self,
        key: &ConversationKey,
        sender: &ParticipantId,
        client_message_id: &str,
        text: &str,
    ) -> SyncResult<SendReceipt> {
        let started = Instant::now();

        // Identified: the sender must be one of the two encoded ids
        let other = key.split(sender)?;
        self.log.create_conversation_if_absent(key)?;
        debug!(key = %key, state = ?SendState::Identified, "Send identified");

        // Appended: serialize the append and publish under the same lock
        // so subscribers observe exactly the append order
        let lock = self.send_lock(key);
        let outcome = {
            let _guard = lock.lock().await;
            let outcome = self.log.append(key, sender, client_message_id, text)?;
            if let AppendOutcome::Fresh(message) = &outcome {
                self.log.touch_conversation(key, &message.text, message.server_ts)?;
                self.channel.publish_message(Arc::new(message.clone()));
                debug!(key = %key, cursor = %message.cursor(), state = ?SendState::Appended,
                    "Message appended");
            }
            outcome
        };

        counter!("chat.send.total").increment(1);

        let message = match outcome {
            AppendOutcome::Duplicate(message) => {
                // Idempotent replay: nothing is re-published, nothing is
                // re-mirrored; the original send (or the reconciler)
                // owns the summaries
                counter!("chat.send.duplicate").increment(1);
                return Ok(SendReceipt {
                    message,
                    duplicate: true,
                    delivery: DeliveryState::Delivered,
                });
            }
            AppendOutcome::Fresh(message) => message,
        };

        // MirroredSelf / MirroredOther: independent, concurrent, each
        // retried on its own; order between the two is unspecified
        let (self_ok, other_ok) = tokio::join!(
            self.mirror_one(sender, &other, &message, SendState::MirroredSelf),
            self.mirror_one(&other, sender, &message, SendState::MirroredOther),
        );

        let delivery = if self_ok && other_ok {
            debug!(key = %key, state = ?SendState::Done, "Send settled");
            DeliveryState::Delivered
        } else {
            counter!("chat.send.delayed").increment(1);
            warn!(key = %key, "Mirror updates lagging; reconciliation will converge");
            DeliveryState::DeliveryDelayed
        };

        histogram!("chat.send.duration_ms").record(started.elapsed().as_millis() as f64);

        Ok(SendReceipt { message, duplicate: false, delivery })
    }

    /// Snapshot-then-incremental stream of one conversation's messages
    pub async fn subscribe_messages(
        &self,
        key: &ConversationKey,
        since: Cursor,
    ) -> SyncResult<MessageSubscription> {
        if self.log.get_conversation(key)?.is_none() {
            return Err(LogError::ConversationNotFound(key.clone()).into());
        }

        // register before reading: anything published after this point is
        // either in the snapshot (already durable) or in the buffer
        let rx = self.channel.message_receiver(key);
        let snapshot = self.log.read_since(key, since)?;

        Ok(MessageSubscription::new(snapshot, rx, since))
    }

    /// Snapshot-then-incremental stream of a participant's mirror list
    pub async fn subscribe_mirrors(&self, owner: &ParticipantId) -> SyncResult<MirrorSubscription> {
        let rx = self.channel.mirror_receiver(owner);
        let snapshot = self.mirrors.list(owner)?;

        Ok(MirrorSubscription::new(snapshot, rx))
    }

    /// Consume a profile-change notification from the Identity Provider
    ///
    /// Refreshes the cached display fields of every mirror entry pointing
    /// at the changed participant. updated_at is untouched, so no
    /// conversation moves in any list.
    pub async fn apply_profile_change(&self, profile: &Profile) -> SyncResult<()> {
        for (owner, key) in self.mirrors.entries_referencing(&profile.id)? {
            self.mirrors.refresh_display(
                &owner,
                &key,
                &profile.display_name,
                profile.avatar_url.as_deref(),
            )?;
        }

        debug!(participant = %profile.id, "Refreshed cached display fields");
        Ok(())
    }

    /// One mirror upsert with bounded retries; true when it settled
    async fn mirror_one(
        &self,
        owner: &ParticipantId,
        counterparty: &ParticipantId,
        message: &Message,
        state: SendState,
    ) -> bool {
        let entry = self.build_entry(owner, counterparty, message).await;

        let result = self
            .retry
            .run("mirror upsert", || self.mirrors.upsert(owner, &entry))
            .await;

        match result {
            Ok(UpsertOutcome::Applied) => {
                debug!(owner = %owner, state = ?state, "Mirror updated");
                self.channel.publish_mirror(owner, entry);
                true
            }
            // a newer write already landed; converged by definition
            Ok(UpsertOutcome::Stale) => true,
            Err(e) => {
                warn!(owner = %owner, state = ?state, error = %e, "Mirror upsert exhausted retries");
                false
            }
        }
    }

    /// Assemble the owner's entry for the latest message, reusing the
    /// cached display snapshot when one exists
    async fn build_entry(
        &self,
        owner: &ParticipantId,
        counterparty: &ParticipantId,
        message: &Message,
    ) -> MirrorEntry {
        let (display_name, avatar_url) = match self.mirrors.get(owner, &message.conversation_key) {
            Ok(Some(existing)) if !existing.other_display_name.is_empty() => {
                (existing.other_display_name, existing.other_avatar_url)
            }
            _ => self.display_snapshot(counterparty).await,
        };

        MirrorEntry {
            conversation_key: message.conversation_key.clone(),
            other_id: counterparty.clone(),
            other_display_name: display_name,
            other_avatar_url: avatar_url,
            last_message_text: message.text.clone(),
            updated_at: message.server_ts,
        }
    }

    /// Best-effort profile fetch; a missing or unreachable provider
    /// leaves the display fields empty until a later refresh
    async fn display_snapshot(&self, id: &ParticipantId) -> (String, Option<String>) {
        match self.identity.lookup(id).await {
            Ok(Some(profile)) => (profile.display_name, profile.avatar_url),
            Ok(None) => (String::new(), None),
            Err(e) => {
                debug!(participant = %id, error = %e, "Profile lookup failed; display left stale");
                (String::new(), None)
            }
        }
    }

    fn send_lock(&self, key: &ConversationKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.send_locks.lock().expect("send lock map poisoned");
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    pub(crate) fn log(&self) -> &Arc<MessageLog> {
        &self.log
    }

    #[cfg(test)]
    pub(crate) fn mirrors(&self) -> &Arc<dyn MirrorStore> {
        &self.mirrors
    }
}
