/*
    reconcile.rs - Background mirror reconciliation

    Periodic pass that guarantees eventual convergence of the two mirror
    entries of every conversation. A send that exhausted its mirror
    retries leaves a summary behind the log; each round compares every
    entry's updated_at against the conversation's latest message and
    re-upserts whatever is stale or missing.

    Last-writer-wins makes the pass idempotent: repairing an entry that a
    concurrent send already fixed is a no-op.
*/

use crate::core_channel::RealtimeChannel;
use crate::core_identity::ParticipantId;
use crate::core_log::{Conversation, Message, MessageLog};
use crate::core_mirror::{MirrorEntry, MirrorStore, UpsertOutcome};
use crate::core_sync::errors::SyncResult;
use crate::providers::IdentityProvider;
use crate::shutdown::ShutdownCoordinator;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for the reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// How often to run a round
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        ReconcilerConfig { interval: Duration::from_secs(30) }
    }
}

/// What one round did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilerStats {
    pub conversations_scanned: usize,
    pub mirrors_repaired: usize,
    pub failures: usize,
}

/// Background convergence pass over all conversations
pub struct Reconciler {
    log: Arc<MessageLog>,
    mirrors: Arc<dyn MirrorStore>,
    channel: Arc<RealtimeChannel>,
    identity: Arc<dyn IdentityProvider>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        log: Arc<MessageLog>,
        mirrors: Arc<dyn MirrorStore>,
        channel: Arc<RealtimeChannel>,
        identity: Arc<dyn IdentityProvider>,
        config: ReconcilerConfig,
    ) -> Self {
        Reconciler { log, mirrors, channel, identity, config }
    }

    /// Loop rounds on the configured interval until shutdown
    pub async fn run(&self, shutdown: &ShutdownCoordinator) {
        let mut shutdown_rx = shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval_s = self.config.interval.as_secs(), "Reconciler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(stats) if stats.mirrors_repaired > 0 || stats.failures > 0 => {
                            info!(
                                scanned = stats.conversations_scanned,
                                repaired = stats.mirrors_repaired,
                                failures = stats.failures,
                                "Reconciliation round complete"
                            );
                        }
                        Ok(stats) => {
                            debug!(scanned = stats.conversations_scanned, "Reconciliation round clean");
                        }
                        Err(e) => warn!(error = %e, "Reconciliation round failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Reconciler stopping");
                    break;
                }
            }
        }
    }

    /// One full pass; directly testable
    pub async fn run_once(&self) -> SyncResult<ReconcilerStats> {
        let mut stats = ReconcilerStats::default();
        counter!("chat.reconcile.rounds").increment(1);

        for conversation in self.log.list_conversations()? {
            stats.conversations_scanned += 1;

            match self.log.latest(&conversation.key)? {
                Some(latest) => self.reconcile_conversation(&conversation, &latest, &mut stats).await,
                // opened but never messaged: make sure both seeds exist
                None => self.reseed_conversation(&conversation, &mut stats).await,
            }
        }

        counter!("chat.reconcile.repaired").increment(stats.mirrors_repaired as u64);
        Ok(stats)
    }

    async fn reconcile_conversation(
        &self,
        conversation: &Conversation,
        latest: &Message,
        stats: &mut ReconcilerStats,
    ) {
        let (lo, hi) = conversation.participants();

        for (owner, counterparty) in [(lo, hi), (hi, lo)] {
            let existing = match self.mirrors.get(owner, &conversation.key) {
                Ok(existing) => existing,
                Err(e) => {
                    stats.failures += 1;
                    warn!(owner = %owner, key = %conversation.key, error = %e,
                        "Reconciler could not read mirror entry");
                    continue;
                }
            };

            if existing.as_ref().is_some_and(|e| e.updated_at >= latest.server_ts) {
                continue;
            }

            let (display_name, avatar_url) = match existing {
                Some(e) if !e.other_display_name.is_empty() => {
                    (e.other_display_name, e.other_avatar_url)
                }
                _ => self.display_snapshot(counterparty).await,
            };

            let entry = MirrorEntry {
                conversation_key: conversation.key.clone(),
                other_id: counterparty.clone(),
                other_display_name: display_name,
                other_avatar_url: avatar_url,
                last_message_text: latest.text.clone(),
                updated_at: latest.server_ts,
            };

            match self.mirrors.upsert(owner, &entry) {
                Ok(UpsertOutcome::Applied) => {
                    stats.mirrors_repaired += 1;
                    debug!(owner = %owner, key = %conversation.key, "Repaired stale mirror");
                    self.channel.publish_mirror(owner, entry);
                }
                Ok(UpsertOutcome::Stale) => {}
                Err(e) => {
                    stats.failures += 1;
                    warn!(owner = %owner, key = %conversation.key, error = %e,
                        "Reconciler upsert failed; next round retries");
                }
            }
        }
    }

    async fn reseed_conversation(&self, conversation: &Conversation, stats: &mut ReconcilerStats) {
        let (lo, hi) = conversation.participants();

        for (owner, counterparty) in [(lo, hi), (hi, lo)] {
            let missing = match self.mirrors.get(owner, &conversation.key) {
                Ok(existing) => existing.is_none(),
                Err(e) => {
                    stats.failures += 1;
                    warn!(owner = %owner, key = %conversation.key, error = %e,
                        "Reconciler could not read mirror entry");
                    continue;
                }
            };
            if !missing {
                continue;
            }

            let (display_name, avatar_url) = self.display_snapshot(counterparty).await;
            let entry =
                MirrorEntry::seed(conversation.key.clone(), counterparty.clone(), conversation.created_at)
                    .with_display(display_name, avatar_url);

            match self.mirrors.seed(owner, &entry) {
                Ok(true) => {
                    stats.mirrors_repaired += 1;
                    self.channel.publish_mirror(owner, entry);
                }
                Ok(false) => {}
                Err(e) => {
                    stats.failures += 1;
                    warn!(owner = %owner, key = %conversation.key, error = %e,
                        "Reconciler seed failed; next round retries");
                }
            }
        }
    }

    async fn display_snapshot(&self, id: &ParticipantId) -> (String, Option<String>) {
        match self.identity.lookup(id).await {
            Ok(Some(profile)) => (profile.display_name, profile.avatar_url),
            _ => (String::new(), None),
        }
    }
}
