//! Test fixtures for wiring a full engine over an in-memory store

use crate::core_channel::RealtimeChannel;
use crate::core_identity::{ConversationKey, ParticipantId};
use crate::core_log::MessageLog;
use crate::core_mirror::{MirrorEntry, MirrorError, MirrorResult, MirrorStore, SqlMirrorStore, UpsertOutcome};
use crate::core_sync::{Reconciler, ReconcilerConfig, RetryPolicy, SyncCoordinator};
use crate::providers::{MemoryDirectory, Profile};
use crate::storage::memory_pool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Mirror store wrapper that fails a configured number of upserts
///
/// Only upserts fail; reads and seeds pass through, matching the partial
/// failure the reconciler exists to repair.
pub struct FlakyMirrorStore {
    inner: Arc<dyn MirrorStore>,
    remaining_failures: AtomicUsize,
    failing_owner: RwLock<Option<ParticipantId>>,
}

impl FlakyMirrorStore {
    pub fn new(inner: Arc<dyn MirrorStore>) -> Self {
        FlakyMirrorStore {
            inner,
            remaining_failures: AtomicUsize::new(0),
            failing_owner: RwLock::new(None),
        }
    }

    /// Fail the next `n` upserts regardless of owner
    pub fn fail_next_upserts(&self, n: usize) {
        *self.failing_owner.write().expect("fixture lock poisoned") = None;
        self.remaining_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` upserts targeting `owner`
    pub fn fail_upserts_for(&self, owner: ParticipantId, n: usize) {
        *self.failing_owner.write().expect("fixture lock poisoned") = Some(owner);
        self.remaining_failures.store(n, Ordering::SeqCst);
    }

    fn should_fail(&self, owner: &ParticipantId) -> bool {
        if let Some(target) = self.failing_owner.read().expect("fixture lock poisoned").as_ref() {
            if target != owner {
                return false;
            }
        }

        self.remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl MirrorStore for FlakyMirrorStore {
    fn upsert(&self, owner: &ParticipantId, entry: &MirrorEntry) -> MirrorResult<UpsertOutcome> {
        if self.should_fail(owner) {
            return Err(MirrorError::StoreUnavailable("injected failure".to_string()));
        }
        self.inner.upsert(owner, entry)
    }

    fn seed(&self, owner: &ParticipantId, entry: &MirrorEntry) -> MirrorResult<bool> {
        self.inner.seed(owner, entry)
    }

    fn get(
        &self,
        owner: &ParticipantId,
        key: &ConversationKey,
    ) -> MirrorResult<Option<MirrorEntry>> {
        self.inner.get(owner, key)
    }

    fn list(&self, owner: &ParticipantId) -> MirrorResult<Vec<MirrorEntry>> {
        self.inner.list(owner)
    }

    fn refresh_display(
        &self,
        owner: &ParticipantId,
        key: &ConversationKey,
        display_name: &str,
        avatar_url: Option<&str>,
    ) -> MirrorResult<()> {
        self.inner.refresh_display(owner, key, display_name, avatar_url)
    }

    fn entries_referencing(
        &self,
        other: &ParticipantId,
    ) -> MirrorResult<Vec<(ParticipantId, ConversationKey)>> {
        self.inner.entries_referencing(other)
    }
}

/// A fully wired engine over an in-memory database
pub struct TestEngine {
    pub coordinator: SyncCoordinator,
    pub reconciler: Reconciler,
    pub log: Arc<MessageLog>,
    pub mirrors: Arc<FlakyMirrorStore>,
    pub channel: Arc<RealtimeChannel>,
    pub directory: Arc<MemoryDirectory>,
}

/// Builder for [`TestEngine`]
pub struct TestEngineBuilder {
    retry: RetryPolicy,
    buffer_capacity: usize,
    profiles: Vec<Profile>,
}

impl TestEngineBuilder {
    pub fn new() -> Self {
        TestEngineBuilder {
            // fast retries keep failure-injection tests quick
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
            },
            buffer_capacity: 256,
            profiles: vec![
                Profile::new("alice", "Alice").with_email("alice@example.com"),
                Profile::new("bob", "Bob").with_email("bob@example.com"),
            ],
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profiles.push(profile);
        self
    }

    pub fn build(self) -> TestEngine {
        let pool = memory_pool().expect("in-memory pool");
        let log = Arc::new(MessageLog::new(pool.clone()));
        let mirrors = Arc::new(FlakyMirrorStore::new(Arc::new(SqlMirrorStore::new(pool))));
        let channel = Arc::new(RealtimeChannel::new(self.buffer_capacity));

        let directory = Arc::new(MemoryDirectory::new());
        for profile in self.profiles {
            directory.register(profile);
        }

        let coordinator = SyncCoordinator::new(
            log.clone(),
            mirrors.clone(),
            channel.clone(),
            directory.clone(),
            self.retry,
        );

        let reconciler = Reconciler::new(
            log.clone(),
            mirrors.clone(),
            channel.clone(),
            directory.clone(),
            ReconcilerConfig { interval: Duration::from_millis(50) },
        );

        TestEngine { coordinator, reconciler, log, mirrors, channel, directory }
    }
}

impl Default for TestEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Standard test participants
pub fn alice() -> ParticipantId {
    ParticipantId::new("alice")
}

pub fn bob() -> ParticipantId {
    ParticipantId::new("bob")
}

/// Fresh client message id
pub fn client_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builder_wires_a_working_engine() {
        let engine = TestEngineBuilder::new().build();
        let key = engine.coordinator.open_conversation(&alice(), &bob()).await.unwrap();
        let receipt = engine
            .coordinator
            .send(&key, &alice(), &client_id(), "hi")
            .await
            .unwrap();
        assert!(!receipt.duplicate);
    }

    #[tokio::test]
    async fn test_flaky_store_fails_then_recovers() {
        let engine = TestEngineBuilder::new().build();
        let key = engine.coordinator.open_conversation(&alice(), &bob()).await.unwrap();

        engine.mirrors.fail_next_upserts(1);
        let entry = engine.mirrors.get(&alice(), &key).unwrap().unwrap();

        assert!(engine.mirrors.upsert(&alice(), &entry).is_err());
        assert!(engine.mirrors.upsert(&alice(), &entry).is_ok());
    }

    #[tokio::test]
    async fn test_flaky_store_owner_filter() {
        let engine = TestEngineBuilder::new().build();
        let key = engine.coordinator.open_conversation(&alice(), &bob()).await.unwrap();

        engine.mirrors.fail_upserts_for(bob(), 1);
        let alice_entry = engine.mirrors.get(&alice(), &key).unwrap().unwrap();
        let bob_entry = engine.mirrors.get(&bob(), &key).unwrap().unwrap();

        assert!(engine.mirrors.upsert(&alice(), &alice_entry).is_ok());
        assert!(engine.mirrors.upsert(&bob(), &bob_entry).is_err());
        assert!(engine.mirrors.upsert(&bob(), &bob_entry).is_ok());
    }
}
