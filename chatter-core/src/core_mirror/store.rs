/*
    store.rs - Last-writer-wins mirror storage

    Upserts are merged on (owner_id, conversation_key) with updated_at as
    the conflict resolver: a write carrying an older updated_at than the
    stored row is a no-op, so out-of-order retries can never regress a
    summary. Reads back the owner's conversation list, newest first.
*/

use crate::core_identity::{ConversationKey, ParticipantId};
use crate::core_log::Timestamp;
use crate::core_mirror::errors::{MirrorError, MirrorResult};
use crate::core_mirror::model::MirrorEntry;
use crate::storage::DbPool;
use metrics::counter;
use rusqlite::{params, OptionalExtension};

/// Result of a last-writer-wins upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The entry was inserted or replaced the stored row
    Applied,

    /// The stored row carried a newer updated_at; nothing changed
    Stale,
}

/// Storage seam for per-participant conversation summaries
///
/// The coordinator and the reconciler only depend on this trait, which
/// keeps failure injection out of the production store.
pub trait MirrorStore: Send + Sync {
    /// Last-writer-wins merge keyed by (owner, conversation_key)
    fn upsert(&self, owner: &ParticipantId, entry: &MirrorEntry) -> MirrorResult<UpsertOutcome>;

    /// Insert only if no entry exists yet; returns whether it was inserted
    ///
    /// First-contact seeding must never overwrite a summary written by a
    /// racing send, so it bypasses last-writer-wins entirely.
    fn seed(&self, owner: &ParticipantId, entry: &MirrorEntry) -> MirrorResult<bool>;

    /// One entry, if present
    fn get(
        &self,
        owner: &ParticipantId,
        key: &ConversationKey,
    ) -> MirrorResult<Option<MirrorEntry>>;

    /// The owner's conversation list, updated_at descending
    fn list(&self, owner: &ParticipantId) -> MirrorResult<Vec<MirrorEntry>>;

    /// Update the cached display snapshot without touching updated_at
    ///
    /// Profile edits must never move a conversation in the list.
    fn refresh_display(
        &self,
        owner: &ParticipantId,
        key: &ConversationKey,
        display_name: &str,
        avatar_url: Option<&str>,
    ) -> MirrorResult<()>;

    /// Every (owner, conversation) whose entry points at `other`
    ///
    /// Feeds the lazy display refresh when that participant's profile
    /// changes.
    fn entries_referencing(
        &self,
        other: &ParticipantId,
    ) -> MirrorResult<Vec<(ParticipantId, ConversationKey)>>;
}

/// SQLite-backed mirror store over the shared pool
pub struct SqlMirrorStore {
    pool: DbPool,
}

impl SqlMirrorStore {
    pub fn new(pool: DbPool) -> Self {
        SqlMirrorStore { pool }
    }

    fn row_to_entry(row: &rusqlite::Row<'_>) -> Result<MirrorEntry, rusqlite::Error> {
        let raw_key: String = row.get(0)?;
        Ok(MirrorEntry {
            conversation_key: ConversationKey::parse(&raw_key).map_err(|_| {
                rusqlite::Error::InvalidColumnType(
                    0,
                    "conversation_key".to_string(),
                    rusqlite::types::Type::Text,
                )
            })?,
            other_id: ParticipantId::new(row.get::<_, String>(1)?),
            other_display_name: row.get(2)?,
            other_avatar_url: row.get(3)?,
            last_message_text: row.get(4)?,
            updated_at: Timestamp::from_millis(row.get::<_, i64>(5)?.max(0) as u64),
        })
    }
}

impl MirrorStore for SqlMirrorStore {
    fn upsert(&self, owner: &ParticipantId, entry: &MirrorEntry) -> MirrorResult<UpsertOutcome> {
        let conn = self.pool.get()?;

        let changed = conn.execute(
            "INSERT INTO mirror_entries
                 (owner_id, conversation_key, other_id, other_display_name,
                  other_avatar_url, last_message_text, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(owner_id, conversation_key) DO UPDATE SET
                 other_id = excluded.other_id,
                 other_display_name = excluded.other_display_name,
                 other_avatar_url = excluded.other_avatar_url,
                 last_message_text = excluded.last_message_text,
                 updated_at = excluded.updated_at
             WHERE excluded.updated_at >= mirror_entries.updated_at",
            params![
                owner.as_str(),
                entry.conversation_key.as_str(),
                entry.other_id.as_str(),
                entry.other_display_name,
                entry.other_avatar_url,
                entry.last_message_text,
                entry.updated_at.as_millis() as i64,
            ],
        )?;

        if changed > 0 {
            counter!("chat.mirror.upsert.applied").increment(1);
            Ok(UpsertOutcome::Applied)
        } else {
            counter!("chat.mirror.upsert.stale").increment(1);
            Ok(UpsertOutcome::Stale)
        }
    }

    fn seed(&self, owner: &ParticipantId, entry: &MirrorEntry) -> MirrorResult<bool> {
        let conn = self.pool.get()?;

        let inserted = conn.execute(
            "INSERT INTO mirror_entries
                 (owner_id, conversation_key, other_id, other_display_name,
                  other_avatar_url, last_message_text, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(owner_id, conversation_key) DO NOTHING",
            params![
                owner.as_str(),
                entry.conversation_key.as_str(),
                entry.other_id.as_str(),
                entry.other_display_name,
                entry.other_avatar_url,
                entry.last_message_text,
                entry.updated_at.as_millis() as i64,
            ],
        )?;

        Ok(inserted > 0)
    }

    fn get(
        &self,
        owner: &ParticipantId,
        key: &ConversationKey,
    ) -> MirrorResult<Option<MirrorEntry>> {
        let conn = self.pool.get()?;

        conn.query_row(
            "SELECT conversation_key, other_id, other_display_name, other_avatar_url,
                    last_message_text, updated_at
             FROM mirror_entries WHERE owner_id = ? AND conversation_key = ?",
            params![owner.as_str(), key.as_str()],
            Self::row_to_entry,
        )
        .optional()
        .map_err(MirrorError::from)
    }

    fn list(&self, owner: &ParticipantId) -> MirrorResult<Vec<MirrorEntry>> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(
            "SELECT conversation_key, other_id, other_display_name, other_avatar_url,
                    last_message_text, updated_at
             FROM mirror_entries WHERE owner_id = ?
             ORDER BY updated_at DESC, conversation_key ASC",
        )?;

        let rows = stmt.query_map(params![owner.as_str()], Self::row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }

        Ok(entries)
    }

    fn refresh_display(
        &self,
        owner: &ParticipantId,
        key: &ConversationKey,
        display_name: &str,
        avatar_url: Option<&str>,
    ) -> MirrorResult<()> {
        let conn = self.pool.get()?;

        conn.execute(
            "UPDATE mirror_entries SET other_display_name = ?, other_avatar_url = ?
             WHERE owner_id = ? AND conversation_key = ?",
            params![display_name, avatar_url, owner.as_str(), key.as_str()],
        )?;

        Ok(())
    }

    fn entries_referencing(
        &self,
        other: &ParticipantId,
    ) -> MirrorResult<Vec<(ParticipantId, ConversationKey)>> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(
            "SELECT owner_id, conversation_key FROM mirror_entries WHERE other_id = ?",
        )?;

        let rows = stmt.query_map(params![other.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (owner, raw_key) = row?;
            let key = ConversationKey::parse(&raw_key).map_err(|e| {
                MirrorError::StoreUnavailable(format!("corrupt key in store: {}", e))
            })?;
            result.push((ParticipantId::new(owner), key));
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory_pool;

    fn store_and_key() -> (SqlMirrorStore, ConversationKey) {
        let pool = memory_pool().unwrap();
        {
            // mirror rows reference the conversation row
            let conn = pool.get().unwrap();
            conn.execute(
                "INSERT INTO conversations
                     (key, participant_lo, participant_hi, created_at, updated_at)
                 VALUES ('alice_bob', 'alice', 'bob', 0, 0)",
                [],
            )
            .unwrap();
        }
        let store = SqlMirrorStore::new(pool);
        let key = ConversationKey::derive(&"alice".into(), &"bob".into()).unwrap();
        (store, key)
    }

    fn entry(key: &ConversationKey, text: &str, ts: u64) -> MirrorEntry {
        MirrorEntry {
            conversation_key: key.clone(),
            other_id: "bob".into(),
            other_display_name: "Bob".to_string(),
            other_avatar_url: None,
            last_message_text: text.to_string(),
            updated_at: Timestamp::from_millis(ts),
        }
    }

    #[test]
    fn test_upsert_inserts_then_wins_on_newer() {
        let (store, key) = store_and_key();
        let owner: ParticipantId = "alice".into();

        let outcome = store.upsert(&owner, &entry(&key, "hi", 100)).unwrap();
        assert_eq!(outcome, UpsertOutcome::Applied);

        let outcome = store.upsert(&owner, &entry(&key, "hello", 200)).unwrap();
        assert_eq!(outcome, UpsertOutcome::Applied);

        let stored = store.get(&owner, &key).unwrap().unwrap();
        assert_eq!(stored.last_message_text, "hello");
    }

    #[test]
    fn test_upsert_older_write_is_noop() {
        let (store, key) = store_and_key();
        let owner: ParticipantId = "alice".into();

        store.upsert(&owner, &entry(&key, "newer", 200)).unwrap();
        let outcome = store.upsert(&owner, &entry(&key, "older", 100)).unwrap();
        assert_eq!(outcome, UpsertOutcome::Stale);

        let stored = store.get(&owner, &key).unwrap().unwrap();
        assert_eq!(stored.last_message_text, "newer");
        assert_eq!(stored.updated_at, Timestamp::from_millis(200));
    }

    #[test]
    fn test_upsert_equal_timestamp_applies() {
        // equal updated_at must apply so the reconciler is idempotent
        let (store, key) = store_and_key();
        let owner: ParticipantId = "alice".into();

        store.upsert(&owner, &entry(&key, "first", 100)).unwrap();
        let outcome = store.upsert(&owner, &entry(&key, "second", 100)).unwrap();
        assert_eq!(outcome, UpsertOutcome::Applied);
        assert_eq!(store.get(&owner, &key).unwrap().unwrap().last_message_text, "second");
    }

    #[test]
    fn test_list_orders_by_updated_at_desc() {
        let pool = memory_pool().unwrap();
        {
            let conn = pool.get().unwrap();
            conn.execute_batch(
                "INSERT INTO conversations (key, participant_lo, participant_hi, created_at, updated_at)
                 VALUES ('alice_bob', 'alice', 'bob', 0, 0),
                        ('alice_carol', 'alice', 'carol', 0, 0);",
            )
            .unwrap();
        }
        let store = SqlMirrorStore::new(pool);
        let owner: ParticipantId = "alice".into();

        let key_bob = ConversationKey::derive(&"alice".into(), &"bob".into()).unwrap();
        let key_carol = ConversationKey::derive(&"alice".into(), &"carol".into()).unwrap();

        store.upsert(&owner, &entry(&key_bob, "old", 100)).unwrap();
        let mut carol = entry(&key_carol, "new", 200);
        carol.other_id = "carol".into();
        store.upsert(&owner, &carol).unwrap();

        let list = store.list(&owner).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].conversation_key, key_carol);
        assert_eq!(list[1].conversation_key, key_bob);
    }

    #[test]
    fn test_refresh_display_keeps_updated_at() {
        let (store, key) = store_and_key();
        let owner: ParticipantId = "alice".into();

        store.upsert(&owner, &entry(&key, "hi", 100)).unwrap();
        store
            .refresh_display(&owner, &key, "Bobby", Some("https://example.com/new.png"))
            .unwrap();

        let stored = store.get(&owner, &key).unwrap().unwrap();
        assert_eq!(stored.other_display_name, "Bobby");
        assert_eq!(stored.updated_at, Timestamp::from_millis(100));
        assert_eq!(stored.last_message_text, "hi");
    }

    #[test]
    fn test_seed_never_overwrites() {
        let (store, key) = store_and_key();
        let owner: ParticipantId = "alice".into();

        store.upsert(&owner, &entry(&key, "hello", 100)).unwrap();

        let seed = MirrorEntry::seed(key.clone(), "bob".into(), Timestamp::from_millis(100));
        assert!(!store.seed(&owner, &seed).unwrap());

        let stored = store.get(&owner, &key).unwrap().unwrap();
        assert_eq!(stored.last_message_text, "hello");
    }

    #[test]
    fn test_seed_inserts_when_absent() {
        let (store, key) = store_and_key();
        let owner: ParticipantId = "alice".into();

        let seed = MirrorEntry::seed(key.clone(), "bob".into(), Timestamp::from_millis(5));
        assert!(store.seed(&owner, &seed).unwrap());
        assert!(store.get(&owner, &key).unwrap().is_some());
    }

    #[test]
    fn test_entries_referencing() {
        let (store, key) = store_and_key();

        store.upsert(&"alice".into(), &entry(&key, "hi", 100)).unwrap();

        let refs = store.entries_referencing(&"bob".into()).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].0, ParticipantId::new("alice"));
        assert_eq!(refs[0].1, key);

        assert!(store.entries_referencing(&"carol".into()).unwrap().is_empty());
    }
}
