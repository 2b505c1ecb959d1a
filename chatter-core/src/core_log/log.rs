/*
    log.rs - Append-only, strictly ordered message history

    One logical log per conversation, all stored in the shared SQLite
    database. Ordering is (server_ts, seq): server_ts is assigned from a
    monotonically non-decreasing clock local to each conversation, seq is
    the insertion sequence and tie-break. Appends are idempotent on the
    caller-supplied client_message_id.

    The per-conversation clock is cached in memory and rehydrated from the
    database on first touch, so the total order survives process restarts.
*/

use crate::core_identity::{ConversationKey, ParticipantId};
use crate::core_log::errors::{LogError, LogResult};
use crate::core_log::model::{Conversation, Cursor, Message, Timestamp};
use crate::storage::DbPool;
use metrics::counter;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Helper to convert poison errors into LogError
fn handle_poison<T>(_err: PoisonError<T>) -> LogError {
    LogError::StoreUnavailable("Lock poisoned: a thread panicked while holding the lock".to_string())
}

/// Outcome of an append: freshly stored, or an idempotent replay
#[derive(Debug, Clone)]
pub enum AppendOutcome {
    /// The message was stored by this call
    Fresh(Message),

    /// This client_message_id was already recorded; the stored message
    /// is returned unchanged
    Duplicate(Message),
}

impl AppendOutcome {
    pub fn message(&self) -> &Message {
        match self {
            AppendOutcome::Fresh(m) | AppendOutcome::Duplicate(m) => m,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            AppendOutcome::Fresh(m) | AppendOutcome::Duplicate(m) => m,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, AppendOutcome::Duplicate(_))
    }
}

/// Per-conversation ordering state
#[derive(Debug, Clone, Copy)]
struct LogClock {
    last_ts: u64,
    last_seq: u64,
}

/// Append-only message log over the shared database
pub struct MessageLog {
    pool: DbPool,

    /// Cached (last_ts, last_seq) per conversation; entries are created on
    /// first touch from MAX() over the stored rows
    clocks: Mutex<HashMap<ConversationKey, Arc<Mutex<Option<LogClock>>>>>,
}

impl MessageLog {
    pub fn new(pool: DbPool) -> Self {
        MessageLog { pool, clocks: Mutex::new(HashMap::new()) }
    }

    /// Create the conversation row if it does not exist yet
    ///
    /// Compare-and-set: when two first-contact sends race, the loser
    /// observes `false` and proceeds without error.
    pub fn create_conversation_if_absent(&self, key: &ConversationKey) -> LogResult<bool> {
        let conn = self.pool.get()?;
        let (lo, hi) = key.participants();
        let now = Timestamp::now();

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO conversations
                 (key, participant_lo, participant_hi, created_at, updated_at, last_message_text)
             VALUES (?, ?, ?, ?, ?, '')",
            params![
                key.as_str(),
                lo.as_str(),
                hi.as_str(),
                now.as_millis() as i64,
                now.as_millis() as i64,
            ],
        )?;

        if inserted > 0 {
            debug!(key = %key, "Created conversation");
        }

        Ok(inserted > 0)
    }

    /// Fetch a conversation row
    pub fn get_conversation(&self, key: &ConversationKey) -> LogResult<Option<Conversation>> {
        let conn = self.pool.get()?;

        conn.query_row(
            "SELECT participant_lo, participant_hi, created_at, updated_at, last_message_text
             FROM conversations WHERE key = ?",
            params![key.as_str()],
            |row| {
                Ok(Conversation {
                    key: key.clone(),
                    participant_lo: ParticipantId::new(row.get::<_, String>(0)?),
                    participant_hi: ParticipantId::new(row.get::<_, String>(1)?),
                    created_at: Timestamp::from_millis(row.get::<_, i64>(2)?.max(0) as u64),
                    updated_at: Timestamp::from_millis(row.get::<_, i64>(3)?.max(0) as u64),
                    last_message_text: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(LogError::from)
    }

    /// All conversations; feeds the reconciliation pass
    pub fn list_conversations(&self) -> LogResult<Vec<Conversation>> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(
            "SELECT key, participant_lo, participant_hi, created_at, updated_at, last_message_text
             FROM conversations ORDER BY key",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut conversations = Vec::new();
        for row in rows {
            let (raw_key, lo, hi, created_at, updated_at, last_message_text) = row?;
            let key = ConversationKey::parse(&raw_key)
                .map_err(|e| LogError::StoreUnavailable(format!("corrupt key in store: {}", e)))?;
            conversations.push(Conversation {
                key,
                participant_lo: ParticipantId::new(lo),
                participant_hi: ParticipantId::new(hi),
                created_at: Timestamp::from_millis(created_at.max(0) as u64),
                updated_at: Timestamp::from_millis(updated_at.max(0) as u64),
                last_message_text,
            });
        }

        Ok(conversations)
    }

    /// Advance the conversation's summary fields; never moves them backwards
    pub fn touch_conversation(
        &self,
        key: &ConversationKey,
        last_message_text: &str,
        updated_at: Timestamp,
    ) -> LogResult<()> {
        let conn = self.pool.get()?;

        conn.execute(
            "UPDATE conversations SET last_message_text = ?, updated_at = ?
             WHERE key = ? AND updated_at <= ?",
            params![
                last_message_text,
                updated_at.as_millis() as i64,
                key.as_str(),
                updated_at.as_millis() as i64,
            ],
        )?;

        Ok(())
    }

    /// Append a message, assigning (server_ts, seq) under the
    /// conversation's clock
    ///
    /// Idempotent: a client_message_id already recorded for this
    /// conversation returns the stored message instead of a new row.
    pub fn append(
        &self,
        key: &ConversationKey,
        sender_id: &ParticipantId,
        client_message_id: &str,
        text: &str,
    ) -> LogResult<AppendOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LogError::EmptyMessage);
        }

        let conn = self.pool.get()?;

        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM conversations WHERE key = ?",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(LogError::ConversationNotFound(key.clone()));
        }

        let clock = self.clock_handle(key)?;
        let mut clock = clock.lock().map_err(handle_poison)?;

        // Replayed send: hand back the original row
        if let Some(existing) = self.find_by_client_id(&conn, key, client_message_id)? {
            counter!("chat.log.append.duplicate").increment(1);
            return Ok(AppendOutcome::Duplicate(existing));
        }

        let state = match *clock {
            Some(state) => state,
            None => {
                let state = self.load_clock(&conn, key)?;
                *clock = Some(state);
                state
            }
        };

        let server_ts = Timestamp::now().as_millis().max(state.last_ts);
        let seq = state.last_seq + 1;

        let inserted = conn.execute(
            "INSERT INTO messages
                 (conversation_key, server_ts, seq, sender_id, client_message_id, text)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                key.as_str(),
                server_ts as i64,
                seq as i64,
                sender_id.as_str(),
                client_message_id,
                text,
            ],
        );

        match inserted {
            Ok(_) => {}
            // A concurrent retry of the same client_message_id won the
            // unique index; return its row
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                if let Some(existing) = self.find_by_client_id(&conn, key, client_message_id)? {
                    counter!("chat.log.append.duplicate").increment(1);
                    return Ok(AppendOutcome::Duplicate(existing));
                }
                return Err(LogError::StoreUnavailable(
                    "constraint violation without a matching row".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        *clock = Some(LogClock { last_ts: server_ts, last_seq: seq });
        counter!("chat.log.append.total").increment(1);

        Ok(AppendOutcome::Fresh(Message {
            conversation_key: key.clone(),
            sender_id: sender_id.clone(),
            text: text.to_string(),
            server_ts: Timestamp::from_millis(server_ts),
            seq,
            client_message_id: client_message_id.to_string(),
        }))
    }

    /// Messages with (server_ts, seq) > cursor, ascending
    ///
    /// Restartable: callers resume after a disconnect by passing the
    /// cursor of the last message they observed.
    pub fn read_since(&self, key: &ConversationKey, cursor: Cursor) -> LogResult<Vec<Message>> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(
            "SELECT server_ts, seq, sender_id, client_message_id, text
             FROM messages
             WHERE conversation_key = ?
               AND (server_ts > ? OR (server_ts = ? AND seq > ?))
             ORDER BY server_ts ASC, seq ASC",
        )?;

        let rows = stmt.query_map(
            params![
                key.as_str(),
                cursor.server_ts as i64,
                cursor.server_ts as i64,
                cursor.seq as i64,
            ],
            |row| self.row_to_message(key, row),
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }

        Ok(messages)
    }

    /// Newest message of a conversation, if any
    pub fn latest(&self, key: &ConversationKey) -> LogResult<Option<Message>> {
        let conn = self.pool.get()?;

        conn.query_row(
            "SELECT server_ts, seq, sender_id, client_message_id, text
             FROM messages WHERE conversation_key = ?
             ORDER BY server_ts DESC, seq DESC LIMIT 1",
            params![key.as_str()],
            |row| self.row_to_message(key, row),
        )
        .optional()
        .map_err(LogError::from)
    }

    fn clock_handle(&self, key: &ConversationKey) -> LogResult<Arc<Mutex<Option<LogClock>>>> {
        let mut clocks = self.clocks.lock().map_err(handle_poison)?;
        Ok(clocks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone())
    }

    fn load_clock(&self, conn: &Connection, key: &ConversationKey) -> LogResult<LogClock> {
        let (last_ts, last_seq): (Option<i64>, Option<i64>) = conn.query_row(
            "SELECT MAX(server_ts), MAX(seq) FROM messages WHERE conversation_key = ?",
            params![key.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(LogClock {
            last_ts: last_ts.unwrap_or(0).max(0) as u64,
            last_seq: last_seq.unwrap_or(0).max(0) as u64,
        })
    }

    fn find_by_client_id(
        &self,
        conn: &Connection,
        key: &ConversationKey,
        client_message_id: &str,
    ) -> LogResult<Option<Message>> {
        conn.query_row(
            "SELECT server_ts, seq, sender_id, client_message_id, text
             FROM messages WHERE conversation_key = ? AND client_message_id = ?",
            params![key.as_str(), client_message_id],
            |row| self.row_to_message(key, row),
        )
        .optional()
        .map_err(LogError::from)
    }

    fn row_to_message(
        &self,
        key: &ConversationKey,
        row: &rusqlite::Row<'_>,
    ) -> Result<Message, rusqlite::Error> {
        Ok(Message {
            conversation_key: key.clone(),
            sender_id: ParticipantId::new(row.get::<_, String>(2)?),
            text: row.get(4)?,
            server_ts: Timestamp::from_millis(row.get::<_, i64>(0)?.max(0) as u64),
            seq: row.get::<_, i64>(1)?.max(0) as u64,
            client_message_id: row.get(3)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory_pool;

    fn log_with_conversation() -> (MessageLog, ConversationKey) {
        let pool = memory_pool().unwrap();
        let log = MessageLog::new(pool);
        let key = ConversationKey::derive(&"alice".into(), &"bob".into()).unwrap();
        assert!(log.create_conversation_if_absent(&key).unwrap());
        (log, key)
    }

    #[test]
    fn test_append_assigns_increasing_order() {
        let (log, key) = log_with_conversation();

        let m1 = log.append(&key, &"alice".into(), "m1", "hi").unwrap().into_message();
        let m2 = log.append(&key, &"bob".into(), "m2", "hello").unwrap().into_message();

        assert!(m2.cursor() > m1.cursor());
        assert_eq!(m1.seq, 1);
        assert_eq!(m2.seq, 2);
    }

    #[test]
    fn test_append_is_idempotent_on_client_id() {
        let (log, key) = log_with_conversation();

        let first = log.append(&key, &"alice".into(), "m1", "hi").unwrap();
        let second = log.append(&key, &"alice".into(), "m1", "hi again").unwrap();

        assert!(!first.is_duplicate());
        assert!(second.is_duplicate());
        assert_eq!(second.message(), first.message());
        assert_eq!(log.read_since(&key, Cursor::ZERO).unwrap().len(), 1);
    }

    #[test]
    fn test_append_trims_and_rejects_blank_text() {
        let (log, key) = log_with_conversation();

        let err = log.append(&key, &"alice".into(), "m1", "   \t\n").unwrap_err();
        assert!(matches!(err, LogError::EmptyMessage));
        assert!(log.read_since(&key, Cursor::ZERO).unwrap().is_empty());

        let msg = log.append(&key, &"alice".into(), "m2", "  hi  ").unwrap().into_message();
        assert_eq!(msg.text, "hi");
    }

    #[test]
    fn test_append_requires_conversation() {
        let pool = memory_pool().unwrap();
        let log = MessageLog::new(pool);
        let key = ConversationKey::derive(&"alice".into(), &"bob".into()).unwrap();

        let err = log.append(&key, &"alice".into(), "m1", "hi").unwrap_err();
        assert!(matches!(err, LogError::ConversationNotFound(_)));
    }

    #[test]
    fn test_create_conversation_is_cas() {
        let pool = memory_pool().unwrap();
        let log = MessageLog::new(pool);
        let key = ConversationKey::derive(&"alice".into(), &"bob".into()).unwrap();

        assert!(log.create_conversation_if_absent(&key).unwrap());
        assert!(!log.create_conversation_if_absent(&key).unwrap());
    }

    #[test]
    fn test_read_since_resumes_from_cursor() {
        let (log, key) = log_with_conversation();

        log.append(&key, &"alice".into(), "m1", "one").unwrap();
        let m2 = log.append(&key, &"bob".into(), "m2", "two").unwrap().into_message();
        log.append(&key, &"alice".into(), "m3", "three").unwrap();

        let all = log.read_since(&key, Cursor::ZERO).unwrap();
        assert_eq!(
            all.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(),
            vec!["one", "two", "three"]
        );

        let tail = log.read_since(&key, m2.cursor()).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].text, "three");
    }

    #[test]
    fn test_latest() {
        let (log, key) = log_with_conversation();
        assert!(log.latest(&key).unwrap().is_none());

        log.append(&key, &"alice".into(), "m1", "one").unwrap();
        log.append(&key, &"bob".into(), "m2", "two").unwrap();

        assert_eq!(log.latest(&key).unwrap().unwrap().text, "two");
    }

    #[test]
    fn test_touch_conversation_never_regresses() {
        let (log, key) = log_with_conversation();

        log.touch_conversation(&key, "newer", Timestamp::from_millis(u64::MAX / 2)).unwrap();
        log.touch_conversation(&key, "older", Timestamp::from_millis(1)).unwrap();

        let conv = log.get_conversation(&key).unwrap().unwrap();
        assert_eq!(conv.last_message_text, "newer");
    }

    #[test]
    fn test_clock_survives_reload() {
        let pool = memory_pool().unwrap();
        let key = ConversationKey::derive(&"alice".into(), &"bob".into()).unwrap();

        let log = MessageLog::new(pool.clone());
        log.create_conversation_if_absent(&key).unwrap();
        let m1 = log.append(&key, &"alice".into(), "m1", "one").unwrap().into_message();
        drop(log);

        // Fresh log over the same database rehydrates the clock
        let log = MessageLog::new(pool);
        let m2 = log.append(&key, &"bob".into(), "m2", "two").unwrap().into_message();
        assert!(m2.cursor() > m1.cursor());
        assert_eq!(m2.seq, m1.seq + 1);
    }
}
