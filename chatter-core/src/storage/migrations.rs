//! Database migrations for the chat engine schema
//!
//! Each migration is applied atomically and tracked in the schema_version
//! table, so opening an already-current database is a no-op.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Migration descriptor
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
}

/// All available migrations in order
pub fn get_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial conversations, messages, and mirror schema",
        up_sql: r#"
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            );

            -- One row per two-party conversation, keyed by the canonical
            -- symmetric ConversationKey (no surrogate id)
            CREATE TABLE IF NOT EXISTS conversations (
                key TEXT PRIMARY KEY,
                participant_lo TEXT NOT NULL,
                participant_hi TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                last_message_text TEXT NOT NULL DEFAULT '',
                CHECK (participant_lo < participant_hi)
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_lo ON conversations(participant_lo);
            CREATE INDEX IF NOT EXISTS idx_conversations_hi ON conversations(participant_hi);

            -- Append-only message history; ordering key is (server_ts, seq)
            CREATE TABLE IF NOT EXISTS messages (
                conversation_key TEXT NOT NULL,
                server_ts INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                sender_id TEXT NOT NULL,
                client_message_id TEXT NOT NULL,
                text TEXT NOT NULL,
                PRIMARY KEY (conversation_key, server_ts, seq),
                FOREIGN KEY (conversation_key) REFERENCES conversations(key)
            );

            -- Idempotent append: one row per caller-supplied message id
            CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_client_id
                ON messages(conversation_key, client_message_id);

            -- Per-participant denormalized conversation summaries
            CREATE TABLE IF NOT EXISTS mirror_entries (
                owner_id TEXT NOT NULL,
                conversation_key TEXT NOT NULL,
                other_id TEXT NOT NULL,
                other_display_name TEXT NOT NULL DEFAULT '',
                other_avatar_url TEXT,
                last_message_text TEXT NOT NULL DEFAULT '',
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (owner_id, conversation_key),
                FOREIGN KEY (conversation_key) REFERENCES conversations(key)
            );

            -- Backs list(owner): updated_at descending
            CREATE INDEX IF NOT EXISTS idx_mirror_owner_updated
                ON mirror_entries(owner_id, updated_at DESC);

            -- Backs lazy display refresh on profile change
            CREATE INDEX IF NOT EXISTS idx_mirror_other ON mirror_entries(other_id);
        "#,
    }]
}

/// Apply all pending migrations
pub fn migrate(pool: &Pool<SqliteConnectionManager>) -> Result<(), rusqlite::Error> {
    let conn = pool.get().map_err(|e| {
        rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to get connection: {}", e),
        )))
    })?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        );",
    )?;

    let current: i32 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
            row.get(0)
        })?;

    for migration in get_migrations() {
        if migration.version <= current {
            continue;
        }

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.up_sql)?;

        let applied_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("System clock is before UNIX epoch")
            .as_millis() as i64;

        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
            params![migration.version, applied_at],
        )?;
        tx.commit()?;

        tracing::info!(
            version = migration.version,
            description = migration.description,
            "Applied schema migration"
        );
    }

    Ok(())
}
