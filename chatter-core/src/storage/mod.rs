//! Shared SQLite storage layer
//!
//! The durable store is the only shared mutable resource in the engine.
//! Conversations, messages, and mirror entries all live in one SQLite
//! database accessed through an r2d2 connection pool; the log and mirror
//! stores each hold a clone of the pool.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use thiserror::Error;

mod migrations;

pub use migrations::{migrate, CURRENT_SCHEMA_VERSION};

/// Connection pool shared by the log and mirror stores
pub type DbPool = Pool<SqliteConnectionManager>;

/// Errors raised while opening or migrating the database
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store cannot be reached or is failing transiently
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Result type for storage setup operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Open (or create) the database at `path` and bring the schema current
pub fn open_pool(path: impl AsRef<Path>) -> StorageResult<DbPool> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::Unavailable(e.to_string()))?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
    });

    let pool = Pool::new(manager).map_err(|e| StorageError::Unavailable(e.to_string()))?;
    migrate(&pool).map_err(|e| StorageError::Migration(e.to_string()))?;

    Ok(pool)
}

/// Open an in-memory database (tests, CLI dry runs)
///
/// The pool is pinned to a single connection: every `:memory:` connection
/// opens a private database, so a larger pool would hand out handles to
/// databases the migrations never touched.
pub fn memory_pool() -> StorageResult<DbPool> {
    let manager = SqliteConnectionManager::memory()
        .with_init(|conn| conn.pragma_update(None, "foreign_keys", "ON"));

    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| StorageError::Unavailable(e.to_string()))?;
    migrate(&pool).map_err(|e| StorageError::Migration(e.to_string()))?;

    Ok(pool)
}
