pub mod cache_repository;
pub mod sqlite;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Migration v{version} failed: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection lock poisoned")]
    LockPoisoned,
}

pub use cache_repository::CacheEntry;
pub use sqlite::{open_database, open_memory_database};
