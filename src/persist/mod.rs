//! Marker persistence for the generation engine.

/// In-process store for tests and ephemeral runs.
pub mod memory;
/// SQLite-backed store.
pub mod sqlite;

use thiserror::Error;

/// Storage failures.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The SQLite layer failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Any other storage failure.
    #[error("{0}")]
    Message(String),
}

/// Result alias for storage calls.
pub type PersistResult<T> = Result<T, PersistError>;

/// Durable key-value marker storage that survives restarts.
///
/// Implementations are owned by a single engine instance; concurrent writers
/// sharing one backing store are not coordinated.
pub trait MarkerStore: Send {
    /// Value stored under `key`, if any.
    fn get(&self, key: &str) -> PersistResult<Option<String>>;
    /// Stores `value` under `key`, replacing any previous value.
    fn set(&mut self, key: &str, value: &str) -> PersistResult<()>;
    /// Deletes `key`; removing a missing key is not an error.
    fn remove(&mut self, key: &str) -> PersistResult<()>;
}
