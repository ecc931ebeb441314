//! # Store Error Types

use thiserror::Error;

use makhzan_core::CoreError;
use makhzan_db::DbError;

/// Errors surfaced by the mutation/query API.
///
/// Background sync failures are NOT errors here: phase 2 of a write cannot
/// fail the write. A [`StoreError`] means phase 1 itself did not commit.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Business rule violation (not found, bad status, ledger input).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Local database failure.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Document (de)serialization failure.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal invariant broken.
    #[error("Internal store error: {0}")]
    Internal(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
