//! # Retry Queue Repository
//!
//! Durable storage for cloud pushes that failed or timed out.
//!
//! ## The Retry Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Retry Queue Lifecycle                                │
//! │                                                                         │
//! │  LOCAL WRITE (phase 1, already committed)                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Cloud push ──ok──► done                                                │
//! │       │                                                                 │
//! │     fail/timeout                                                        │
//! │       ▼                                                                 │
//! │  INSERT INTO retry_queue (kind, record_id, op, payload)                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DRAIN WORKER (every 60s + startup + reconnect)                         │
//! │       │                                                                 │
//! │       ├── success → DELETE the entry                                    │
//! │       └── failure → attempts += 1, last_error recorded, entry kept      │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                        │
//! │  • The local write is never lost (it's in the records table)            │
//! │  • Entries survive restarts                                             │
//! │  • Oldest-first drain preserves causal order per record                 │
//! │  • At-least-once: replays are whole-document upserts, so safe           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One queue slot per (kind, record_id): a new enqueue replaces older entries
//! for the same record, so the queue carries the newest state only.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use makhzan_core::{RetryEntry, RetryOp};

/// Row shape for `retry_queue`, converted to [`RetryEntry`] on the way out.
#[derive(Debug, sqlx::FromRow)]
struct RetryRow {
    id: String,
    kind: String,
    record_id: String,
    op: String,
    payload: Option<String>,
    attempts: i64,
    last_error: Option<String>,
    enqueued_at: DateTime<Utc>,
    attempted_at: Option<DateTime<Utc>>,
}

impl From<RetryRow> for RetryEntry {
    fn from(row: RetryRow) -> Self {
        RetryEntry {
            id: row.id,
            kind: row.kind,
            record_id: row.record_id,
            op: if row.op == "delete" {
                RetryOp::Delete
            } else {
                RetryOp::Upsert
            },
            payload: row.payload,
            attempts: row.attempts,
            last_error: row.last_error,
            enqueued_at: row.enqueued_at,
            attempted_at: row.attempted_at,
        }
    }
}

/// Repository for retry queue operations.
#[derive(Debug, Clone)]
pub struct RetryQueueRepository {
    pool: SqlitePool,
}

impl RetryQueueRepository {
    /// Creates a new RetryQueueRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RetryQueueRepository { pool }
    }

    /// Parks a failed push for later replay.
    ///
    /// Older entries for the same (kind, record_id) are replaced: the queue
    /// holds the newest payload and the drain replays final state, not
    /// history.
    pub async fn enqueue(
        &self,
        kind: &str,
        record_id: &str,
        op: RetryOp,
        payload: Option<&str>,
    ) -> DbResult<RetryEntry> {
        let entry = RetryEntry {
            id: Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            record_id: record_id.to_string(),
            op,
            payload: payload.map(|p| p.to_string()),
            attempts: 0,
            last_error: None,
            enqueued_at: Utc::now(),
            attempted_at: None,
        };

        debug!(kind = %kind, record_id = %record_id, op = %op.as_str(), "Enqueueing for retry");

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM retry_queue WHERE kind = ?1 AND record_id = ?2")
            .bind(kind)
            .bind(record_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO retry_queue (
                id, kind, record_id, op, payload,
                attempts, last_error, enqueued_at, attempted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.kind)
        .bind(&entry.record_id)
        .bind(entry.op.as_str())
        .bind(&entry.payload)
        .bind(entry.attempts)
        .bind(&entry.last_error)
        .bind(entry.enqueued_at)
        .bind(entry.attempted_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(entry)
    }

    /// Gets the oldest pending entries, up to `limit`.
    pub async fn oldest(&self, limit: u32) -> DbResult<Vec<RetryEntry>> {
        let rows: Vec<RetryRow> = sqlx::query_as(
            r#"
            SELECT id, kind, record_id, op, payload,
                   attempts, last_error, enqueued_at, attempted_at
            FROM retry_queue
            ORDER BY enqueued_at ASC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RetryEntry::from).collect())
    }

    /// Removes an entry after a successful replay.
    pub async fn remove(&self, id: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM retry_queue WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Records a replay failure; the entry stays queued.
    pub async fn mark_failed(&self, id: &str, error: &str) -> DbResult<()> {
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE retry_queue SET
                attempts = attempts + 1,
                last_error = ?2,
                attempted_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Counts pending entries.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM retry_queue")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Record ids with a pending upsert for the given collection.
    ///
    /// The bulk pull uses this to protect not-yet-pushed local records from
    /// being pruned as "absent from the server".
    pub async fn pending_upsert_ids(&self, kind: &str) -> DbResult<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT record_id FROM retry_queue WHERE kind = ?1 AND op = 'upsert'",
        )
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Empties the queue (force resync / wipe).
    pub async fn clear(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM retry_queue")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn repo() -> RetryQueueRepository {
        Database::new(DbConfig::in_memory())
            .await
            .unwrap()
            .retry_queue()
    }

    #[tokio::test]
    async fn enqueue_drain_lifecycle() {
        let repo = repo().await;

        let e1 = repo
            .enqueue("products", "p1", RetryOp::Upsert, Some("{\"id\":\"p1\"}"))
            .await
            .unwrap();
        repo.enqueue("issues", "i1", RetryOp::Delete, None)
            .await
            .unwrap();
        assert_eq!(repo.count().await.unwrap(), 2);

        let pending = repo.oldest(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].record_id, "p1"); // oldest first

        repo.mark_failed(&e1.id, "network unreachable").await.unwrap();
        let pending = repo.oldest(10).await.unwrap();
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(
            pending[0].last_error.as_deref(),
            Some("network unreachable")
        );

        repo.remove(&e1.id).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reenqueue_replaces_older_entry_for_same_record() {
        let repo = repo().await;

        repo.enqueue("products", "p1", RetryOp::Upsert, Some("{\"v\":1}"))
            .await
            .unwrap();
        repo.enqueue("products", "p1", RetryOp::Upsert, Some("{\"v\":2}"))
            .await
            .unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        let pending = repo.oldest(10).await.unwrap();
        assert_eq!(pending[0].payload.as_deref(), Some("{\"v\":2}"));
    }

    #[tokio::test]
    async fn pending_upsert_ids_filters_by_kind_and_op() {
        let repo = repo().await;

        repo.enqueue("products", "p1", RetryOp::Upsert, Some("{}"))
            .await
            .unwrap();
        repo.enqueue("products", "p2", RetryOp::Delete, None)
            .await
            .unwrap();
        repo.enqueue("issues", "i1", RetryOp::Upsert, Some("{}"))
            .await
            .unwrap();

        let ids = repo.pending_upsert_ids("products").await.unwrap();
        assert_eq!(ids, vec!["p1".to_string()]);
    }
}
