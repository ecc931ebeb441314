//! # Records Repository
//!
//! Generic JSON document storage, one row per record, discriminated by
//! [`EntityKind`].
//!
//! ## Document Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  records                                                                │
//! │  ┌────────────┬──────────┬──────────────────────────────┬────────────┐ │
//! │  │ kind       │ id       │ payload (whole JSON document)│ updated_at │ │
//! │  ├────────────┼──────────┼──────────────────────────────┼────────────┤ │
//! │  │ products   │ 7f3a...  │ {"id":"7f3a...","product...  │ 2026-08-.. │ │
//! │  │ issues     │ 91c2...  │ {"id":"91c2...","invoice...  │ 2026-08-.. │ │
//! │  └────────────┴──────────┴──────────────────────────────┴────────────┘ │
//! │                                                                         │
//! │  The payload is byte-for-byte what the cloud collection holds, so a    │
//! │  pull is `bulk_upsert` and a push is `get` — no mapping layer.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use makhzan_core::EntityKind;

/// Repository for generic document records.
#[derive(Debug, Clone)]
pub struct RecordsRepository {
    pool: SqlitePool,
}

impl RecordsRepository {
    /// Creates a new RecordsRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RecordsRepository { pool }
    }

    /// Inserts or replaces one document.
    pub async fn upsert(
        &self,
        kind: EntityKind,
        id: &str,
        payload: &serde_json::Value,
    ) -> DbResult<()> {
        let text = payload.to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO records (kind, id, payload, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (kind, id) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(kind.table())
        .bind(id)
        .bind(text)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts or replaces many documents in one transaction.
    ///
    /// Used by the pull path: a subscription batch or a bulk download lands
    /// atomically, so readers never observe half a batch.
    pub async fn bulk_upsert(
        &self,
        kind: EntityKind,
        items: &[(String, serde_json::Value)],
    ) -> DbResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        for (id, payload) in items {
            sqlx::query(
                r#"
                INSERT INTO records (kind, id, payload, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT (kind, id) DO UPDATE SET
                    payload = excluded.payload,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(kind.table())
            .bind(id)
            .bind(payload.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(kind = %kind, count = items.len(), "Bulk upsert committed");
        Ok(())
    }

    /// Fetches one document, or None.
    pub async fn get(&self, kind: EntityKind, id: &str) -> DbResult<Option<serde_json::Value>> {
        let row = sqlx::query("SELECT payload FROM records WHERE kind = ?1 AND id = ?2")
            .bind(kind.table())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let text: String = row.get("payload");
                let value = serde_json::from_str(&text)
                    .map_err(|e| DbError::corrupt(kind.table(), id, e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Fetches every document of a kind.
    ///
    /// A row whose payload no longer parses is skipped with a warning rather
    /// than failing the whole load; one corrupt record must not take the
    /// entire kind offline.
    pub async fn all(&self, kind: EntityKind) -> DbResult<Vec<serde_json::Value>> {
        let rows = sqlx::query("SELECT id, payload FROM records WHERE kind = ?1")
            .bind(kind.table())
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let text: String = row.get("payload");
            match serde_json::from_str(&text) {
                Ok(value) => out.push(value),
                Err(e) => {
                    tracing::warn!(kind = %kind, id = %id, error = %e, "Skipping corrupt record");
                }
            }
        }
        Ok(out)
    }

    /// Fetches every id of a kind.
    pub async fn ids(&self, kind: EntityKind) -> DbResult<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM records WHERE kind = ?1")
            .bind(kind.table())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|r| r.get("id")).collect())
    }

    /// Deletes one document. Returns true when a row was removed.
    pub async fn delete(&self, kind: EntityKind, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM records WHERE kind = ?1 AND id = ?2")
            .bind(kind.table())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes every document of a kind. Returns the number removed.
    pub async fn clear(&self, kind: EntityKind) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM records WHERE kind = ?1")
            .bind(kind.table())
            .execute(&self.pool)
            .await?;

        debug!(kind = %kind, removed = result.rows_affected(), "Cleared kind");
        Ok(result.rows_affected())
    }

    /// Counts documents of a kind.
    pub async fn count(&self, kind: EntityKind) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE kind = ?1")
            .bind(kind.table())
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn upsert_get_delete_round_trip() {
        let repo = db().await.records();
        let doc = serde_json::json!({"id": "a1", "productName": "Rice"});

        repo.upsert(EntityKind::Products, "a1", &doc).await.unwrap();
        let got = repo.get(EntityKind::Products, "a1").await.unwrap();
        assert_eq!(got, Some(doc.clone()));

        // Replace in place
        let doc2 = serde_json::json!({"id": "a1", "productName": "Rice 5kg"});
        repo.upsert(EntityKind::Products, "a1", &doc2)
            .await
            .unwrap();
        assert_eq!(repo.count(EntityKind::Products).await.unwrap(), 1);

        assert!(repo.delete(EntityKind::Products, "a1").await.unwrap());
        assert!(!repo.delete(EntityKind::Products, "a1").await.unwrap());
        assert_eq!(repo.get(EntityKind::Products, "a1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn kinds_are_isolated() {
        let repo = db().await.records();
        let doc = serde_json::json!({"id": "x"});
        repo.upsert(EntityKind::Products, "x", &doc).await.unwrap();
        repo.upsert(EntityKind::Issues, "x", &doc).await.unwrap();

        repo.clear(EntityKind::Products).await.unwrap();
        assert_eq!(repo.count(EntityKind::Products).await.unwrap(), 0);
        assert_eq!(repo.count(EntityKind::Issues).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn bulk_upsert_is_atomic_and_idempotent() {
        let repo = db().await.records();
        let items: Vec<(String, serde_json::Value)> = (0..5)
            .map(|i| {
                (
                    format!("id{i}"),
                    serde_json::json!({"id": format!("id{i}"), "n": i}),
                )
            })
            .collect();

        repo.bulk_upsert(EntityKind::Transactions, &items)
            .await
            .unwrap();
        repo.bulk_upsert(EntityKind::Transactions, &items)
            .await
            .unwrap();

        assert_eq!(repo.count(EntityKind::Transactions).await.unwrap(), 5);
        let ids = repo.ids(EntityKind::Transactions).await.unwrap();
        assert!(ids.contains(&"id3".to_string()));
    }
}
