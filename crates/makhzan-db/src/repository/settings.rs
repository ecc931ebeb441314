//! # Settings Repository
//!
//! Key/value storage for small pieces of state that are not entity records:
//! sequence counters and their cloud mirrors, the month-close record, the
//! persisted device id.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::{DbError, DbResult};

/// Repository for settings operations.
#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    /// Creates a new SettingsRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SettingsRepository { pool }
    }

    /// Fetches a setting, or None.
    pub async fn get(&self, key: &str) -> DbResult<Option<serde_json::Value>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let text: String = row.get("value");
                let value = serde_json::from_str(&text)
                    .map_err(|e| DbError::corrupt("settings", key, e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Fetches a setting together with its local write time.
    ///
    /// The write time drives the local-wins-if-newer merge against the cloud
    /// settings document.
    pub async fn get_with_time(
        &self,
        key: &str,
    ) -> DbResult<Option<(serde_json::Value, DateTime<Utc>)>> {
        let row = sqlx::query("SELECT value, updated_at FROM settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let text: String = row.get("value");
                let updated_at: DateTime<Utc> = row.get("updated_at");
                let value = serde_json::from_str(&text)
                    .map_err(|e| DbError::corrupt("settings", key, e.to_string()))?;
                Ok(Some((value, updated_at)))
            }
            None => Ok(None),
        }
    }

    /// Writes a setting, replacing any previous value.
    pub async fn set(&self, key: &str, value: &serde_json::Value) -> DbResult<()> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value.to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Deletes a setting.
    pub async fn delete(&self, key: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn set_get_delete_round_trip() {
        let repo = Database::new(DbConfig::in_memory())
            .await
            .unwrap()
            .settings();

        assert!(repo.get("seq_issue").await.unwrap().is_none());

        repo.set("seq_issue", &serde_json::json!(42)).await.unwrap();
        assert_eq!(
            repo.get("seq_issue").await.unwrap(),
            Some(serde_json::json!(42))
        );

        repo.set("seq_issue", &serde_json::json!(43)).await.unwrap();
        let (value, time) = repo.get_with_time("seq_issue").await.unwrap().unwrap();
        assert_eq!(value, serde_json::json!(43));
        assert!(time <= Utc::now());

        repo.delete("seq_issue").await.unwrap();
        assert!(repo.get("seq_issue").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stores_structured_values() {
        let repo = Database::new(DbConfig::in_memory())
            .await
            .unwrap()
            .settings();

        let closing = serde_json::json!({
            "month": "2026-08",
            "closedAt": "2026-08-31T18:00:00Z",
            "productCount": 120,
        });
        repo.set("last_month_closing", &closing).await.unwrap();
        assert_eq!(
            repo.get("last_month_closing").await.unwrap(),
            Some(closing)
        );
    }
}
