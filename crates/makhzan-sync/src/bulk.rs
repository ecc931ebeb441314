//! # Bulk Transfers
//!
//! Whole-collection moves, used at engine startup (catch-up pull), by the
//! `force_resync` device command, and by manual "upload everything" /
//! "download everything" maintenance actions.
//!
//! Pulls go through [`Store::replace_kind_from_cloud`], which protects
//! locally-newer records (pending retry upserts, deletion-guarded ids) from
//! being pruned or resurrected.

use tracing::{info, warn};

use makhzan_core::{EntityKind, SequenceKind};
use makhzan_store::Store;

use crate::cloud::CloudClient;
use crate::error::SyncResult;

/// Counters from a bulk transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkStats {
    /// Records moved.
    pub records: usize,
    /// Kinds touched.
    pub kinds: usize,
}

/// Uploads every local record of every kind.
///
/// Fails fast: an unreachable cloud aborts the upload rather than producing
/// a half-pushed state that looks complete.
pub async fn push_all(store: &Store, cloud: &dyn CloudClient) -> SyncResult<BulkStats> {
    let mut stats = BulkStats::default();

    for kind in EntityKind::ALL {
        let docs = store.all_documents(kind).await?;
        if docs.is_empty() {
            continue;
        }
        for doc in &docs {
            let Some(id) = doc.get("id").and_then(|v| v.as_str()) else {
                warn!(kind = %kind, "Local document without id, skipping upload");
                continue;
            };
            cloud.push(kind.collection(), id, doc).await?;
            stats.records += 1;
        }
        stats.kinds += 1;
    }

    info!(records = stats.records, kinds = stats.kinds, "Bulk upload finished");
    Ok(stats)
}

/// Replaces the given kinds with the cloud's contents.
pub async fn pull_kinds(
    store: &Store,
    cloud: &dyn CloudClient,
    kinds: &[EntityKind],
) -> SyncResult<BulkStats> {
    let mut stats = BulkStats::default();

    for &kind in kinds {
        let docs = cloud.fetch(kind.collection()).await?;
        let pull = store.replace_kind_from_cloud(kind, docs).await?;
        stats.records += pull.upserted;
        stats.kinds += 1;
    }

    Ok(stats)
}

/// Replaces every kind with the cloud's contents (startup catch-up).
pub async fn pull_all(store: &Store, cloud: &dyn CloudClient) -> SyncResult<BulkStats> {
    let stats = pull_kinds(store, cloud, &EntityKind::ALL).await?;
    info!(records = stats.records, kinds = stats.kinds, "Bulk download finished");
    Ok(stats)
}

/// Pulls cloud-side settings: sequence counter mirrors and the month-close
/// record (local wins if newer).
pub async fn pull_settings(store: &Store, cloud: &dyn CloudClient) -> SyncResult<()> {
    for kind in SequenceKind::ALL {
        if let Some((value, _)) = cloud.get_setting(kind.counter_key()).await? {
            match value.as_u64() {
                Some(counter) => {
                    let counter = counter.min(u64::from(u32::MAX)) as u32;
                    store.note_cloud_counter(kind, counter).await?;
                }
                None => warn!(key = kind.counter_key(), "Cloud counter is not a number"),
            }
        }
    }

    let key = makhzan_store::closing::LAST_MONTH_CLOSING_KEY;
    if let Some((value, remote_time)) = cloud.get_setting(key).await? {
        let local = store.db().settings().get_with_time(key).await?;
        let local_newer = match (&local, remote_time) {
            (Some((_, local_time)), Some(remote_time)) => *local_time >= remote_time,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !local_newer {
            store.db().settings().set(key, &value).await?;
        }
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCloud;
    use makhzan_store::{ProductDraft, StoreConfig};

    async fn store(device: &str) -> Store {
        Store::open(StoreConfig::in_memory(device)).await.unwrap().0
    }

    fn rice() -> ProductDraft {
        ProductDraft {
            product_code: "P-1".into(),
            product_name: "Rice".into(),
            opening_stock: 10.0,
            price: 5.0,
            ..ProductDraft::default()
        }
    }

    #[tokio::test]
    async fn push_all_then_pull_all_round_trips() {
        let source = store("dev-a").await;
        let target = store("dev-b").await;
        let cloud = MemoryCloud::new();

        let p = source.add_product(rice()).await.unwrap();
        source.add_category("Food", None).await.unwrap();

        let up = push_all(&source, &cloud).await.unwrap();
        assert_eq!(up.records, 2);

        let down = pull_all(&target, &cloud).await.unwrap();
        assert_eq!(down.records, 2);

        let pulled = target.product(&p.id).await.unwrap();
        assert_eq!(pulled.product_name, "Rice");
        assert_eq!(target.categories().await.len(), 1);
    }

    #[tokio::test]
    async fn pull_settings_feeds_counter_mirrors() {
        let store = store("dev-a").await;
        let cloud = MemoryCloud::new();
        cloud
            .set_setting("seq_return", &serde_json::json!(30))
            .await
            .unwrap();

        pull_settings(&store, &cloud).await.unwrap();

        let number = store
            .next_document_number(SequenceKind::Return)
            .await
            .unwrap();
        assert_eq!(number, "R0031");
    }

    #[tokio::test]
    async fn pull_keeps_locally_newer_close_record() {
        let store = store("dev-a").await;
        let cloud = MemoryCloud::new();

        cloud
            .set_setting(
                makhzan_store::closing::LAST_MONTH_CLOSING_KEY,
                &serde_json::json!({"month": "2026-07", "closedAt": "2026-07-31T00:00:00Z", "productCount": 1}),
            )
            .await
            .unwrap();

        // Local close happens after the cloud value was written.
        store.close_month().await.unwrap();
        pull_settings(&store, &cloud).await.unwrap();

        let closing = store.last_month_closing().await.unwrap().unwrap();
        assert_ne!(closing.month, "2026-07");
    }
}
