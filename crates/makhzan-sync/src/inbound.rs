//! # Inbound Handler
//!
//! Applies cloud-initiated traffic to the local store.
//!
//! ## Batch Application
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  RemoteEvent::Batch { collection, upserts, removed }                    │
//! │       │                                                                 │
//! │       ▼ EntityKind::from_collection (unknown → warn, drop)              │
//! │                                                                         │
//! │  store.apply_remote_batch(kind, upserts, removed)                       │
//! │    • deletion-guarded ids skipped (resurrection protection)             │
//! │    • malformed documents skipped with a warning                         │
//! │    • one event pair for the whole batch                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Settings Merge
//! Sequence counters (`seq_*`) feed the cloud mirror, which only moves
//! forward. Every other key merges local-wins-if-newer by write time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use makhzan_core::{EntityKind, SequenceKind};
use makhzan_store::Store;

use crate::cloud::{CloudClient, RemoteEvent};
use crate::error::{SyncError, SyncResult};

/// Applies subscription traffic to the store.
pub struct InboundWorker {
    store: Arc<Store>,
    cloud: Arc<dyn CloudClient>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling the inbound worker.
#[derive(Clone)]
pub struct InboundWorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl InboundWorkerHandle {
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelClosed("inbound worker shutdown".into()))
    }
}

impl InboundWorker {
    pub fn new(store: Arc<Store>, cloud: Arc<dyn CloudClient>) -> (Self, InboundWorkerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let worker = InboundWorker {
            store,
            cloud,
            shutdown_rx,
        };
        (worker, InboundWorkerHandle { shutdown_tx })
    }

    /// Runs until shutdown or the event stream closes.
    pub async fn run(mut self) {
        info!("Inbound handler starting");
        let mut events = self.cloud.events();

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(RemoteEvent::Batch { collection, upserts, removed }) => {
                            self.apply_batch(&collection, upserts, removed).await;
                        }
                        Ok(RemoteEvent::SettingChanged { key, value, updated_at }) => {
                            self.apply_setting(&key, value, updated_at).await;
                        }
                        Ok(RemoteEvent::Connected) => {
                            debug!("Connection established");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "Inbound handler lagged, some batches missed");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            info!("Cloud event stream closed, inbound handler stopping");
                            break;
                        }
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Inbound handler shutting down");
                    break;
                }
            }
        }
    }

    async fn apply_batch(
        &self,
        collection: &str,
        upserts: Vec<serde_json::Value>,
        removed: Vec<String>,
    ) {
        let Some(kind) = EntityKind::from_collection(collection) else {
            warn!(collection, "Batch for unknown collection, dropping");
            return;
        };

        let pairs: Vec<(String, serde_json::Value)> = upserts
            .into_iter()
            .filter_map(|doc| {
                match doc.get("id").and_then(|v| v.as_str()) {
                    Some(id) => Some((id.to_string(), doc)),
                    None => {
                        warn!(collection, "Remote document without id, dropping");
                        None
                    }
                }
            })
            .collect();

        match self.store.apply_remote_batch(kind, pairs, removed).await {
            Ok(stats) => {
                debug!(
                    collection,
                    applied = stats.applied,
                    skipped = stats.skipped,
                    "Applied remote batch"
                );
            }
            Err(e) => warn!(collection, error = %e, "Failed to apply remote batch"),
        }
    }

    async fn apply_setting(
        &self,
        key: &str,
        value: serde_json::Value,
        updated_at: Option<DateTime<Utc>>,
    ) {
        // Sequence counters feed the forward-only cloud mirror.
        if let Some(kind) = sequence_kind_for_key(key) {
            if let Some(counter) = value.as_u64() {
                let counter = counter.min(u64::from(u32::MAX)) as u32;
                if let Err(e) = self.store.note_cloud_counter(kind, counter).await {
                    warn!(key, error = %e, "Failed to record cloud counter");
                }
            } else {
                warn!(key, "Cloud counter is not a number, ignoring");
            }
            return;
        }

        // Everything else: local wins if newer.
        let local = match self.store.db().settings().get_with_time(key).await {
            Ok(local) => local,
            Err(e) => {
                warn!(key, error = %e, "Failed to read local setting");
                return;
            }
        };
        if let (Some((_, local_time)), Some(remote_time)) = (&local, updated_at) {
            if *local_time >= remote_time {
                debug!(key, "Local setting is newer, keeping it");
                return;
            }
        }
        if let Err(e) = self.store.db().settings().set(key, &value).await {
            warn!(key, error = %e, "Failed to apply remote setting");
        }
    }
}

fn sequence_kind_for_key(key: &str) -> Option<SequenceKind> {
    SequenceKind::ALL
        .into_iter()
        .find(|kind| kind.counter_key() == key)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCloud;
    use makhzan_store::StoreConfig;
    use std::time::Duration;

    async fn setup() -> (Arc<Store>, Arc<MemoryCloud>, InboundWorkerHandle) {
        let (store, _outbound) = Store::open(StoreConfig::in_memory("dev-inbound"))
            .await
            .unwrap();
        let store = Arc::new(store);
        let cloud = Arc::new(MemoryCloud::new());

        let (worker, handle) = InboundWorker::new(store.clone(), cloud.clone());
        tokio::spawn(worker.run());
        tokio::task::yield_now().await;
        (store, cloud, handle)
    }

    #[tokio::test]
    async fn remote_push_shows_up_locally() {
        let (store, cloud, _handle) = setup().await;

        cloud
            .push(
                "categories",
                "c1",
                &serde_json::json!({
                    "id": "c1", "name": "Food", "createdAt": "2026-01-01T00:00:00Z"
                }),
            )
            .await
            .unwrap();

        for _ in 0..50 {
            if !store.categories().await.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("remote category never arrived");
    }

    #[tokio::test]
    async fn cloud_counter_feeds_the_mirror() {
        let (store, cloud, _handle) = setup().await;

        cloud
            .set_setting("seq_issue", &serde_json::json!(15))
            .await
            .unwrap();

        for _ in 0..50 {
            let mirror = store.db().settings().get("seq_issue_cloud").await.unwrap();
            if mirror == Some(serde_json::json!(15)) {
                // Allocation now continues past the cloud's counter.
                let number = store
                    .next_document_number(SequenceKind::Issue)
                    .await
                    .unwrap();
                assert_eq!(number, "SW0016");
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("cloud counter never reached the mirror");
    }

    #[tokio::test]
    async fn newer_local_setting_survives_a_stale_echo() {
        let (store, _cloud, handle) = setup().await;
        let _ = handle; // worker running

        store
            .db()
            .settings()
            .set("display_name", &serde_json::json!("fresh"))
            .await
            .unwrap();

        // A remote change that predates the local write must lose.
        let inbound = InboundWorker {
            store: store.clone(),
            cloud: Arc::new(MemoryCloud::new()),
            shutdown_rx: mpsc::channel(1).1,
        };
        inbound
            .apply_setting(
                "display_name",
                serde_json::json!("stale"),
                Some(Utc::now() - chrono::Duration::hours(1)),
            )
            .await;

        assert_eq!(
            store.db().settings().get("display_name").await.unwrap(),
            Some(serde_json::json!("fresh"))
        );
    }
}
