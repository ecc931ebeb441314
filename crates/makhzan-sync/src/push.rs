//! # Push Worker
//!
//! Phase 2 of every write: consumes [`OutboundMutation`]s from the store and
//! pushes them to the cloud, best effort.
//!
//! ## Failure Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  OutboundMutation                                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  timeout(push_timeout, cloud.push(...))                                 │
//! │       │                                                                 │
//! │       ├── Ok        → done (deletes: unmark guard after short grace)    │
//! │       │                                                                 │
//! │       └── Err/timed out                                                 │
//! │            → retry_queue.enqueue(kind, id, op, payload)                 │
//! │              (deletes: unmark guard after LONGER grace — the retry      │
//! │               queue still owns the delete)                              │
//! │                                                                         │
//! │  The caller saw Ok long ago; nothing here can fail the write.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Enqueueing coalesces per (kind, record id): ten offline edits of one
//! product become one retry entry carrying the final document.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use makhzan_core::RetryOp;
use makhzan_store::{OutboundMutation, Store};

use crate::cloud::CloudClient;
use crate::error::{SyncError, SyncResult};
use crate::retry::SETTINGS_KIND;

/// Consumes the store's outbound channel and pushes to the cloud.
pub struct PushWorker {
    store: Arc<Store>,
    cloud: Arc<dyn CloudClient>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundMutation>,
    push_timeout: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling the push worker.
#[derive(Clone)]
pub struct PushWorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl PushWorkerHandle {
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelClosed("push worker shutdown".into()))
    }
}

impl PushWorker {
    pub fn new(
        store: Arc<Store>,
        cloud: Arc<dyn CloudClient>,
        outbound_rx: mpsc::UnboundedReceiver<OutboundMutation>,
        push_timeout: Duration,
    ) -> (Self, PushWorkerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let worker = PushWorker {
            store,
            cloud,
            outbound_rx,
            push_timeout,
            shutdown_rx,
        };
        (worker, PushWorkerHandle { shutdown_tx })
    }

    /// Runs until shutdown or the store drops its sender.
    pub async fn run(mut self) {
        info!("Push worker starting");

        loop {
            tokio::select! {
                mutation = self.outbound_rx.recv() => {
                    match mutation {
                        Some(m) => self.handle(m).await,
                        None => {
                            info!("Outbound channel closed, push worker stopping");
                            break;
                        }
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Push worker shutting down");
                    break;
                }
            }
        }
    }

    async fn handle(&self, mutation: OutboundMutation) {
        match mutation {
            OutboundMutation::Record {
                kind,
                record_id,
                op,
                payload,
            } => {
                let collection = kind.collection();
                let result = match (&op, &payload) {
                    (RetryOp::Upsert, Some(doc)) => {
                        self.with_timeout(self.cloud.push(collection, &record_id, doc))
                            .await
                    }
                    (RetryOp::Delete, _) => {
                        self.with_timeout(self.cloud.delete(collection, &record_id))
                            .await
                    }
                    (RetryOp::Upsert, None) => {
                        warn!(collection, id = %record_id, "Upsert without payload, dropping");
                        return;
                    }
                };

                match result {
                    Ok(()) => {
                        debug!(collection, id = %record_id, op = op.as_str(), "Pushed");
                        if op == RetryOp::Delete {
                            self.store.guard().unmark_after(
                                &record_id,
                                self.store.config().delete_grace_success,
                            );
                        }
                    }
                    Err(e) => {
                        warn!(
                            collection,
                            id = %record_id,
                            op = op.as_str(),
                            error = %e,
                            "Push failed, parking in retry queue"
                        );
                        let payload_str = payload.as_ref().map(|v| v.to_string());
                        if let Err(db_err) = self
                            .store
                            .db()
                            .retry_queue()
                            .enqueue(collection, &record_id, op, payload_str.as_deref())
                            .await
                        {
                            warn!(error = %db_err, "Could not enqueue retry entry");
                        }
                        if op == RetryOp::Delete {
                            self.store.guard().unmark_after(
                                &record_id,
                                self.store.config().delete_grace_failure,
                            );
                        }
                    }
                }
            }

            OutboundMutation::Setting { key, value } => {
                match self.with_timeout(self.cloud.set_setting(&key, &value)).await {
                    Ok(()) => debug!(key = %key, "Pushed setting"),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Setting push failed, parking in retry queue");
                        if let Err(db_err) = self
                            .store
                            .db()
                            .retry_queue()
                            .enqueue(SETTINGS_KIND, &key, RetryOp::Upsert, Some(&value.to_string()))
                            .await
                        {
                            warn!(error = %db_err, "Could not enqueue retry entry");
                        }
                    }
                }
            }
        }
    }

    async fn with_timeout(
        &self,
        fut: impl std::future::Future<Output = SyncResult<()>>,
    ) -> SyncResult<()> {
        match timeout(self.push_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(self.push_timeout.as_secs())),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCloud;
    use makhzan_core::EntityKind;
    use makhzan_store::{ProductDraft, StoreConfig};

    async fn setup() -> (Arc<Store>, Arc<MemoryCloud>, PushWorkerHandle) {
        let (store, outbound_rx) = Store::open(StoreConfig::in_memory("dev-push"))
            .await
            .unwrap();
        let store = Arc::new(store);
        let cloud = Arc::new(MemoryCloud::new());

        let (worker, handle) = PushWorker::new(
            store.clone(),
            cloud.clone(),
            outbound_rx,
            Duration::from_secs(10),
        );
        tokio::spawn(worker.run());
        (store, cloud, handle)
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
    async fn successful_push_reaches_the_cloud() {
        let (store, cloud, _handle) = setup().await;
        let p = store.add_product(rice()).await.unwrap();

        // Give the worker a moment to drain the channel.
        tokio::task::yield_now().await;
        for _ in 0..50 {
            if cloud.contains("products", &p.id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("product never reached the cloud");
    }

    #[tokio::test]
    async fn failed_push_lands_in_retry_queue() {
        let (store, cloud, _handle) = setup().await;
        cloud.set_online(false);

        let p = store.add_product(rice()).await.unwrap();

        for _ in 0..50 {
            let pending = store.db().retry_queue().count().await.unwrap();
            if pending > 0 {
                let entries = store.db().retry_queue().oldest(10).await.unwrap();
                assert!(entries
                    .iter()
                    .any(|e| e.record_id == p.id && e.kind == EntityKind::Products.collection()));
                assert!(!cloud.contains("products", &p.id));
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("failed push never reached the retry queue");
    }
}
