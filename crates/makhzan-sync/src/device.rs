//! # Device Presence and Commands
//!
//! Publishes this device's heartbeat document and executes remote commands
//! written into it by the backoffice.
//!
//! ## Heartbeat Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  every heartbeat_interval (default 60s):                                │
//! │                                                                         │
//! │  1. get_device(device_id)          read our cloud document              │
//! │  2. command?                                                            │
//! │       force_resync     → clear products/transactions/branches,          │
//! │                          pull them fresh, ack with commandStatus        │
//! │       wipe_and_logout  → wipe the local database, ack                   │
//! │  3. upsert_device                  lastActive, record counters,         │
//! │                                    app version, cleared command         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The ack (`commandStatus`) is what stops a command from replaying on the
//! next beat: the command field is cleared in the same upsert.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use makhzan_core::{CommandStatus, DeviceCommand, DeviceStatus, DeviceSyncStatus, EntityKind};
use makhzan_store::Store;

use crate::bulk;
use crate::cloud::CloudClient;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

/// Publishes heartbeats and executes device commands.
pub struct DeviceWorker {
    store: Arc<Store>,
    cloud: Arc<dyn CloudClient>,
    config: Arc<SyncConfig>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling the device worker.
#[derive(Clone)]
pub struct DeviceWorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl DeviceWorkerHandle {
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelClosed("device worker shutdown".into()))
    }
}

impl DeviceWorker {
    pub fn new(
        store: Arc<Store>,
        cloud: Arc<dyn CloudClient>,
        config: Arc<SyncConfig>,
    ) -> (Self, DeviceWorkerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let worker = DeviceWorker {
            store,
            cloud,
            config,
            shutdown_rx,
        };
        (worker, DeviceWorkerHandle { shutdown_tx })
    }

    /// Runs until shutdown.
    pub async fn run(mut self) {
        info!(
            interval = ?self.config.timing.heartbeat_interval(),
            "Device worker starting"
        );

        let mut interval = tokio::time::interval(self.config.timing.heartbeat_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.beat().await;
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Device worker shutting down");
                    break;
                }
            }
        }
    }

    /// One heartbeat: poll for a command, execute it, publish presence.
    pub async fn beat(&self) {
        let device_id = self.config.device_id();

        let existing = match self.cloud.get_device(device_id).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "Heartbeat read failed, skipping beat");
                return;
            }
        };
        let mut status: DeviceStatus = existing
            .and_then(|doc| serde_json::from_value(doc).ok())
            .unwrap_or_else(|| DeviceStatus {
                device_id: device_id.to_string(),
                last_active: Utc::now(),
                sync_status: DeviceSyncStatus::default(),
                app_version: None,
                username: None,
                role: None,
                command: DeviceCommand::None,
                command_status: None,
            });

        if status.command != DeviceCommand::None {
            let command = status.command;
            let result = self.execute(command).await;
            status.command = DeviceCommand::None;
            status.command_status = Some(match result {
                Ok(()) => {
                    info!(?command, "Device command executed");
                    CommandStatus {
                        state: "success".into(),
                        message: None,
                        timestamp: Utc::now(),
                    }
                }
                Err(e) => {
                    warn!(?command, error = %e, "Device command failed");
                    CommandStatus {
                        state: "error".into(),
                        message: Some(e.to_string()),
                        timestamp: Utc::now(),
                    }
                }
            });
        }

        status.device_id = device_id.to_string();
        status.last_active = Utc::now();
        status.app_version = Some(env!("CARGO_PKG_VERSION").to_string());
        status.sync_status = DeviceSyncStatus {
            products_count: self.store.record_count(EntityKind::Products).await as u64,
            transactions_count: self.store.record_count(EntityKind::Transactions).await as u64,
            last_sync_timestamp: Some(Utc::now().timestamp_millis()),
        };

        let doc = match serde_json::to_value(&status) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "Could not serialize device status");
                return;
            }
        };
        if let Err(e) = self.cloud.upsert_device(device_id, &doc).await {
            warn!(error = %e, "Heartbeat write failed");
        }
    }

    async fn execute(&self, command: DeviceCommand) -> SyncResult<()> {
        match command {
            DeviceCommand::None => Ok(()),
            DeviceCommand::ForceResync => {
                info!("Executing force_resync");
                self.store.clear_for_resync().await?;
                bulk::pull_kinds(&self.store, self.cloud.as_ref(), &EntityKind::FORCE_RESYNC)
                    .await?;
                Ok(())
            }
            DeviceCommand::WipeAndLogout => {
                info!("Executing wipe_and_logout");
                self.store.wipe().await?;
                Ok(())
            }
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
    use makhzan_store::{ProductDraft, StoreConfig};

    async fn setup() -> (Arc<Store>, Arc<MemoryCloud>, DeviceWorker) {
        let (store, _outbound) = Store::open(StoreConfig::in_memory("dev-1")).await.unwrap();
        let store = Arc::new(store);
        let cloud = Arc::new(MemoryCloud::new());
        let mut config = SyncConfig::default();
        config.device.id = "dev-1".into();

        let (worker, _handle) =
            DeviceWorker::new(store.clone(), cloud.clone(), Arc::new(config));
        (store, cloud, worker)
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
    async fn heartbeat_publishes_counters() {
        let (store, cloud, worker) = setup().await;
        store.add_product(rice()).await.unwrap();

        worker.beat().await;

        let doc = cloud.get_device("dev-1").await.unwrap().unwrap();
        let status: DeviceStatus = serde_json::from_value(doc).unwrap();
        assert_eq!(status.sync_status.products_count, 1);
        assert_eq!(status.command, DeviceCommand::None);
        assert!(status.sync_status.last_sync_timestamp.is_some());
    }

    #[tokio::test]
    async fn force_resync_pulls_fresh_and_acks() {
        let (store, cloud, worker) = setup().await;
        store.add_product(rice()).await.unwrap();

        // The cloud has a different product catalog.
        cloud.seed(
            "products",
            "cloud-p",
            serde_json::json!({
                "id": "cloud-p", "productCode": "C-1", "productName": "Cloud Rice",
                "price": 9.0, "createdAt": "2026-01-01T00:00:00Z",
                "updatedAt": "2026-01-01T00:00:00Z",
            }),
        );
        cloud.set_device(
            "dev-1",
            serde_json::json!({
                "deviceId": "dev-1",
                "lastActive": "2026-01-01T00:00:00Z",
                "command": "force_resync",
            }),
        );

        worker.beat().await;

        // Local catalog now mirrors the cloud.
        let products = store.products().await;
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].id, "cloud-p");

        // Command acked and cleared.
        let doc = cloud.get_device("dev-1").await.unwrap().unwrap();
        let status: DeviceStatus = serde_json::from_value(doc).unwrap();
        assert_eq!(status.command, DeviceCommand::None);
        assert_eq!(status.command_status.unwrap().state, "success");
    }

    #[tokio::test]
    async fn wipe_and_logout_empties_the_store() {
        let (store, cloud, worker) = setup().await;
        store.add_product(rice()).await.unwrap();
        cloud.set_device(
            "dev-1",
            serde_json::json!({
                "deviceId": "dev-1",
                "lastActive": "2026-01-01T00:00:00Z",
                "command": "wipe_and_logout",
            }),
        );

        worker.beat().await;

        assert!(store.products().await.is_empty());
        let doc = cloud.get_device("dev-1").await.unwrap().unwrap();
        let status: DeviceStatus = serde_json::from_value(doc).unwrap();
        assert_eq!(status.command_status.unwrap().state, "success");
    }
}
