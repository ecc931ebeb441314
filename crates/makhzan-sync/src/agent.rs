//! # Sync Agent
//!
//! Orchestrator for the sync engine: wires the store's outbound channel and
//! the cloud client into the worker set and manages their lifecycle.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SyncAgent                                      │
//! │                                                                         │
//! │  start():                                                               │
//! │    1. catch-up      pull_settings + pull_all (when reachable)           │
//! │    2. spawn         PushWorker     ← store's OutboundMutation channel   │
//! │                     RetryWorker    ← startup/reconnect/interval drains  │
//! │                     InboundWorker  ← cloud subscription events          │
//! │                     DeviceWorker   ← heartbeat + command execution      │
//! │                                                                         │
//! │  A degraded store (in-memory fallback after a failed open) never        │
//! │  starts sync: pushing a half-empty dataset would prune the cloud.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use makhzan_store::{OutboundMutation, Store};

use crate::bulk;
use crate::cloud::CloudClient;
use crate::config::SyncConfig;
use crate::device::{DeviceWorker, DeviceWorkerHandle};
use crate::error::{SyncError, SyncResult};
use crate::inbound::{InboundWorker, InboundWorkerHandle};
use crate::push::{PushWorker, PushWorkerHandle};
use crate::retry::{RetryWorker, RetryWorkerHandle};

// =============================================================================
// Sync Status
// =============================================================================

/// Current sync status for external queries.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    /// Whether the cloud is currently reachable.
    pub is_connected: bool,

    /// Entries waiting in the retry queue.
    pub pending_count: i64,

    /// Whether the engine is running at all.
    pub is_running: bool,

    /// Device identity used for pushes and presence.
    pub device_id: String,
}

// =============================================================================
// Sync Agent
// =============================================================================

struct WorkerHandles {
    push: PushWorkerHandle,
    retry: RetryWorkerHandle,
    inbound: InboundWorkerHandle,
    device: DeviceWorkerHandle,
}

/// Orchestrates all sync workers.
pub struct SyncAgent {
    store: Arc<Store>,
    cloud: Arc<dyn CloudClient>,
    config: Arc<SyncConfig>,

    /// Consumed by start(); the push worker owns it afterwards.
    outbound_rx: Option<mpsc::UnboundedReceiver<OutboundMutation>>,

    handles: Option<WorkerHandles>,
}

impl std::fmt::Debug for SyncAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncAgent")
            .field("config", &self.config)
            .field("started", &self.handles.is_some())
            .finish_non_exhaustive()
    }
}

impl SyncAgent {
    pub fn new(
        store: Arc<Store>,
        cloud: Arc<dyn CloudClient>,
        config: SyncConfig,
        outbound_rx: mpsc::UnboundedReceiver<OutboundMutation>,
    ) -> Self {
        SyncAgent {
            store,
            cloud,
            config: Arc::new(config),
            outbound_rx: Some(outbound_rx),
            handles: None,
        }
    }

    /// Starts the sync engine.
    ///
    /// Runs the startup catch-up (settings, full pull) when the cloud is
    /// reachable, then spawns the workers. Safe to call when sync is
    /// disabled; it simply does nothing.
    pub async fn start(&mut self) -> SyncResult<()> {
        if !self.config.is_sync_enabled() {
            info!("Sync disabled by configuration");
            return Ok(());
        }
        if self.store.is_degraded() {
            warn!("Store is degraded (in-memory fallback), sync will not start");
            return Ok(());
        }
        self.config.validate()?;

        let outbound_rx = self
            .outbound_rx
            .take()
            .ok_or_else(|| SyncError::InvalidConfig("Sync agent already started".into()))?;

        info!(device_id = %self.config.device_id(), "Starting sync engine");

        // Startup catch-up. Best effort: an unreachable cloud is the normal
        // offline case, and the retry/inbound workers cover it later.
        if self.cloud.is_online().await {
            if let Err(e) = bulk::pull_settings(&self.store, self.cloud.as_ref()).await {
                warn!(error = %e, "Startup settings pull failed");
            }
            if let Err(e) = bulk::pull_all(&self.store, self.cloud.as_ref()).await {
                warn!(error = %e, "Startup catch-up pull failed");
            }
        } else {
            info!("Cloud unreachable at startup, catch-up deferred to reconnect");
        }

        let (push, push_handle) = PushWorker::new(
            self.store.clone(),
            self.cloud.clone(),
            outbound_rx,
            self.config.timing.push_timeout(),
        );
        let (retry, retry_handle) = RetryWorker::new(
            self.store.clone(),
            self.cloud.clone(),
            self.config.timing.push_timeout(),
            self.config.timing.drain_interval(),
            self.config.timing.retry_batch_size,
        );
        let (inbound, inbound_handle) =
            InboundWorker::new(self.store.clone(), self.cloud.clone());
        let (device, device_handle) = DeviceWorker::new(
            self.store.clone(),
            self.cloud.clone(),
            self.config.clone(),
        );

        tokio::spawn(push.run());
        tokio::spawn(retry.run());
        tokio::spawn(inbound.run());
        tokio::spawn(device.run());

        self.handles = Some(WorkerHandles {
            push: push_handle,
            retry: retry_handle,
            inbound: inbound_handle,
            device: device_handle,
        });

        info!("Sync engine started");
        Ok(())
    }

    /// Stops all workers gracefully.
    pub async fn shutdown(&mut self) {
        if let Some(handles) = self.handles.take() {
            info!("Shutting down sync engine");
            let _ = handles.push.shutdown().await;
            let _ = handles.retry.shutdown().await;
            let _ = handles.inbound.shutdown().await;
            let _ = handles.device.shutdown().await;
        }
    }

    /// Current sync status.
    pub async fn status(&self) -> SyncStatus {
        let pending_count = self
            .store
            .db()
            .retry_queue()
            .count()
            .await
            .unwrap_or_default();
        SyncStatus {
            is_connected: self.cloud.is_online().await,
            pending_count,
            is_running: self.handles.is_some(),
            device_id: self.config.device_id().to_string(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for assembling a [`SyncAgent`].
pub struct SyncAgentBuilder {
    config: SyncConfig,
    store: Option<Arc<Store>>,
    cloud: Option<Arc<dyn CloudClient>>,
    outbound_rx: Option<mpsc::UnboundedReceiver<OutboundMutation>>,
}

impl SyncAgentBuilder {
    pub fn new(config: SyncConfig) -> Self {
        SyncAgentBuilder {
            config,
            store: None,
            cloud: None,
            outbound_rx: None,
        }
    }

    pub fn with_store(mut self, store: Arc<Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_cloud(mut self, cloud: Arc<dyn CloudClient>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    pub fn with_outbound(
        mut self,
        outbound_rx: mpsc::UnboundedReceiver<OutboundMutation>,
    ) -> Self {
        self.outbound_rx = Some(outbound_rx);
        self
    }

    pub fn build(self) -> SyncResult<SyncAgent> {
        let store = self
            .store
            .ok_or_else(|| SyncError::InvalidConfig("Store required".into()))?;
        let cloud = self
            .cloud
            .ok_or_else(|| SyncError::InvalidConfig("Cloud client required".into()))?;
        let outbound_rx = self
            .outbound_rx
            .ok_or_else(|| SyncError::InvalidConfig("Outbound channel required".into()))?;

        Ok(SyncAgent::new(store, cloud, self.config, outbound_rx))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCloud;
    use makhzan_store::StoreConfig;

    #[tokio::test]
    async fn builder_requires_all_parts() {
        let err = SyncAgentBuilder::new(SyncConfig::default())
            .build()
            .unwrap_err();
        assert!(err.is_config_error());

        let (store, outbound_rx) = Store::open(StoreConfig::in_memory("dev-1"))
            .await
            .unwrap();
        let agent = SyncAgentBuilder::new(SyncConfig::default())
            .with_store(Arc::new(store))
            .with_cloud(Arc::new(MemoryCloud::new()))
            .with_outbound(outbound_rx)
            .build();
        assert!(agent.is_ok());
    }

    #[tokio::test]
    async fn disabled_sync_never_spawns_workers() {
        let (store, outbound_rx) = Store::open(StoreConfig::in_memory("dev-1"))
            .await
            .unwrap();
        let mut config = SyncConfig::default();
        config.cloud.enabled = false;

        let mut agent = SyncAgent::new(
            Arc::new(store),
            Arc::new(MemoryCloud::new()),
            config,
            outbound_rx,
        );
        agent.start().await.unwrap();

        let status = agent.status().await;
        assert!(!status.is_running);
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let (store, outbound_rx) = Store::open(StoreConfig::in_memory("dev-1"))
            .await
            .unwrap();
        let mut agent = SyncAgent::new(
            Arc::new(store),
            Arc::new(MemoryCloud::new()),
            SyncConfig::default(),
            outbound_rx,
        );

        agent.start().await.unwrap();
        assert!(agent.start().await.is_err());
        agent.shutdown().await;
    }
}
