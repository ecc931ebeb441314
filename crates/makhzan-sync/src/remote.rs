//! # WebSocket Cloud Client
//!
//! [`CloudClient`] implementation over the WebSocket transport.
//!
//! ## Request Correlation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  push("products", "p1", doc)                                            │
//! │       │                                                                 │
//! │       │ allocate request_id (atomic counter)                            │
//! │       │ park a oneshot sender under that id                             │
//! │       ▼                                                                 │
//! │  transport ───► { "type": "Push", "payload": { "requestId": 7, ... } }  │
//! │  transport ◄─── { "type": "Ack",  "payload": { "requestId": 7, ... } }  │
//! │       │                                                                 │
//! │       ▼ router matches requestId, completes the oneshot                 │
//! │  Ok(()) / Err(Rejected)                                                 │
//! │                                                                         │
//! │  Uncorrelated traffic (Batch, SettingChanged) fans out to the           │
//! │  RemoteEvent broadcast; TransportEvent::Up replays Hello + Subscribe    │
//! │  and broadcasts Connected so the retry worker drains immediately.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use makhzan_core::EntityKind;

use crate::cloud::{CloudClient, RemoteEvent};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    CloudMessage, DeletePayload, DeviceGetPayload, DeviceUpsertPayload, FetchPayload,
    PushPayload, SettingGetPayload, SettingSetPayload, SubscribePayload,
};
use crate::transport::{Transport, TransportConfig, TransportEvent, TransportHandle};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<CloudMessage>>>>;

/// Cloud backend reached over a WebSocket connection.
pub struct WsCloud {
    transport: TransportHandle,
    next_request_id: AtomicU64,
    pending: PendingMap,
    events_tx: broadcast::Sender<RemoteEvent>,
    request_timeout: Duration,
}

impl WsCloud {
    /// Spawns the transport and message router for the configured endpoint.
    ///
    /// Fails when no cloud URL is configured. The connection itself is
    /// established (and re-established) in the background.
    pub fn connect(config: &SyncConfig) -> SyncResult<Arc<WsCloud>> {
        let url = config
            .cloud
            .url
            .clone()
            .ok_or_else(|| SyncError::InvalidConfig("Cloud URL not configured".into()))?;

        let transport_config = TransportConfig::from_timing(url, &config.timing);
        let (transport, event_rx) = Transport::spawn(transport_config);
        let (events_tx, _) = broadcast::channel(256);

        let cloud = Arc::new(WsCloud {
            transport: transport.clone(),
            next_request_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            events_tx: events_tx.clone(),
            request_timeout: config.timing.push_timeout(),
        });

        tokio::spawn(Self::router(
            transport,
            event_rx,
            cloud.pending.clone(),
            events_tx,
            config.device_id().to_string(),
            config.device.name.clone(),
        ));

        Ok(cloud)
    }

    /// Routes transport events: replays the handshake on every reconnect,
    /// completes pending requests, fans out subscription traffic.
    async fn router(
        transport: TransportHandle,
        mut event_rx: mpsc::Receiver<TransportEvent>,
        pending: PendingMap,
        events_tx: broadcast::Sender<RemoteEvent>,
        device_id: String,
        device_name: String,
    ) {
        while let Some(event) = event_rx.recv().await {
            match event {
                TransportEvent::Up => {
                    let hello = CloudMessage::hello(&device_id, &device_name);
                    let subscribe = CloudMessage::Subscribe(SubscribePayload {
                        collections: EntityKind::ALL
                            .iter()
                            .map(|kind| kind.collection().to_string())
                            .collect(),
                    });
                    if transport.send(hello).await.is_err()
                        || transport.send(subscribe).await.is_err()
                    {
                        warn!("Transport gone during handshake, router stopping");
                        break;
                    }
                    // Requests parked across the outage will never be
                    // answered; dropping the senders fails them fast.
                    pending.lock().await.clear();
                    let _ = events_tx.send(RemoteEvent::Connected);
                }
                TransportEvent::Message(msg) => {
                    if let Some(request_id) = msg.request_id() {
                        match pending.lock().await.remove(&request_id) {
                            Some(tx) => {
                                let _ = tx.send(msg);
                            }
                            None => {
                                debug!(request_id, "Response for unknown request, dropping");
                            }
                        }
                        continue;
                    }

                    match msg {
                        CloudMessage::Batch(batch) => {
                            let _ = events_tx.send(RemoteEvent::Batch {
                                collection: batch.collection,
                                upserts: batch.upserts,
                                removed: batch.removed,
                            });
                        }
                        CloudMessage::SettingChanged(change) => {
                            let _ = events_tx.send(RemoteEvent::SettingChanged {
                                key: change.key,
                                value: change.value,
                                updated_at: change.updated_at,
                            });
                        }
                        CloudMessage::Welcome(welcome) => {
                            info!(server_id = %welcome.server_id, "Cloud handshake complete");
                        }
                        CloudMessage::Ping { timestamp } => {
                            let _ = transport.send(CloudMessage::Pong { timestamp }).await;
                        }
                        CloudMessage::Pong { .. } => {}
                        CloudMessage::Error { code, message } => {
                            warn!(code, message, "Cloud reported an error");
                        }
                        other => {
                            debug!(msg_type = other.type_name(), "Unexpected message, dropping");
                        }
                    }
                }
            }
        }
        info!("Cloud message router stopped");
    }

    /// Sends a correlated request and waits for its response.
    async fn request(
        &self,
        build: impl FnOnce(u64) -> CloudMessage,
    ) -> SyncResult<CloudMessage> {
        if !self.transport.is_connected().await {
            return Err(SyncError::Disconnected);
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id, tx);

        if let Err(e) = self.transport.send(build(request_id)).await {
            self.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            // Sender dropped: the router cleared pending on reconnect.
            Ok(Err(_)) => Err(SyncError::Disconnected),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(SyncError::Timeout(self.request_timeout.as_secs()))
            }
        }
    }

    fn expect_ack(response: CloudMessage, operation: &str) -> SyncResult<()> {
        match response {
            CloudMessage::Ack(ack) if ack.ok => Ok(()),
            CloudMessage::Ack(ack) => Err(SyncError::Rejected {
                operation: operation.to_string(),
                reason: ack.error.unwrap_or_else(|| "unspecified".into()),
            }),
            other => Err(SyncError::InvalidMessage(format!(
                "Expected Ack for {operation}, got {}",
                other.type_name()
            ))),
        }
    }
}

#[async_trait]
impl CloudClient for WsCloud {
    async fn push(
        &self,
        collection: &str,
        record_id: &str,
        document: &serde_json::Value,
    ) -> SyncResult<()> {
        let response = self
            .request(|request_id| {
                CloudMessage::Push(PushPayload {
                    request_id,
                    collection: collection.to_string(),
                    record_id: record_id.to_string(),
                    document: document.clone(),
                })
            })
            .await?;
        Self::expect_ack(response, "push")
    }

    async fn delete(&self, collection: &str, record_id: &str) -> SyncResult<()> {
        let response = self
            .request(|request_id| {
                CloudMessage::Delete(DeletePayload {
                    request_id,
                    collection: collection.to_string(),
                    record_id: record_id.to_string(),
                })
            })
            .await?;
        Self::expect_ack(response, "delete")
    }

    async fn fetch(&self, collection: &str) -> SyncResult<Vec<serde_json::Value>> {
        let response = self
            .request(|request_id| {
                CloudMessage::Fetch(FetchPayload {
                    request_id,
                    collection: collection.to_string(),
                })
            })
            .await?;
        match response {
            CloudMessage::Collection(payload) => Ok(payload.documents),
            other => Err(SyncError::InvalidMessage(format!(
                "Expected Collection, got {}",
                other.type_name()
            ))),
        }
    }

    async fn get_setting(
        &self,
        key: &str,
    ) -> SyncResult<Option<(serde_json::Value, Option<DateTime<Utc>>)>> {
        let response = self
            .request(|request_id| {
                CloudMessage::SettingGet(SettingGetPayload {
                    request_id,
                    key: key.to_string(),
                })
            })
            .await?;
        match response {
            CloudMessage::SettingValue(payload) => {
                Ok(payload.value.map(|value| (value, payload.updated_at)))
            }
            other => Err(SyncError::InvalidMessage(format!(
                "Expected SettingValue, got {}",
                other.type_name()
            ))),
        }
    }

    async fn set_setting(&self, key: &str, value: &serde_json::Value) -> SyncResult<()> {
        let response = self
            .request(|request_id| {
                CloudMessage::SettingSet(SettingSetPayload {
                    request_id,
                    key: key.to_string(),
                    value: value.clone(),
                })
            })
            .await?;
        Self::expect_ack(response, "setting set")
    }

    async fn get_device(&self, device_id: &str) -> SyncResult<Option<serde_json::Value>> {
        let response = self
            .request(|request_id| {
                CloudMessage::DeviceGet(DeviceGetPayload {
                    request_id,
                    device_id: device_id.to_string(),
                })
            })
            .await?;
        match response {
            CloudMessage::Device(payload) => Ok(payload.document),
            other => Err(SyncError::InvalidMessage(format!(
                "Expected Device, got {}",
                other.type_name()
            ))),
        }
    }

    async fn upsert_device(
        &self,
        device_id: &str,
        document: &serde_json::Value,
    ) -> SyncResult<()> {
        let response = self
            .request(|request_id| {
                CloudMessage::DeviceUpsert(DeviceUpsertPayload {
                    request_id,
                    device_id: device_id.to_string(),
                    document: document.clone(),
                })
            })
            .await?;
        Self::expect_ack(response, "device upsert")
    }

    fn events(&self) -> broadcast::Receiver<RemoteEvent> {
        self.events_tx.subscribe()
    }

    async fn is_online(&self) -> bool {
        self.transport.is_connected().await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AckPayload;

    #[test]
    fn positive_ack_is_ok() {
        let ack = CloudMessage::Ack(AckPayload {
            request_id: 1,
            ok: true,
            error: None,
        });
        assert!(WsCloud::expect_ack(ack, "push").is_ok());
    }

    #[test]
    fn negative_ack_is_a_rejection() {
        let ack = CloudMessage::Ack(AckPayload {
            request_id: 1,
            ok: false,
            error: Some("duplicate id".into()),
        });
        match WsCloud::expect_ack(ack, "push") {
            Err(SyncError::Rejected { operation, reason }) => {
                assert_eq!(operation, "push");
                assert_eq!(reason, "duplicate id");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn wrong_response_type_is_invalid() {
        let msg = CloudMessage::Pong {
            timestamp: "now".into(),
        };
        assert!(matches!(
            WsCloud::expect_ack(msg, "push"),
            Err(SyncError::InvalidMessage(_))
        ));
    }

    #[test]
    fn connect_requires_a_url() {
        let config = SyncConfig::default();
        assert!(config.cloud.url.is_none());
        // Fails before anything is spawned, so no runtime is needed.
        assert!(matches!(
            WsCloud::connect(&config),
            Err(SyncError::InvalidConfig(_))
        ));
    }
}
