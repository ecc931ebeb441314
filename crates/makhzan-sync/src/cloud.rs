//! # Cloud Client Interface
//!
//! The seam between the sync workers and the cloud backend. Workers only
//! ever talk to a `dyn CloudClient`; the WebSocket implementation lives in
//! [`crate::remote`] and the in-memory one (tests, offline development) in
//! [`crate::memory`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::error::SyncResult;

/// Cloud-initiated traffic delivered to subscribers.
#[derive(Debug, Clone)]
pub enum RemoteEvent {
    /// A change batch for one collection.
    Batch {
        collection: String,
        upserts: Vec<serde_json::Value>,
        removed: Vec<String>,
    },

    /// A settings key changed in the cloud.
    SettingChanged {
        key: String,
        value: serde_json::Value,
        updated_at: Option<DateTime<Utc>>,
    },

    /// The connection (re-)established. Triggers a retry queue drain.
    Connected,
}

/// Operations the sync engine needs from a cloud backend.
///
/// Every call is fallible and may hang on a dead network; callers wrap them
/// in timeouts. Implementations must be safe to share across workers.
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Upserts one document into a collection.
    async fn push(
        &self,
        collection: &str,
        record_id: &str,
        document: &serde_json::Value,
    ) -> SyncResult<()>;

    /// Deletes one document from a collection.
    async fn delete(&self, collection: &str, record_id: &str) -> SyncResult<()>;

    /// Fetches a full collection.
    async fn fetch(&self, collection: &str) -> SyncResult<Vec<serde_json::Value>>;

    /// Reads one settings key with its cloud write time.
    async fn get_setting(
        &self,
        key: &str,
    ) -> SyncResult<Option<(serde_json::Value, Option<DateTime<Utc>>)>>;

    /// Writes one settings key.
    async fn set_setting(&self, key: &str, value: &serde_json::Value) -> SyncResult<()>;

    /// Reads a device's status document (command polling).
    async fn get_device(&self, device_id: &str) -> SyncResult<Option<serde_json::Value>>;

    /// Publishes this device's status document.
    async fn upsert_device(
        &self,
        device_id: &str,
        document: &serde_json::Value,
    ) -> SyncResult<()>;

    /// Subscribes to cloud-initiated events.
    fn events(&self) -> broadcast::Receiver<RemoteEvent>;

    /// True when the backend is currently reachable.
    async fn is_online(&self) -> bool;
}
