//! # In-Memory Cloud
//!
//! A [`CloudClient`] backed by process-local maps. Two uses:
//!
//! - Tests: several stores share one `MemoryCloud` and converge through it,
//!   with failure injection for the offline paths.
//! - Offline development: the app runs with sync wired up but no network.
//!
//! Every successful write is echoed to all subscribers as a [`RemoteEvent`],
//! including the writer itself. The echo-back is deliberate: it is exactly
//! the traffic shape the deletion guard exists for, so tests exercise the
//! real race.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::cloud::{CloudClient, RemoteEvent};
use crate::error::{SyncError, SyncResult};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct State {
    collections: HashMap<String, HashMap<String, serde_json::Value>>,
    settings: HashMap<String, (serde_json::Value, DateTime<Utc>)>,
    devices: HashMap<String, serde_json::Value>,
}

/// Shared in-memory cloud backend.
pub struct MemoryCloud {
    state: Mutex<State>,
    events: broadcast::Sender<RemoteEvent>,
    online: AtomicBool,
}

impl MemoryCloud {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        MemoryCloud {
            state: Mutex::new(State::default()),
            events,
            online: AtomicBool::new(true),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_online(&self) -> SyncResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::Disconnected)
        }
    }

    fn emit(&self, event: RemoteEvent) {
        let _ = self.events.send(event);
    }

    // -------------------------------------------------------------------------
    // Test controls
    // -------------------------------------------------------------------------

    /// Simulates losing / regaining the network. Going back online emits
    /// [`RemoteEvent::Connected`] so drains trigger like a real reconnect.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        if online {
            self.emit(RemoteEvent::Connected);
        }
    }

    /// Seeds a document without emitting an event (pre-existing cloud state).
    pub fn seed(&self, collection: &str, record_id: &str, document: serde_json::Value) {
        self.lock()
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(record_id.to_string(), document);
    }

    /// Current documents of a collection (assertions).
    pub fn documents(&self, collection: &str) -> Vec<serde_json::Value> {
        self.lock()
            .collections
            .get(collection)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether one document exists (assertions).
    pub fn contains(&self, collection: &str, record_id: &str) -> bool {
        self.lock()
            .collections
            .get(collection)
            .is_some_and(|m| m.contains_key(record_id))
    }

    /// Writes a device document directly and emits nothing (a backoffice
    /// setting a command, in tests).
    pub fn set_device(&self, device_id: &str, document: serde_json::Value) {
        self.lock().devices.insert(device_id.to_string(), document);
    }
}

impl Default for MemoryCloud {
    fn default() -> Self {
        MemoryCloud::new()
    }
}

#[async_trait]
impl CloudClient for MemoryCloud {
    async fn push(
        &self,
        collection: &str,
        record_id: &str,
        document: &serde_json::Value,
    ) -> SyncResult<()> {
        self.check_online()?;
        self.lock()
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(record_id.to_string(), document.clone());
        self.emit(RemoteEvent::Batch {
            collection: collection.to_string(),
            upserts: vec![document.clone()],
            removed: vec![],
        });
        Ok(())
    }

    async fn delete(&self, collection: &str, record_id: &str) -> SyncResult<()> {
        self.check_online()?;
        self.lock()
            .collections
            .entry(collection.to_string())
            .or_default()
            .remove(record_id);
        self.emit(RemoteEvent::Batch {
            collection: collection.to_string(),
            upserts: vec![],
            removed: vec![record_id.to_string()],
        });
        Ok(())
    }

    async fn fetch(&self, collection: &str) -> SyncResult<Vec<serde_json::Value>> {
        self.check_online()?;
        Ok(self.documents(collection))
    }

    async fn get_setting(
        &self,
        key: &str,
    ) -> SyncResult<Option<(serde_json::Value, Option<DateTime<Utc>>)>> {
        self.check_online()?;
        Ok(self
            .lock()
            .settings
            .get(key)
            .map(|(v, t)| (v.clone(), Some(*t))))
    }

    async fn set_setting(&self, key: &str, value: &serde_json::Value) -> SyncResult<()> {
        self.check_online()?;
        let now = Utc::now();
        self.lock()
            .settings
            .insert(key.to_string(), (value.clone(), now));
        self.emit(RemoteEvent::SettingChanged {
            key: key.to_string(),
            value: value.clone(),
            updated_at: Some(now),
        });
        Ok(())
    }

    async fn get_device(&self, device_id: &str) -> SyncResult<Option<serde_json::Value>> {
        self.check_online()?;
        Ok(self.lock().devices.get(device_id).cloned())
    }

    async fn upsert_device(
        &self,
        device_id: &str,
        document: &serde_json::Value,
    ) -> SyncResult<()> {
        self.check_online()?;
        self.lock()
            .devices
            .insert(device_id.to_string(), document.clone());
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<RemoteEvent> {
        self.events.subscribe()
    }

    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_is_echoed_to_subscribers() {
        let cloud = MemoryCloud::new();
        let mut events = cloud.events();

        let doc = serde_json::json!({"id": "p1"});
        cloud.push("products", "p1", &doc).await.unwrap();

        match events.recv().await.unwrap() {
            RemoteEvent::Batch {
                collection,
                upserts,
                removed,
            } => {
                assert_eq!(collection, "products");
                assert_eq!(upserts, vec![doc]);
                assert!(removed.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn offline_writes_fail_and_reconnect_announces() {
        let cloud = MemoryCloud::new();
        cloud.set_online(false);

        let err = cloud
            .push("products", "p1", &serde_json::json!({"id": "p1"}))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!cloud.contains("products", "p1"));

        let mut events = cloud.events();
        cloud.set_online(true);
        assert!(matches!(
            events.recv().await.unwrap(),
            RemoteEvent::Connected
        ));
    }

    #[tokio::test]
    async fn settings_carry_write_time() {
        let cloud = MemoryCloud::new();
        cloud
            .set_setting("seq_issue", &serde_json::json!(16))
            .await
            .unwrap();

        let (value, time) = cloud.get_setting("seq_issue").await.unwrap().unwrap();
        assert_eq!(value, serde_json::json!(16));
        assert!(time.is_some());
    }
}
