//! # Cloud Protocol Messages
//!
//! Wire messages exchanged with the cloud endpoint over WebSocket.
//!
//! ## Message Flows
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  HANDSHAKE                                                              │
//! │  ─────────                                                              │
//! │  device ───► Hello { device_id, device_name, protocol_version }         │
//! │  cloud  ◄─── Welcome { server_id }                                      │
//! │                                                                         │
//! │  RECORD PUSH (request/response, correlated by request_id)               │
//! │  ────────────────────────────────────────────────────────               │
//! │  device ───► Push   { request_id, collection, record_id, document }     │
//! │  device ───► Delete { request_id, collection, record_id }               │
//! │  cloud  ◄─── Ack    { request_id, ok, error }                           │
//! │                                                                         │
//! │  BULK FETCH                                                             │
//! │  ──────────                                                             │
//! │  device ───► Fetch      { request_id, collection }                      │
//! │  cloud  ◄─── Collection { request_id, collection, documents }           │
//! │                                                                         │
//! │  SETTINGS                                                               │
//! │  ────────                                                               │
//! │  device ───► SettingGet   { request_id, key }                           │
//! │  cloud  ◄─── SettingValue { request_id, key, value, updated_at }        │
//! │  device ───► SettingSet   { request_id, key, value }                    │
//! │                                                                         │
//! │  SUBSCRIPTION (cloud-initiated, no request_id)                          │
//! │  ─────────────────────────────────────────────                          │
//! │  device ───► Subscribe { collections }                                  │
//! │  cloud  ───► Batch { collection, upserts, removed }        (repeats)    │
//! │  cloud  ───► SettingChanged { key, value, updated_at }     (repeats)    │
//! │                                                                         │
//! │  DEVICE PRESENCE                                                        │
//! │  ───────────────                                                        │
//! │  device ───► DeviceUpsert { request_id, device_id, document }           │
//! │  device ───► DeviceGet    { request_id, device_id }                     │
//! │  cloud  ◄─── Device       { request_id, document }                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Wire format is adjacently tagged JSON:
//! `{ "type": "Push", "payload": { ... } }`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

// =============================================================================
// Main Message Enum (Tagged Union)
// =============================================================================

/// All cloud protocol messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum CloudMessage {
    // =========================================================================
    // Handshake
    // =========================================================================
    /// First message on every connection.
    Hello(HelloPayload),

    /// Cloud's response to a Hello.
    Welcome(WelcomePayload),

    // =========================================================================
    // Record Operations (device → cloud, correlated)
    // =========================================================================
    /// Upsert one document into a collection.
    Push(PushPayload),

    /// Delete one document from a collection.
    Delete(DeletePayload),

    /// Fetch a full collection.
    Fetch(FetchPayload),

    // =========================================================================
    // Settings Operations
    // =========================================================================
    /// Read one settings key.
    SettingGet(SettingGetPayload),

    /// Write one settings key.
    SettingSet(SettingSetPayload),

    // =========================================================================
    // Device Presence
    // =========================================================================
    /// Publish this device's status document.
    DeviceUpsert(DeviceUpsertPayload),

    /// Read a device's status document (command polling).
    DeviceGet(DeviceGetPayload),

    // =========================================================================
    // Subscriptions
    // =========================================================================
    /// Subscribe to change batches for a set of collections.
    Subscribe(SubscribePayload),

    // =========================================================================
    // Cloud → Device Responses
    // =========================================================================
    /// Outcome of a Push / Delete / SettingSet / DeviceUpsert.
    Ack(AckPayload),

    /// Response to a Fetch.
    Collection(CollectionPayload),

    /// Response to a SettingGet.
    SettingValue(SettingValuePayload),

    /// Response to a DeviceGet.
    Device(DevicePayload),

    // =========================================================================
    // Cloud → Device Pushes (subscription traffic)
    // =========================================================================
    /// Change batch for one subscribed collection.
    Batch(BatchPayload),

    /// A settings key changed in the cloud.
    SettingChanged(SettingChangedPayload),

    // =========================================================================
    // Keepalive / Errors
    // =========================================================================
    /// Keepalive ping.
    Ping { timestamp: String },

    /// Keepalive pong.
    Pong { timestamp: String },

    /// Connection-level error from the cloud.
    Error { code: String, message: String },
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    pub device_id: String,
    pub device_name: String,
    pub protocol_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomePayload {
    pub server_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub request_id: u64,
    pub collection: String,
    pub record_id: String,
    pub document: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePayload {
    pub request_id: u64,
    pub collection: String,
    pub record_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchPayload {
    pub request_id: u64,
    pub collection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingGetPayload {
    pub request_id: u64,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingSetPayload {
    pub request_id: u64,
    pub key: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceUpsertPayload {
    pub request_id: u64,
    pub device_id: String,
    pub document: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceGetPayload {
    pub request_id: u64,
    pub device_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    pub collections: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    pub request_id: u64,
    pub ok: bool,

    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPayload {
    pub request_id: u64,
    pub collection: String,
    pub documents: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingValuePayload {
    pub request_id: u64,
    pub key: String,

    #[serde(default)]
    pub value: Option<serde_json::Value>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePayload {
    pub request_id: u64,

    #[serde(default)]
    pub document: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPayload {
    pub collection: String,

    /// Full documents that were created or updated.
    #[serde(default)]
    pub upserts: Vec<serde_json::Value>,

    /// Ids of documents that were deleted.
    #[serde(default)]
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingChangedPayload {
    pub key: String,
    pub value: serde_json::Value,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Serialization Helpers
// =============================================================================

impl CloudMessage {
    pub fn hello(device_id: &str, device_name: &str) -> Self {
        CloudMessage::Hello(HelloPayload {
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
            protocol_version: PROTOCOL_VERSION,
        })
    }

    /// Short name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            CloudMessage::Hello(_) => "Hello",
            CloudMessage::Welcome(_) => "Welcome",
            CloudMessage::Push(_) => "Push",
            CloudMessage::Delete(_) => "Delete",
            CloudMessage::Fetch(_) => "Fetch",
            CloudMessage::SettingGet(_) => "SettingGet",
            CloudMessage::SettingSet(_) => "SettingSet",
            CloudMessage::DeviceUpsert(_) => "DeviceUpsert",
            CloudMessage::DeviceGet(_) => "DeviceGet",
            CloudMessage::Subscribe(_) => "Subscribe",
            CloudMessage::Ack(_) => "Ack",
            CloudMessage::Collection(_) => "Collection",
            CloudMessage::SettingValue(_) => "SettingValue",
            CloudMessage::Device(_) => "Device",
            CloudMessage::Batch(_) => "Batch",
            CloudMessage::SettingChanged(_) => "SettingChanged",
            CloudMessage::Ping { .. } => "Ping",
            CloudMessage::Pong { .. } => "Pong",
            CloudMessage::Error { .. } => "Error",
        }
    }

    /// The request id this message responds to, if it is a response.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            CloudMessage::Ack(p) => Some(p.request_id),
            CloudMessage::Collection(p) => Some(p.request_id),
            CloudMessage::SettingValue(p) => Some(p.request_id),
            CloudMessage::Device(p) => Some(p.request_id),
            _ => None,
        }
    }

    pub fn to_json(&self) -> SyncResult<String> {
        serde_json::to_string(self).map_err(|e| SyncError::SerializationFailed(e.to_string()))
    }

    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json).map_err(|e| SyncError::InvalidMessage(e.to_string()))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_round_trip_as_tagged_json() {
        let msg = CloudMessage::Push(PushPayload {
            request_id: 7,
            collection: "products".into(),
            record_id: "p1".into(),
            document: serde_json::json!({"id": "p1"}),
        });

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"Push\""));
        assert!(json.contains("\"requestId\":7"));

        let parsed = CloudMessage::from_json(&json).unwrap();
        assert_eq!(parsed.type_name(), "Push");
        assert_eq!(parsed.request_id(), None); // Push is a request, not a response
    }

    #[test]
    fn responses_carry_their_request_id() {
        let ack = CloudMessage::Ack(AckPayload {
            request_id: 42,
            ok: true,
            error: None,
        });
        assert_eq!(ack.request_id(), Some(42));
    }

    #[test]
    fn batch_tolerates_missing_fields() {
        let msg = CloudMessage::from_json(
            r#"{"type":"Batch","payload":{"collection":"products"}}"#,
        )
        .unwrap();
        match msg {
            CloudMessage::Batch(b) => {
                assert!(b.upserts.is_empty());
                assert!(b.removed.is_empty());
            }
            other => panic!("expected Batch, got {}", other.type_name()),
        }
    }

    #[test]
    fn junk_is_an_invalid_message() {
        assert!(matches!(
            CloudMessage::from_json("not json"),
            Err(SyncError::InvalidMessage(_))
        ));
    }
}
