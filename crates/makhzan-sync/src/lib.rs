//! # makhzan-sync: Sync Engine for Makhzan
//!
//! This crate provides the synchronization layer for Makhzan, enabling
//! offline-first operation with background sync to the cloud.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐   │
//! │  │                     SyncAgent (Main Orchestrator)                │   │
//! │  │                                                                  │   │
//! │  │  Startup catch-up (settings + full pull), worker lifecycle,      │   │
//! │  │  status queries, graceful shutdown                               │   │
//! │  └────────────────────────────┬─────────────────────────────────────┘   │
//! │                               │                                         │
//! │     ┌─────────────────┬───────┴────────┬─────────────────┐              │
//! │     ▼                 ▼                ▼                 ▼              │
//! │  ┌──────────────┐ ┌──────────────┐ ┌──────────────┐ ┌──────────────┐   │
//! │  │  PushWorker  │ │ RetryWorker  │ │InboundWorker │ │ DeviceWorker │   │
//! │  │              │ │              │ │              │ │              │   │
//! │  │ Drains the   │ │ Replays the  │ │ Applies      │ │ Heartbeat +  │   │
//! │  │ store's      │ │ durable      │ │ subscription │ │ remote       │   │
//! │  │ outbound     │ │ retry queue  │ │ batches and  │ │ command      │   │
//! │  │ channel      │ │ oldest-first │ │ settings     │ │ execution    │   │
//! │  └──────┬───────┘ └──────┬───────┘ └──────┬───────┘ └──────┬───────┘   │
//! │         │                │                │                │           │
//! │         └────────────────┴───────┬────────┴────────────────┘           │
//! │                                  ▼                                     │
//! │                      ┌──────────────────────┐                          │
//! │                      │  dyn CloudClient     │                          │
//! │                      │                      │                          │
//! │                      │  WsCloud (WebSocket  │                          │
//! │                      │  + reconnect) or     │                          │
//! │                      │  MemoryCloud (tests) │                          │
//! │                      └──────────────────────┘                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - Main `SyncAgent` orchestrator
//! - [`bulk`] - Whole-collection uploads and downloads
//! - [`cloud`] - The `CloudClient` trait and `RemoteEvent`s
//! - [`config`] - Sync configuration (device identity, cloud URL, timings)
//! - [`device`] - Device presence heartbeat and remote commands
//! - [`error`] - Sync error types
//! - [`inbound`] - Handler for cloud-initiated batches and settings
//! - [`memory`] - In-memory cloud backend for tests and offline development
//! - [`protocol`] - Wire message types
//! - [`push`] - Live push worker for the store's outbound channel
//! - [`remote`] - WebSocket `CloudClient` implementation
//! - [`retry`] - Retry queue drains
//! - [`transport`] - WebSocket client with reconnection
//!
//! ## Usage
//!
//! ```rust,ignore
//! use makhzan_store::{Store, StoreConfig};
//! use makhzan_sync::{SyncAgentBuilder, SyncConfig, WsCloud};
//!
//! let config = SyncConfig::load_or_default(None);
//! let (store, outbound_rx) = Store::open(StoreConfig::new(data_dir, config.device_id())).await?;
//! let store = Arc::new(store);
//!
//! let cloud = WsCloud::connect(&config)?;
//! let mut agent = SyncAgentBuilder::new(config)
//!     .with_store(store.clone())
//!     .with_cloud(cloud)
//!     .with_outbound(outbound_rx)
//!     .build()?;
//! agent.start().await?;
//!
//! let status = agent.status().await;
//! println!("Connected: {}", status.is_connected);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod bulk;
pub mod cloud;
pub mod config;
pub mod device;
pub mod error;
pub mod inbound;
pub mod memory;
pub mod protocol;
pub mod push;
pub mod remote;
pub mod retry;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{SyncAgent, SyncAgentBuilder, SyncStatus};
pub use bulk::BulkStats;
pub use cloud::{CloudClient, RemoteEvent};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use memory::MemoryCloud;
pub use protocol::CloudMessage;
pub use remote::WsCloud;
pub use transport::ConnectionState;
