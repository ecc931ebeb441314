//! # makhzan-store: Local State and Mutation API
//!
//! The authoritative local layer of Makhzan. Every write commits here first
//! (database + cache + event), then an outbound mutation is handed to the
//! sync engine as a best-effort background job. A cloud outage slows nothing
//! down and loses nothing.
//!
//! ## Two-Phase Write
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  record_purchase(product, qty, price)                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  PHASE 1 (synchronous, authoritative)                                   │
//! │    ledger math → SQLite upsert → cache upsert → event emitted           │
//! │       │                                                                 │
//! │       ▼  returns Ok(..) to the caller here                              │
//! │                                                                         │
//! │  PHASE 2 (background, best effort)                                      │
//! │    OutboundMutation sent on the mpsc channel                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │    makhzan-sync pushes it (or parks it in the retry queue)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`store`] - The [`Store`] itself: mutations, queries, remote applies
//! - [`cache`] - Typed in-RAM cache, loaded per kind with a timeout
//! - [`events`] - Broadcast event bus ([`StoreEvent`])
//! - [`guard`] - The deletion guard that prevents resurrection races
//! - [`sequences`] - Document number allocation (`SW`/`R`/`OP`)
//! - [`closing`] - Month-end period close
//! - [`error`] - Store error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cache;
pub mod closing;
pub mod error;
pub mod events;
pub mod guard;
pub mod sequences;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use cache::Cache;
pub use error::{StoreError, StoreResult};
pub use events::{EventBus, StoreEvent};
pub use guard::DeletionGuard;
pub use store::{
    IssueDraft, IssueLineDraft, OutboundMutation, ProductDraft, ReturnDraft, Store, StoreConfig,
};
