//! # makhzan-core: Pure Business Logic for Makhzan
//!
//! This crate is the **heart** of Makhzan, an offline-first warehouse
//! inventory system. It contains all business logic as pure functions with
//! zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Makhzan Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  makhzan-sync (Cloud Engine)                    │   │
//! │  │     push / pull / retry drain / device channel                  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  makhzan-store (Mutation API)                   │   │
//! │  │     cache, event bus, deletion guard, sequences                 │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ makhzan-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐ ┌───────────┐ ┌───────────┐ ┌───────────┐     │   │
//! │  │   │   types   │ │  ledger   │ │ registry  │ │ sequence  │     │   │
//! │  │   │  Product  │ │    WAC    │ │EntityKind │ │  SW/R/OP  │     │   │
//! │  │   │   Issue   │ │ PeriodEnd │ │ metadata  │ │  parsing  │     │   │
//! │  │   └───────────┘ └───────────┘ └───────────┘ └───────────┘     │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, Transaction, Issue, Return, ...)
//! - [`registry`] - The typed entity registry ([`EntityKind`])
//! - [`ledger`] - Weighted-average valuation engine
//! - [`sequence`] - Document number formatting and recovery math
//! - [`error`] - Domain error types
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic - same input = same output
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Self-Correcting Derived Fields**: `currentStock` and `currentStockValue`
//!    are recomputed from the formula on every mutation, never incremented blindly
//! 4. **Explicit Errors**: All errors are typed, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod ledger;
pub mod registry;
pub mod sequence;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use makhzan_core::EntityKind` instead of
// `use makhzan_core::registry::EntityKind`

pub use error::{CoreError, CoreResult, ValidationError};
pub use registry::EntityKind;
pub use sequence::SequenceKind;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Sentinel stored in `Product.image` when the actual image payload lives in
/// the dedicated `product_images` collection.
///
/// ## Why a sentinel?
/// Product documents are synced on every ledger mutation; keeping a large
/// base64 image inline would make every stock update a multi-hundred-KB push.
/// Images above [`IMAGE_INLINE_LIMIT`] are offloaded to their own collection
/// and the owning product carries this marker instead.
pub const DB_IMAGE_SENTINEL: &str = "DB_IMAGE";

/// Images at or below this many bytes stay inline on the product record.
pub const IMAGE_INLINE_LIMIT: usize = 500;

/// Highest document number a 4-digit invoice tail can carry.
///
/// Numbers are formatted `SW0001`..`SW9999`; the allocator clamps here and
/// warns rather than rolling over, because downstream documents embed the
/// formatted number as an identifier.
pub const SEQUENCE_MAX: u32 = 9999;
