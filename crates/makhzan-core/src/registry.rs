//! # Entity Registry
//!
//! One typed enum mapping every synced entity to its local table name, cloud
//! collection name and event topic.
//!
//! ## Why a registry?
//! The cache, the repositories, the sync engine and the event bus all need to
//! agree on what entities exist and what they are called in each layer.
//! Keeping those mappings as string tables scattered across call sites is how
//! a renamed collection silently stops syncing; routing everything through
//! [`EntityKind`] makes an unknown entity a compile error instead.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  EntityKind::Issues                                          │
//! │    ├── table()       → "issues"        (SQLite records.kind) │
//! │    ├── collection()  → "issues"        (cloud collection)    │
//! │    └── event topic   → StoreEvent for subscribers            │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// EntityKind
// =============================================================================

/// Every record kind the local store holds and the cloud replicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Products,
    Transactions,
    Categories,
    Branches,
    Units,
    Issues,
    Returns,
    Locations,
    InventoryAdjustments,
    BranchRequests,
    BranchInvoices,
    PurchaseRequests,
    ProductImages,
}

impl EntityKind {
    /// All kinds, in cache-load and bulk-sync order.
    pub const ALL: [EntityKind; 13] = [
        EntityKind::Products,
        EntityKind::Transactions,
        EntityKind::Categories,
        EntityKind::Branches,
        EntityKind::Units,
        EntityKind::Issues,
        EntityKind::Returns,
        EntityKind::Locations,
        EntityKind::InventoryAdjustments,
        EntityKind::BranchRequests,
        EntityKind::BranchInvoices,
        EntityKind::PurchaseRequests,
        EntityKind::ProductImages,
    ];

    /// Kinds cleared and re-pulled by a `force_resync` device command.
    pub const FORCE_RESYNC: [EntityKind; 3] = [
        EntityKind::Products,
        EntityKind::Transactions,
        EntityKind::Branches,
    ];

    /// Local storage name (`records.kind` discriminator).
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Products => "products",
            EntityKind::Transactions => "transactions",
            EntityKind::Categories => "categories",
            EntityKind::Branches => "branches",
            EntityKind::Units => "units",
            EntityKind::Issues => "issues",
            EntityKind::Returns => "returns",
            EntityKind::Locations => "locations",
            EntityKind::InventoryAdjustments => "inventory_adjustments",
            EntityKind::BranchRequests => "branch_requests",
            EntityKind::BranchInvoices => "branch_invoices",
            EntityKind::PurchaseRequests => "purchase_requests",
            EntityKind::ProductImages => "product_images",
        }
    }

    /// Cloud collection name.
    ///
    /// Names are fixed by the deployed cloud data; they cannot be renamed
    /// without a server-side migration.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Products => "products",
            EntityKind::Transactions => "transactions",
            EntityKind::Categories => "categories",
            EntityKind::Branches => "branches",
            EntityKind::Units => "units",
            EntityKind::Issues => "issues",
            EntityKind::Returns => "returns",
            EntityKind::Locations => "locations",
            EntityKind::InventoryAdjustments => "inventoryAdjustments",
            EntityKind::BranchRequests => "branchRequests",
            EntityKind::BranchInvoices => "branchInvoices",
            EntityKind::PurchaseRequests => "purchaseRequests",
            EntityKind::ProductImages => "product_images",
        }
    }

    /// Reverse lookup from the local storage name.
    pub fn from_table(table: &str) -> Option<EntityKind> {
        EntityKind::ALL.iter().copied().find(|k| k.table() == table)
    }

    /// Reverse lookup from the cloud collection name.
    pub fn from_collection(collection: &str) -> Option<EntityKind> {
        EntityKind::ALL
            .iter()
            .copied()
            .find(|k| k.collection() == collection)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_and_collection_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_table(kind.table()), Some(kind));
            assert_eq!(EntityKind::from_collection(kind.collection()), Some(kind));
        }
    }

    #[test]
    fn unknown_names_are_none() {
        assert_eq!(EntityKind::from_table("sales"), None);
        assert_eq!(EntityKind::from_collection("settings"), None);
    }

    #[test]
    fn force_resync_is_subset_of_all() {
        for kind in EntityKind::FORCE_RESYNC {
            assert!(EntityKind::ALL.contains(&kind));
        }
    }

    #[test]
    fn adjustments_collection_is_camel_case() {
        assert_eq!(
            EntityKind::InventoryAdjustments.collection(),
            "inventoryAdjustments"
        );
        assert_eq!(EntityKind::InventoryAdjustments.table(), "inventory_adjustments");
    }
}
