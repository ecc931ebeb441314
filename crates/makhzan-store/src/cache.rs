//! # Read Cache
//!
//! Typed in-RAM copy of every record kind, loaded once at startup and kept
//! current by the store's mutations and the sync engine's remote applies.
//!
//! ## Degraded-but-Available Loading
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  for kind in EntityKind::ALL:                                           │
//! │      timeout(load_timeout, db.records().all(kind))                      │
//! │          ├── Ok(docs)      → parse each, warn+skip malformed            │
//! │          ├── Err(db error) → warn, kind loads EMPTY                     │
//! │          └── timed out     → warn, kind loads EMPTY                     │
//! │                                                                         │
//! │  One broken kind never blocks startup; the app opens with whatever      │
//! │  loaded and the rest arrives via sync.                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Core kinds are fully typed; the auxiliary document kinds (branch requests,
//! branch invoices, purchase requests) stay as raw JSON since the store only
//! moves them, never computes over them.

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use makhzan_core::{
    Branch, Category, EntityKind, InventoryAdjustment, Issue, Location, Product, ProductImage,
    Return, Transaction, Unit,
};
use makhzan_db::Database;

// =============================================================================
// Cache
// =============================================================================

/// All records, keyed by id within their kind.
#[derive(Debug, Default)]
pub struct Cache {
    pub products: HashMap<String, Product>,
    pub transactions: HashMap<String, Transaction>,
    pub categories: HashMap<String, Category>,
    pub branches: HashMap<String, Branch>,
    pub units: HashMap<String, Unit>,
    pub issues: HashMap<String, Issue>,
    pub returns: HashMap<String, Return>,
    pub locations: HashMap<String, Location>,
    pub adjustments: HashMap<String, InventoryAdjustment>,
    pub branch_requests: HashMap<String, serde_json::Value>,
    pub branch_invoices: HashMap<String, serde_json::Value>,
    pub purchase_requests: HashMap<String, serde_json::Value>,
    pub product_images: HashMap<String, ProductImage>,
}

impl Cache {
    pub fn new() -> Self {
        Cache::default()
    }

    /// Loads every kind from the database.
    ///
    /// `load_timeout` bounds each kind individually; a kind that fails or
    /// times out loads empty with a warning.
    pub async fn load(db: &Database, load_timeout: Duration) -> Cache {
        let mut cache = Cache::new();
        let records = db.records();

        for kind in EntityKind::ALL {
            match tokio::time::timeout(load_timeout, records.all(kind)).await {
                Ok(Ok(docs)) => {
                    for doc in docs {
                        let id = match doc.get("id").and_then(|v| v.as_str()) {
                            Some(id) => id.to_string(),
                            None => {
                                warn!(kind = %kind, "Record without id, skipping");
                                continue;
                            }
                        };
                        if let Err(e) = cache.upsert(kind, &id, &doc) {
                            warn!(kind = %kind, id = %id, error = %e, "Malformed record, skipping");
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!(kind = %kind, error = %e, "Failed to load kind, starting empty");
                }
                Err(_) => {
                    warn!(kind = %kind, timeout = ?load_timeout, "Load timed out, starting empty");
                }
            }
        }

        cache
    }

    /// Parses and stores one document.
    ///
    /// Typed kinds reject malformed payloads; the caller decides whether
    /// that skips the record (remote data) or is a bug (our own writes).
    pub fn upsert(
        &mut self,
        kind: EntityKind,
        id: &str,
        value: &serde_json::Value,
    ) -> Result<(), serde_json::Error> {
        match kind {
            EntityKind::Products => {
                self.products
                    .insert(id.to_string(), serde_json::from_value(value.clone())?);
            }
            EntityKind::Transactions => {
                self.transactions
                    .insert(id.to_string(), serde_json::from_value(value.clone())?);
            }
            EntityKind::Categories => {
                self.categories
                    .insert(id.to_string(), serde_json::from_value(value.clone())?);
            }
            EntityKind::Branches => {
                self.branches
                    .insert(id.to_string(), serde_json::from_value(value.clone())?);
            }
            EntityKind::Units => {
                self.units
                    .insert(id.to_string(), serde_json::from_value(value.clone())?);
            }
            EntityKind::Issues => {
                self.issues
                    .insert(id.to_string(), serde_json::from_value(value.clone())?);
            }
            EntityKind::Returns => {
                self.returns
                    .insert(id.to_string(), serde_json::from_value(value.clone())?);
            }
            EntityKind::Locations => {
                self.locations
                    .insert(id.to_string(), serde_json::from_value(value.clone())?);
            }
            EntityKind::InventoryAdjustments => {
                self.adjustments
                    .insert(id.to_string(), serde_json::from_value(value.clone())?);
            }
            EntityKind::BranchRequests => {
                self.branch_requests.insert(id.to_string(), value.clone());
            }
            EntityKind::BranchInvoices => {
                self.branch_invoices.insert(id.to_string(), value.clone());
            }
            EntityKind::PurchaseRequests => {
                self.purchase_requests.insert(id.to_string(), value.clone());
            }
            EntityKind::ProductImages => {
                self.product_images
                    .insert(id.to_string(), serde_json::from_value(value.clone())?);
            }
        }
        Ok(())
    }

    /// Removes one record.
    pub fn remove(&mut self, kind: EntityKind, id: &str) {
        match kind {
            EntityKind::Products => {
                self.products.remove(id);
            }
            EntityKind::Transactions => {
                self.transactions.remove(id);
            }
            EntityKind::Categories => {
                self.categories.remove(id);
            }
            EntityKind::Branches => {
                self.branches.remove(id);
            }
            EntityKind::Units => {
                self.units.remove(id);
            }
            EntityKind::Issues => {
                self.issues.remove(id);
            }
            EntityKind::Returns => {
                self.returns.remove(id);
            }
            EntityKind::Locations => {
                self.locations.remove(id);
            }
            EntityKind::InventoryAdjustments => {
                self.adjustments.remove(id);
            }
            EntityKind::BranchRequests => {
                self.branch_requests.remove(id);
            }
            EntityKind::BranchInvoices => {
                self.branch_invoices.remove(id);
            }
            EntityKind::PurchaseRequests => {
                self.purchase_requests.remove(id);
            }
            EntityKind::ProductImages => {
                self.product_images.remove(id);
            }
        }
    }

    /// Drops every record of one kind.
    pub fn clear_kind(&mut self, kind: EntityKind) {
        match kind {
            EntityKind::Products => self.products.clear(),
            EntityKind::Transactions => self.transactions.clear(),
            EntityKind::Categories => self.categories.clear(),
            EntityKind::Branches => self.branches.clear(),
            EntityKind::Units => self.units.clear(),
            EntityKind::Issues => self.issues.clear(),
            EntityKind::Returns => self.returns.clear(),
            EntityKind::Locations => self.locations.clear(),
            EntityKind::InventoryAdjustments => self.adjustments.clear(),
            EntityKind::BranchRequests => self.branch_requests.clear(),
            EntityKind::BranchInvoices => self.branch_invoices.clear(),
            EntityKind::PurchaseRequests => self.purchase_requests.clear(),
            EntityKind::ProductImages => self.product_images.clear(),
        }
    }

    /// Drops everything.
    pub fn clear_all(&mut self) {
        for kind in EntityKind::ALL {
            self.clear_kind(kind);
        }
    }

    /// Number of records of one kind.
    pub fn len(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Products => self.products.len(),
            EntityKind::Transactions => self.transactions.len(),
            EntityKind::Categories => self.categories.len(),
            EntityKind::Branches => self.branches.len(),
            EntityKind::Units => self.units.len(),
            EntityKind::Issues => self.issues.len(),
            EntityKind::Returns => self.returns.len(),
            EntityKind::Locations => self.locations.len(),
            EntityKind::InventoryAdjustments => self.adjustments.len(),
            EntityKind::BranchRequests => self.branch_requests.len(),
            EntityKind::BranchInvoices => self.branch_invoices.len(),
            EntityKind::PurchaseRequests => self.purchase_requests.len(),
            EntityKind::ProductImages => self.product_images.len(),
        }
    }

    /// Ids currently cached for one kind.
    pub fn ids(&self, kind: EntityKind) -> Vec<String> {
        match kind {
            EntityKind::Products => self.products.keys().cloned().collect(),
            EntityKind::Transactions => self.transactions.keys().cloned().collect(),
            EntityKind::Categories => self.categories.keys().cloned().collect(),
            EntityKind::Branches => self.branches.keys().cloned().collect(),
            EntityKind::Units => self.units.keys().cloned().collect(),
            EntityKind::Issues => self.issues.keys().cloned().collect(),
            EntityKind::Returns => self.returns.keys().cloned().collect(),
            EntityKind::Locations => self.locations.keys().cloned().collect(),
            EntityKind::InventoryAdjustments => self.adjustments.keys().cloned().collect(),
            EntityKind::BranchRequests => self.branch_requests.keys().cloned().collect(),
            EntityKind::BranchInvoices => self.branch_invoices.keys().cloned().collect(),
            EntityKind::PurchaseRequests => self.purchase_requests.keys().cloned().collect(),
            EntityKind::ProductImages => self.product_images.keys().cloned().collect(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use makhzan_db::DbConfig;

    #[test]
    fn malformed_typed_record_is_rejected() {
        let mut cache = Cache::new();
        let bad = serde_json::json!({"id": "p1", "productName": 42});
        assert!(cache.upsert(EntityKind::Products, "p1", &bad).is_err());
        assert_eq!(cache.len(EntityKind::Products), 0);
    }

    #[test]
    fn aux_kinds_accept_any_shape() {
        let mut cache = Cache::new();
        let doc = serde_json::json!({"id": "br1", "whatever": ["x"]});
        cache
            .upsert(EntityKind::BranchRequests, "br1", &doc)
            .unwrap();
        assert_eq!(cache.len(EntityKind::BranchRequests), 1);

        cache.remove(EntityKind::BranchRequests, "br1");
        assert_eq!(cache.len(EntityKind::BranchRequests), 0);
    }

    #[tokio::test]
    async fn load_skips_malformed_and_keeps_good() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let records = db.records();

        let good = serde_json::json!({
            "id": "c1", "name": "Food", "createdAt": "2026-01-01T00:00:00Z"
        });
        let bad = serde_json::json!({"id": "c2", "name": 7});
        records
            .upsert(EntityKind::Categories, "c1", &good)
            .await
            .unwrap();
        records
            .upsert(EntityKind::Categories, "c2", &bad)
            .await
            .unwrap();

        let cache = Cache::load(&db, Duration::from_secs(5)).await;
        assert_eq!(cache.len(EntityKind::Categories), 1);
        assert!(cache.categories.contains_key("c1"));
    }
}
