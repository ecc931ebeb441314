//! # Domain Types
//!
//! Core domain types used throughout Makhzan.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │     Issue       │   │    Return       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  id (UUID)      │       │
//! │  │  productCode    │   │  invoiceNumber  │   │  returnNumber   │       │
//! │  │  ledger fields  │   │  SW#### lines   │   │  R#### lines    │       │
//! │  │  averagePrice   │   │  delivered      │   │  status         │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  Transaction    │   │  Adjustment     │   │  DeviceStatus   │       │
//! │  │  append-only    │   │  inventoryCount │   │  heartbeat +    │       │
//! │  │  audit trail    │   │  corrections    │   │  command ack    │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Serialization Contract
//! Every record serializes to the camelCase JSON document shape the cloud
//! collections hold. Numeric ledger fields default to zero so partial
//! documents written by older app versions still parse; records that fail to
//! parse entirely are skipped (and logged) by the sync engine, never fatal.
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4 - immutable, used for storage keys and sync
//! - Business ID: (productCode, invoiceNumber, ...) - human-readable

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Product
// =============================================================================

/// A warehouse product with its running ledger.
///
/// ## Ledger Fields
/// `openingStock`, `purchases`, `issues` and `inventoryCount` are the source
/// counters; `currentStock`, `currentStockValue` and `difference` are derived
/// and recomputed by [`recompute_derived`](Product::recompute_derived) on
/// every mutation. Stored copies of derived fields exist only so cloud
/// documents are self-describing; they are never trusted as inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Business code shown on documents (unique).
    pub product_code: String,

    /// Supplier item number (unique when present).
    #[serde(default)]
    pub item_number: Option<String>,

    /// Display name.
    pub product_name: String,

    /// Physical storage location name.
    #[serde(default)]
    pub location: Option<String>,

    /// Category name.
    #[serde(default)]
    pub category: Option<String>,

    /// Unit of measure (carton, piece, ...).
    #[serde(default)]
    pub unit: Option<String>,

    /// Pack size (pieces per carton). Display-only, not a ledger input.
    #[serde(default)]
    pub quantity: f64,

    /// Stock at the start of the current period.
    #[serde(default)]
    pub opening_stock: f64,

    /// Quantity purchased during the current period.
    #[serde(default)]
    pub purchases: f64,

    /// Quantity issued (sold/transferred out) during the current period.
    #[serde(default)]
    pub issues: f64,

    /// Physical count entered via adjustment; 0 means "not counted".
    #[serde(default)]
    pub inventory_count: f64,

    /// Derived: `openingStock + purchases - issues`.
    #[serde(default)]
    pub current_stock: f64,

    /// Derived: `inventoryCount - currentStock` when counted, else 0.
    #[serde(default)]
    pub difference: f64,

    /// Latest purchase price.
    #[serde(default)]
    pub price: f64,

    /// Weighted-average cost of the units on hand.
    #[serde(default)]
    pub average_price: f64,

    /// Derived: `currentStock * averagePrice`.
    #[serde(default)]
    pub current_stock_value: f64,

    /// Cost of the units issued during the current period.
    #[serde(default)]
    pub issues_value: f64,

    /// Inline image data, or [`DB_IMAGE_SENTINEL`](crate::DB_IMAGE_SENTINEL)
    /// when the payload lives in the product_images collection.
    #[serde(default)]
    pub image: Option<String>,

    /// Alert threshold for low-stock reporting.
    #[serde(default)]
    pub min_stock_limit: Option<f64>,

    /// Human description of the last ledger activity.
    #[serde(default)]
    pub last_activity: Option<String>,

    /// When the product was created.
    pub created_at: DateTime<Utc>,

    /// When the product was last updated (last-writer-wins tiebreaker).
    pub updated_at: DateTime<Utc>,

    /// Device that performed the last write.
    #[serde(default)]
    pub last_modified_by: Option<String>,
}

impl Product {
    /// Recomputes the derived ledger fields from the source counters.
    ///
    /// Derived fields are never incremented in place: any drift introduced by
    /// a partial write on another device is corrected by the next recompute.
    pub fn recompute_derived(&mut self) {
        self.current_stock = self.opening_stock + self.purchases - self.issues;
        self.current_stock_value = self.current_stock * self.average_price;
        self.difference = if self.inventory_count > 0.0 {
            self.inventory_count - self.current_stock
        } else {
            0.0
        };
    }

    /// True when stock is at or below the configured alert threshold.
    pub fn is_low_stock(&self) -> bool {
        match self.min_stock_limit {
            Some(limit) if limit > 0.0 => self.current_stock <= limit,
            _ => false,
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// Kind of ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Purchase,
    Sale,
    Return,
    Adjustment,
}

/// Append-only record of a single ledger movement.
///
/// Transactions are the audit trail: they are written alongside every stock
/// mutation and never edited afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,

    #[serde(rename = "type")]
    pub transaction_type: TransactionType,

    pub product_id: String,

    pub product_name: String,

    pub quantity: f64,

    pub unit_price: f64,

    pub total_amount: f64,

    #[serde(default)]
    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub last_modified_by: Option<String>,
}

// =============================================================================
// Issue (outbound invoice)
// =============================================================================

/// One line of an issue or return document.
///
/// `unit_price` is a snapshot of the product's average price taken when the
/// line was created; later purchases never reprice an existing document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentLine {
    pub product_id: String,

    pub product_code: String,

    pub product_name: String,

    pub quantity: f64,

    pub unit_price: f64,

    pub total_price: f64,

    #[serde(default)]
    pub unit: Option<String>,
}

/// Lifecycle of an issue document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    Draft,
    Pending,
    Delivered,
}

/// An outbound invoice to a branch (`SW####`).
///
/// Stock is deducted exactly once, at the delivered transition; editing lines
/// is allowed only before delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,

    pub invoice_number: String,

    pub branch_id: String,

    pub branch_name: String,

    pub products: Vec<DocumentLine>,

    pub total_value: f64,

    #[serde(default)]
    pub delivered: bool,

    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub delivered_by: Option<String>,

    #[serde(default)]
    pub branch_received: bool,

    #[serde(default)]
    pub branch_received_at: Option<DateTime<Utc>>,

    pub status: IssueStatus,

    #[serde(default)]
    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub last_modified_by: Option<String>,
}

// =============================================================================
// Return
// =============================================================================

/// Where a return's stock came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnSource {
    /// Returned against a specific issue invoice; lines carry that invoice's
    /// prices and the ledger restores value at those prices.
    Issue,
    /// Returned to a supplier / generic return; restored at current average.
    Purchase,
}

/// Lifecycle of a return document. Approval is the only stock-mutating
/// transition, and it is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

/// A return document (`R####`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Return {
    pub id: String,

    pub return_number: String,

    pub source_type: ReturnSource,

    /// Issue this return reverses, when [`ReturnSource::Issue`].
    #[serde(default)]
    pub issue_id: Option<String>,

    #[serde(default)]
    pub original_invoice_number: Option<String>,

    #[serde(default)]
    pub branch_id: Option<String>,

    #[serde(default)]
    pub branch_name: Option<String>,

    pub products: Vec<DocumentLine>,

    pub total_value: f64,

    #[serde(default)]
    pub reason: Option<String>,

    pub status: ReturnStatus,

    #[serde(default)]
    pub approved_by: Option<String>,

    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub last_modified_by: Option<String>,
}

// =============================================================================
// Inventory Adjustment
// =============================================================================

/// A physical-count correction.
///
/// Adjustments record the count; they do not rewrite `openingStock` or
/// `purchases`. The product's `inventoryCount` is set and the `difference`
/// is derived on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryAdjustment {
    pub id: String,

    pub product_id: String,

    pub product_name: String,

    pub old_quantity: f64,

    pub new_quantity: f64,

    /// `newQuantity - oldQuantity`, stored for reporting.
    pub difference: f64,

    #[serde(default)]
    pub reason: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub last_modified_by: Option<String>,
}

// =============================================================================
// Catalog Records
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub abbreviation: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Product Image (attachment collection)
// =============================================================================

/// Image payload stored outside the product record.
///
/// Keyed by the owning product's id; the product carries the `DB_IMAGE`
/// sentinel instead of the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductImage {
    /// Same as `product_id`; images are 1:1 with products.
    pub id: String,

    pub product_id: String,

    /// Base64 image data.
    pub data: String,

    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Device Registry
// =============================================================================

/// Remote command a device can receive via its registry document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCommand {
    #[default]
    None,
    /// Clear core collections locally and pull everything fresh.
    ForceResync,
    /// Wipe the local store and stop syncing.
    WipeAndLogout,
}

/// Execution state of the last command, written back by the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandStatus {
    /// "pending" | "success" | "error"
    #[serde(rename = "type")]
    pub state: String,

    #[serde(default)]
    pub message: Option<String>,

    pub timestamp: DateTime<Utc>,
}

/// Per-device counters published with each heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSyncStatus {
    pub products_count: u64,
    pub transactions_count: u64,
    #[serde(default)]
    pub last_sync_timestamp: Option<i64>,
}

/// Heartbeat + command channel document, one per device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub device_id: String,

    pub last_active: DateTime<Utc>,

    #[serde(default)]
    pub sync_status: DeviceSyncStatus,

    #[serde(default)]
    pub app_version: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub command: DeviceCommand,

    #[serde(default)]
    pub command_status: Option<CommandStatus>,
}

// =============================================================================
// Retry Queue
// =============================================================================

/// Operation a retry entry replays against the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryOp {
    Upsert,
    Delete,
}

impl RetryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryOp::Upsert => "upsert",
            RetryOp::Delete => "delete",
        }
    }
}

/// A cloud push that failed or timed out, parked for later replay.
///
/// Entries are durable (they survive restarts) and drained oldest-first.
/// Delivery is at-least-once; replays are safe because cloud writes are
/// whole-document upserts and deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryEntry {
    pub id: String,

    /// Collection name from the entity registry.
    pub kind: String,

    pub record_id: String,

    pub op: RetryOp,

    /// Full document JSON for upserts; None for deletes.
    #[serde(default)]
    pub payload: Option<String>,

    pub attempts: i64,

    #[serde(default)]
    pub last_error: Option<String>,

    pub enqueued_at: DateTime<Utc>,

    #[serde(default)]
    pub attempted_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Period Close Record
// =============================================================================

/// Settings record written after a successful month close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthClosing {
    /// Month that was closed, formatted `YYYY-MM`.
    pub month: String,

    pub closed_at: DateTime<Utc>,

    pub product_count: u64,
}

// =============================================================================
// Financial Summary
// =============================================================================

/// Aggregate view over the transaction trail.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FinancialSummary {
    pub purchase_count: u64,
    pub issue_count: u64,
    pub return_count: u64,
    pub adjustment_count: u64,
    pub purchase_value: f64,
    pub issue_value: f64,
    pub return_value: f64,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn product() -> Product {
        Product {
            id: "p1".into(),
            product_code: "P-100".into(),
            item_number: None,
            product_name: "Rice 5kg".into(),
            location: None,
            category: None,
            unit: Some("carton".into()),
            quantity: 4.0,
            opening_stock: 100.0,
            purchases: 20.0,
            issues: 30.0,
            inventory_count: 0.0,
            current_stock: 0.0,
            difference: 0.0,
            price: 10.0,
            average_price: 9.5,
            current_stock_value: 0.0,
            issues_value: 0.0,
            image: None,
            min_stock_limit: Some(50.0),
            last_activity: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_modified_by: None,
        }
    }

    #[test]
    fn recompute_applies_stock_formula() {
        let mut p = product();
        p.recompute_derived();
        assert_eq!(p.current_stock, 90.0);
        assert_eq!(p.current_stock_value, 90.0 * 9.5);
        assert_eq!(p.difference, 0.0);
    }

    #[test]
    fn difference_only_when_counted() {
        let mut p = product();
        p.inventory_count = 85.0;
        p.recompute_derived();
        assert_eq!(p.difference, 85.0 - 90.0);
    }

    #[test]
    fn low_stock_threshold() {
        let mut p = product();
        p.recompute_derived();
        assert!(!p.is_low_stock());
        p.min_stock_limit = Some(95.0);
        assert!(p.is_low_stock());
    }

    #[test]
    fn product_round_trips_camel_case() {
        let mut p = product();
        p.recompute_derived();
        let json = serde_json::to_value(&p).unwrap();
        assert!(json.get("productCode").is_some());
        assert!(json.get("openingStock").is_some());
        let back: Product = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn partial_cloud_document_parses_with_defaults() {
        // Older app versions wrote products without the counter fields.
        let json = serde_json::json!({
            "id": "p9",
            "productCode": "P-9",
            "productName": "Sugar",
            "createdAt": "2026-01-01T00:00:00Z",
            "updatedAt": "2026-01-01T00:00:00Z",
        });
        let p: Product = serde_json::from_value(json).unwrap();
        assert_eq!(p.opening_stock, 0.0);
        assert_eq!(p.image, None);
    }

    #[test]
    fn transaction_type_uses_wire_names() {
        let t = TransactionType::Purchase;
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"purchase\"");
        let d: TransactionType = serde_json::from_str("\"adjustment\"").unwrap();
        assert_eq!(d, TransactionType::Adjustment);
    }

    #[test]
    fn device_command_wire_names() {
        assert_eq!(
            serde_json::to_string(&DeviceCommand::ForceResync).unwrap(),
            "\"force_resync\""
        );
        let c: DeviceCommand = serde_json::from_str("\"wipe_and_logout\"").unwrap();
        assert_eq!(c, DeviceCommand::WipeAndLogout);
    }
}
