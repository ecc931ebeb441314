//! # Store: the Mutation and Query API
//!
//! The only writer of local state. Every operation follows the two-phase
//! write: phase 1 commits synchronously to SQLite + cache and emits events;
//! phase 2 hands an [`OutboundMutation`] to the sync engine over an mpsc
//! channel. Phase 2 can fail, time out or not exist at all — phase 1 has
//! already returned success to the caller.
//!
//! ## Surface
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Store                                      │
//! │                                                                         │
//! │  Products     add / update / delete, record_purchase / sale / return    │
//! │  Adjustments  add_adjustment (physical counts)                          │
//! │  Issues       create / update / deliver / branch_received / delete      │
//! │  Returns      create / approve / reject / delete                        │
//! │  Catalogs     categories, branches, units, locations                    │
//! │  Aux docs     branch requests/invoices, purchase requests               │
//! │  Sequences    next_document_number / recover_sequence (sequences.rs)    │
//! │  Period       close_month / should_close_alert (closing.rs)            │
//! │  Remote       apply_remote_batch / replace_kind_from_cloud / wipe       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use makhzan_core::{
    ledger, Branch, Category, CoreError, DocumentLine, EntityKind, InventoryAdjustment, Issue,
    IssueStatus, Location, Product, ProductImage, Return, ReturnSource, ReturnStatus, RetryOp,
    Transaction, TransactionType, Unit, ValidationError, DB_IMAGE_SENTINEL, FinancialSummary,
    IMAGE_INLINE_LIMIT,
};
use makhzan_db::{Database, DbConfig};

use crate::cache::Cache;
use crate::error::{StoreError, StoreResult};
use crate::events::EventBus;
use crate::guard::DeletionGuard;

// =============================================================================
// Outbound Mutations
// =============================================================================

/// Phase-2 work handed to the sync engine.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMutation {
    /// A record to push (upsert carries the full document, delete doesn't).
    Record {
        kind: EntityKind,
        record_id: String,
        op: RetryOp,
        payload: Option<serde_json::Value>,
    },
    /// A settings key to push (sequence counters, month-close record).
    Setting {
        key: String,
        value: serde_json::Value,
    },
}

// =============================================================================
// Configuration
// =============================================================================

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// On-disk database path; None runs fully in memory.
    pub database_path: Option<PathBuf>,

    /// Identity stamped into `lastModifiedBy` on every write.
    pub device_id: String,

    /// Per-kind cache load timeout. Default: 5 seconds.
    pub load_timeout: Duration,

    /// Guard grace after a delete push succeeded. Default: 5 seconds.
    pub delete_grace_success: Duration,

    /// Guard grace after a delete push failed. Default: 10 seconds.
    pub delete_grace_failure: Duration,
}

impl StoreConfig {
    pub fn new(database_path: impl Into<PathBuf>, device_id: impl Into<String>) -> Self {
        StoreConfig {
            database_path: Some(database_path.into()),
            device_id: device_id.into(),
            load_timeout: Duration::from_secs(5),
            delete_grace_success: Duration::from_secs(5),
            delete_grace_failure: Duration::from_secs(10),
        }
    }

    /// In-memory configuration for tests.
    pub fn in_memory(device_id: impl Into<String>) -> Self {
        StoreConfig {
            database_path: None,
            device_id: device_id.into(),
            load_timeout: Duration::from_secs(5),
            delete_grace_success: Duration::from_secs(5),
            delete_grace_failure: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Drafts (caller input)
// =============================================================================

/// Input for creating a product.
#[derive(Debug, Clone, Default)]
pub struct ProductDraft {
    pub product_code: String,
    pub item_number: Option<String>,
    pub product_name: String,
    pub location: Option<String>,
    pub category: Option<String>,
    pub unit: Option<String>,
    /// Pack size (pieces per carton).
    pub quantity: f64,
    pub opening_stock: f64,
    pub price: f64,
    pub min_stock_limit: Option<f64>,
    pub image: Option<String>,
}

/// One requested line of an issue or return.
#[derive(Debug, Clone)]
pub struct IssueLineDraft {
    pub product_id: String,
    pub quantity: f64,
}

/// Input for creating an issue.
#[derive(Debug, Clone)]
pub struct IssueDraft {
    pub branch_id: String,
    pub branch_name: String,
    pub lines: Vec<IssueLineDraft>,
    pub notes: Option<String>,
}

/// Input for creating a return.
#[derive(Debug, Clone)]
pub struct ReturnDraft {
    pub source_type: ReturnSource,
    /// Issue being reversed; line prices snapshot from it when present.
    pub issue_id: Option<String>,
    pub reason: Option<String>,
    pub lines: Vec<IssueLineDraft>,
}

/// Counters returned by a remote batch apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteApplyStats {
    pub applied: usize,
    pub skipped: usize,
}

/// Counters returned by a full-collection pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullStats {
    pub upserted: usize,
    pub pruned: usize,
    pub protected: usize,
}

// =============================================================================
// Store
// =============================================================================

/// The local state owner. Clone-free; share via `Arc<Store>`.
#[derive(Debug)]
pub struct Store {
    db: Database,
    cache: RwLock<Cache>,
    events: EventBus,
    guard: DeletionGuard,
    outbound: mpsc::UnboundedSender<OutboundMutation>,
    config: StoreConfig,
    degraded: bool,
}

impl Store {
    /// Opens the store: database, migrations, cache warm-up.
    ///
    /// When the on-disk database cannot be opened the store falls back to an
    /// in-memory database and flags itself degraded; the app stays usable
    /// for the session and sync is expected to stay off.
    ///
    /// Returns the store plus the receiving end of the outbound mutation
    /// channel, which the sync engine consumes.
    pub async fn open(
        config: StoreConfig,
    ) -> StoreResult<(Store, mpsc::UnboundedReceiver<OutboundMutation>)> {
        let (db, degraded) = match &config.database_path {
            Some(path) => match Database::new(DbConfig::new(path)).await {
                Ok(db) => (db, false),
                Err(e) => {
                    error!(
                        path = %path.display(),
                        error = %e,
                        "Cannot open database, falling back to in-memory (degraded mode)"
                    );
                    (Database::new(DbConfig::in_memory()).await?, true)
                }
            },
            None => (Database::new(DbConfig::in_memory()).await?, false),
        };

        let cache = Cache::load(&db, config.load_timeout).await;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        info!(
            device_id = %config.device_id,
            degraded = degraded,
            "Store opened"
        );

        let store = Store {
            db,
            cache: RwLock::new(cache),
            events: EventBus::new(),
            guard: DeletionGuard::new(),
            outbound,
            config,
            degraded,
        };
        Ok((store, outbound_rx))
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn guard(&self) -> &DeletionGuard {
        &self.guard
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn device_id(&self) -> &str {
        &self.config.device_id
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// True when running on the in-memory fallback after a failed open.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    // -------------------------------------------------------------------------
    // Commit helpers (phase 1 + phase 2 emit)
    // -------------------------------------------------------------------------

    fn send_outbound(&self, mutation: OutboundMutation) {
        if self.outbound.send(mutation).is_err() {
            debug!("No sync engine attached; outbound mutation dropped");
        }
    }

    /// Phase-1 commit of one typed record, then phase-2 emit.
    async fn commit<T: Serialize>(&self, kind: EntityKind, id: &str, record: &T) -> StoreResult<()> {
        let value = serde_json::to_value(record)?;
        self.db.records().upsert(kind, id, &value).await?;
        {
            let mut cache = self.cache.write().await;
            cache
                .upsert(kind, id, &value)
                .map_err(|e| StoreError::Internal(format!("cache rejected own write: {e}")))?;
        }
        self.events.emit(kind);
        self.send_outbound(OutboundMutation::Record {
            kind,
            record_id: id.to_string(),
            op: RetryOp::Upsert,
            payload: Some(value),
        });
        Ok(())
    }

    /// Phase-1 delete, guard mark, then phase-2 emit.
    async fn commit_delete(&self, kind: EntityKind, id: &str) -> StoreResult<bool> {
        self.guard.mark(id);
        let removed = self.db.records().delete(kind, id).await?;
        {
            let mut cache = self.cache.write().await;
            cache.remove(kind, id);
        }
        self.events.emit(kind);
        self.send_outbound(OutboundMutation::Record {
            kind,
            record_id: id.to_string(),
            op: RetryOp::Delete,
            payload: None,
        });
        Ok(removed)
    }

    pub(crate) fn send_setting(&self, key: &str, value: serde_json::Value) {
        self.send_outbound(OutboundMutation::Setting {
            key: key.to_string(),
            value,
        });
    }

    // -------------------------------------------------------------------------
    // Products
    // -------------------------------------------------------------------------

    /// Creates a product.
    ///
    /// Rejects duplicate product codes and item numbers. Large images are
    /// offloaded to the product_images collection and replaced by the
    /// `DB_IMAGE` sentinel on the product itself.
    pub async fn add_product(&self, draft: ProductDraft) -> StoreResult<Product> {
        if draft.product_name.trim().is_empty() {
            return Err(CoreError::from(ValidationError::Required {
                field: "productName".into(),
            })
            .into());
        }
        if draft.product_code.trim().is_empty() {
            return Err(CoreError::from(ValidationError::Required {
                field: "productCode".into(),
            })
            .into());
        }

        {
            let cache = self.cache.read().await;
            for p in cache.products.values() {
                if p.product_code == draft.product_code {
                    return Err(CoreError::from(ValidationError::Duplicate {
                        field: "productCode".into(),
                        value: draft.product_code.clone(),
                    })
                    .into());
                }
                if let (Some(a), Some(b)) = (&p.item_number, &draft.item_number) {
                    if a == b {
                        return Err(CoreError::from(ValidationError::Duplicate {
                            field: "itemNumber".into(),
                            value: b.clone(),
                        })
                        .into());
                    }
                }
            }
        }

        let now = Utc::now();
        let mut product = Product {
            id: Uuid::new_v4().to_string(),
            product_code: draft.product_code,
            item_number: draft.item_number,
            product_name: draft.product_name,
            location: draft.location,
            category: draft.category,
            unit: draft.unit,
            quantity: draft.quantity,
            opening_stock: draft.opening_stock,
            purchases: 0.0,
            issues: 0.0,
            inventory_count: 0.0,
            current_stock: 0.0,
            difference: 0.0,
            price: draft.price,
            average_price: draft.price,
            current_stock_value: 0.0,
            issues_value: 0.0,
            image: None,
            min_stock_limit: draft.min_stock_limit,
            last_activity: Some("created".into()),
            created_at: now,
            updated_at: now,
            last_modified_by: Some(self.config.device_id.clone()),
        };
        product.recompute_derived();

        if let Some(data) = draft.image {
            product.image = Some(self.store_image(&product.id, data).await?);
        }

        self.commit(EntityKind::Products, &product.id.clone(), &product)
            .await?;
        Ok(product)
    }

    /// Offloads or inlines an image; returns what the product should carry.
    async fn store_image(&self, product_id: &str, data: String) -> StoreResult<String> {
        if data.len() <= IMAGE_INLINE_LIMIT {
            return Ok(data);
        }
        let image = ProductImage {
            id: product_id.to_string(),
            product_id: product_id.to_string(),
            data,
            updated_at: Utc::now(),
        };
        self.commit(EntityKind::ProductImages, product_id, &image)
            .await?;
        Ok(DB_IMAGE_SENTINEL.to_string())
    }

    /// Replaces a product wholesale (fields edited by the caller).
    ///
    /// Derived ledger fields are recomputed; the caller cannot corrupt them.
    pub async fn update_product(&self, mut product: Product) -> StoreResult<Product> {
        let existed = {
            let cache = self.cache.read().await;
            cache.products.contains_key(&product.id)
        };
        if !existed {
            return Err(CoreError::ProductNotFound(product.id).into());
        }

        match product.image.take() {
            Some(data) if data != DB_IMAGE_SENTINEL => {
                product.image = Some(self.store_image(&product.id, data).await?);
            }
            Some(sentinel) => product.image = Some(sentinel),
            None => {
                // Image removed: drop the attachment record too.
                let had_image = {
                    let cache = self.cache.read().await;
                    cache.product_images.contains_key(&product.id)
                };
                if had_image {
                    self.delete_with_grace(EntityKind::ProductImages, &product.id.clone())
                        .await?;
                }
            }
        }

        product.recompute_derived();
        product.updated_at = Utc::now();
        product.last_modified_by = Some(self.config.device_id.clone());
        self.commit(EntityKind::Products, &product.id.clone(), &product)
            .await?;
        Ok(product)
    }

    /// Deletes a product and its image attachment.
    ///
    /// The deletion guard is marked before the local delete commits; the
    /// sync engine unmarks it after the cloud delete settles plus a grace
    /// window.
    pub async fn delete_product(&self, id: &str) -> StoreResult<()> {
        let (existed, had_image) = {
            let cache = self.cache.read().await;
            (
                cache.products.contains_key(id),
                cache.product_images.contains_key(id),
            )
        };
        if !existed {
            return Err(CoreError::ProductNotFound(id.to_string()).into());
        }

        if had_image {
            self.delete_with_grace(EntityKind::ProductImages, id).await?;
        }
        self.delete_with_grace(EntityKind::Products, id).await?;
        Ok(())
    }

    /// Delete wrapper used by public delete operations.
    async fn delete_with_grace(&self, kind: EntityKind, id: &str) -> StoreResult<bool> {
        self.commit_delete(kind, id).await
    }

    // -------------------------------------------------------------------------
    // Ledger transactions
    // -------------------------------------------------------------------------

    async fn product_for_ledger(&self, product_id: &str) -> StoreResult<Product> {
        let cache = self.cache.read().await;
        cache
            .products
            .get(product_id)
            .cloned()
            .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()).into())
    }

    async fn commit_ledger_result(
        &self,
        mut product: Product,
        activity: &str,
    ) -> StoreResult<Product> {
        product.last_activity = Some(activity.to_string());
        product.updated_at = Utc::now();
        product.last_modified_by = Some(self.config.device_id.clone());
        self.commit(EntityKind::Products, &product.id.clone(), &product)
            .await?;
        Ok(product)
    }

    fn new_transaction(
        &self,
        transaction_type: TransactionType,
        product: &Product,
        quantity: f64,
        unit_price: f64,
        total_amount: f64,
        notes: Option<String>,
    ) -> Transaction {
        Transaction {
            id: Uuid::new_v4().to_string(),
            transaction_type,
            product_id: product.id.clone(),
            product_name: product.product_name.clone(),
            quantity,
            unit_price,
            total_amount,
            notes,
            created_at: Utc::now(),
            last_modified_by: Some(self.config.device_id.clone()),
        }
    }

    /// Records a purchase: WAC fold plus an audit transaction.
    pub async fn record_purchase(
        &self,
        product_id: &str,
        quantity: f64,
        unit_price: f64,
        notes: Option<String>,
    ) -> StoreResult<Transaction> {
        let mut product = self.product_for_ledger(product_id).await?;
        ledger::purchase(&mut product, quantity, unit_price)?;
        let product = self.commit_ledger_result(product, "purchase").await?;

        let txn = self.new_transaction(
            TransactionType::Purchase,
            &product,
            quantity,
            unit_price,
            quantity * unit_price,
            notes,
        );
        self.commit(EntityKind::Transactions, &txn.id.clone(), &txn)
            .await?;
        Ok(txn)
    }

    /// Records a direct sale (issue outside an invoice document).
    pub async fn record_sale(
        &self,
        product_id: &str,
        quantity: f64,
        notes: Option<String>,
    ) -> StoreResult<Transaction> {
        let mut product = self.product_for_ledger(product_id).await?;
        let cost = ledger::issue(&mut product, quantity)?;
        let product = self.commit_ledger_result(product, "sale").await?;

        let unit_price = if quantity > 0.0 { cost / quantity } else { 0.0 };
        let txn = self.new_transaction(
            TransactionType::Sale,
            &product,
            quantity,
            unit_price,
            cost,
            notes,
        );
        self.commit(EntityKind::Transactions, &txn.id.clone(), &txn)
            .await?;
        Ok(txn)
    }

    /// Records a standalone return transaction (not via a return document).
    pub async fn record_return(
        &self,
        product_id: &str,
        quantity: f64,
        unit_price: Option<f64>,
        notes: Option<String>,
    ) -> StoreResult<Transaction> {
        let mut product = self.product_for_ledger(product_id).await?;
        let unit = ledger::restore(&mut product, quantity, unit_price)?;
        let product = self.commit_ledger_result(product, "return").await?;

        let txn = self.new_transaction(
            TransactionType::Return,
            &product,
            quantity,
            unit,
            quantity * unit,
            notes,
        );
        self.commit(EntityKind::Transactions, &txn.id.clone(), &txn)
            .await?;
        Ok(txn)
    }

    // -------------------------------------------------------------------------
    // Adjustments
    // -------------------------------------------------------------------------

    /// Records a physical count for one product.
    pub async fn add_adjustment(
        &self,
        product_id: &str,
        counted: f64,
        reason: Option<String>,
    ) -> StoreResult<InventoryAdjustment> {
        let mut product = self.product_for_ledger(product_id).await?;
        let old_quantity = {
            product.recompute_derived();
            product.current_stock
        };
        ledger::adjust(&mut product, counted)?;
        let product = self.commit_ledger_result(product, "adjustment").await?;

        let adjustment = InventoryAdjustment {
            id: Uuid::new_v4().to_string(),
            product_id: product.id.clone(),
            product_name: product.product_name.clone(),
            old_quantity,
            new_quantity: counted,
            difference: counted - old_quantity,
            reason,
            created_at: Utc::now(),
            last_modified_by: Some(self.config.device_id.clone()),
        };
        self.commit(
            EntityKind::InventoryAdjustments,
            &adjustment.id.clone(),
            &adjustment,
        )
        .await?;
        Ok(adjustment)
    }

    // -------------------------------------------------------------------------
    // Issues
    // -------------------------------------------------------------------------

    /// Builds document lines from drafts, snapshotting the current average
    /// price (falling back to the list price for never-purchased products).
    async fn snapshot_lines(&self, drafts: &[IssueLineDraft]) -> StoreResult<Vec<DocumentLine>> {
        let cache = self.cache.read().await;
        let mut lines = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let product = cache
                .products
                .get(&draft.product_id)
                .ok_or_else(|| CoreError::ProductNotFound(draft.product_id.clone()))?;
            let unit_price = if product.average_price > 0.0 {
                product.average_price
            } else {
                product.price
            };
            lines.push(DocumentLine {
                product_id: product.id.clone(),
                product_code: product.product_code.clone(),
                product_name: product.product_name.clone(),
                quantity: draft.quantity,
                unit_price,
                total_price: draft.quantity * unit_price,
                unit: product.unit.clone(),
            });
        }
        Ok(lines)
    }

    /// Creates an issue in `pending` state. No stock moves yet.
    pub async fn create_issue(&self, draft: IssueDraft) -> StoreResult<Issue> {
        let lines = self.snapshot_lines(&draft.lines).await?;
        let total_value = lines.iter().map(|l| l.total_price).sum();
        let invoice_number = self
            .next_document_number(makhzan_core::SequenceKind::Issue)
            .await?;

        let now = Utc::now();
        let issue = Issue {
            id: Uuid::new_v4().to_string(),
            invoice_number,
            branch_id: draft.branch_id,
            branch_name: draft.branch_name,
            products: lines,
            total_value,
            delivered: false,
            delivered_at: None,
            delivered_by: None,
            branch_received: false,
            branch_received_at: None,
            status: IssueStatus::Pending,
            notes: draft.notes,
            created_at: now,
            updated_at: now,
            last_modified_by: Some(self.config.device_id.clone()),
        };
        self.commit(EntityKind::Issues, &issue.id.clone(), &issue)
            .await?;
        Ok(issue)
    }

    async fn issue_by_id(&self, id: &str) -> StoreResult<Issue> {
        let cache = self.cache.read().await;
        cache
            .issues
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::IssueNotFound(id.to_string()).into())
    }

    /// Winds an issue's lines back out of the ledger (delivered issues only).
    async fn reverse_issue_stock(&self, issue: &Issue) -> StoreResult<()> {
        for line in &issue.products {
            let mut product = match self.product_for_ledger(&line.product_id).await {
                Ok(p) => p,
                Err(_) => {
                    warn!(
                        product_id = %line.product_id,
                        invoice = %issue.invoice_number,
                        "Product missing while reversing issue, skipping line"
                    );
                    continue;
                }
            };
            ledger::restore(&mut product, line.quantity, Some(line.unit_price))?;
            self.commit_ledger_result(product, "issue reversal").await?;
        }
        Ok(())
    }

    /// Deducts an issue's lines from the ledger at their snapshot prices.
    async fn apply_issue_stock(&self, issue: &Issue) -> StoreResult<()> {
        for line in &issue.products {
            let mut product = match self.product_for_ledger(&line.product_id).await {
                Ok(p) => p,
                Err(_) => {
                    warn!(
                        product_id = %line.product_id,
                        invoice = %issue.invoice_number,
                        "Product missing while delivering issue, skipping line"
                    );
                    continue;
                }
            };
            ledger::issue_at(&mut product, line.quantity, line.unit_price)?;
            let product = self.commit_ledger_result(product, "issue").await?;

            let txn = self.new_transaction(
                TransactionType::Sale,
                &product,
                line.quantity,
                line.unit_price,
                line.total_price,
                Some(issue.invoice_number.clone()),
            );
            self.commit(EntityKind::Transactions, &txn.id.clone(), &txn)
                .await?;
        }
        Ok(())
    }

    /// Replaces an issue's lines.
    ///
    /// Before delivery this is a pure document edit. After delivery the old
    /// lines are wound back and the new ones applied, so the ledger always
    /// matches the document that exists.
    pub async fn update_issue(
        &self,
        issue_id: &str,
        lines: Vec<IssueLineDraft>,
        notes: Option<String>,
    ) -> StoreResult<Issue> {
        let mut issue = self.issue_by_id(issue_id).await?;

        if issue.delivered {
            self.reverse_issue_stock(&issue).await?;
        }

        issue.products = self.snapshot_lines(&lines).await?;
        issue.total_value = issue.products.iter().map(|l| l.total_price).sum();
        issue.notes = notes;
        issue.updated_at = Utc::now();
        issue.last_modified_by = Some(self.config.device_id.clone());

        if issue.delivered {
            self.apply_issue_stock(&issue).await?;
        }

        self.commit(EntityKind::Issues, &issue.id.clone(), &issue)
            .await?;
        Ok(issue)
    }

    /// Marks an issue delivered and deducts stock — exactly once.
    ///
    /// A second call (double tap, or the same transition echoed back from
    /// another device) is a no-op.
    pub async fn set_issue_delivered(
        &self,
        issue_id: &str,
        delivered_by: Option<String>,
    ) -> StoreResult<Issue> {
        let mut issue = self.issue_by_id(issue_id).await?;
        if issue.delivered {
            debug!(invoice = %issue.invoice_number, "Issue already delivered, no-op");
            return Ok(issue);
        }

        self.apply_issue_stock(&issue).await?;

        issue.delivered = true;
        issue.delivered_at = Some(Utc::now());
        issue.delivered_by = delivered_by;
        issue.status = IssueStatus::Delivered;
        issue.updated_at = Utc::now();
        issue.last_modified_by = Some(self.config.device_id.clone());
        self.commit(EntityKind::Issues, &issue.id.clone(), &issue)
            .await?;
        Ok(issue)
    }

    /// Marks an issue as received by the branch (status flag only).
    pub async fn set_issue_branch_received(&self, issue_id: &str) -> StoreResult<Issue> {
        let mut issue = self.issue_by_id(issue_id).await?;
        if issue.branch_received {
            return Ok(issue);
        }
        issue.branch_received = true;
        issue.branch_received_at = Some(Utc::now());
        issue.updated_at = Utc::now();
        issue.last_modified_by = Some(self.config.device_id.clone());
        self.commit(EntityKind::Issues, &issue.id.clone(), &issue)
            .await?;
        Ok(issue)
    }

    /// Deletes an issue; a delivered issue's stock is wound back first.
    pub async fn delete_issue(&self, issue_id: &str) -> StoreResult<()> {
        let issue = self.issue_by_id(issue_id).await?;
        if issue.delivered {
            self.reverse_issue_stock(&issue).await?;
        }
        self.delete_with_grace(EntityKind::Issues, issue_id).await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Returns
    // -------------------------------------------------------------------------

    /// Creates a return in `pending` state. No stock moves until approval.
    ///
    /// When tied to an issue, line prices come from the matching issue lines;
    /// otherwise the current average is snapshotted.
    pub async fn create_return(&self, draft: ReturnDraft) -> StoreResult<Return> {
        let source_issue = match &draft.issue_id {
            Some(id) => Some(self.issue_by_id(id).await?),
            None => None,
        };

        let mut lines = self.snapshot_lines(&draft.lines).await?;
        if let Some(issue) = &source_issue {
            for line in &mut lines {
                if let Some(src) = issue
                    .products
                    .iter()
                    .find(|l| l.product_id == line.product_id)
                {
                    line.unit_price = src.unit_price;
                    line.total_price = line.quantity * src.unit_price;
                }
            }
        }
        let total_value = lines.iter().map(|l| l.total_price).sum();
        let return_number = self
            .next_document_number(makhzan_core::SequenceKind::Return)
            .await?;

        let now = Utc::now();
        let ret = Return {
            id: Uuid::new_v4().to_string(),
            return_number,
            source_type: draft.source_type,
            issue_id: draft.issue_id,
            original_invoice_number: source_issue.as_ref().map(|i| i.invoice_number.clone()),
            branch_id: source_issue.as_ref().map(|i| i.branch_id.clone()),
            branch_name: source_issue.as_ref().map(|i| i.branch_name.clone()),
            products: lines,
            total_value,
            reason: draft.reason,
            status: ReturnStatus::Pending,
            approved_by: None,
            approved_at: None,
            created_at: now,
            updated_at: now,
            last_modified_by: Some(self.config.device_id.clone()),
        };
        self.commit(EntityKind::Returns, &ret.id.clone(), &ret)
            .await?;
        Ok(ret)
    }

    async fn return_by_id(&self, id: &str) -> StoreResult<Return> {
        let cache = self.cache.read().await;
        cache
            .returns
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::ReturnNotFound(id.to_string()).into())
    }

    /// Approves a return and restores stock — the only stock-mutating
    /// transition, and idempotent.
    pub async fn approve_return(
        &self,
        return_id: &str,
        approved_by: Option<String>,
    ) -> StoreResult<Return> {
        let mut ret = self.return_by_id(return_id).await?;
        match ret.status {
            ReturnStatus::Approved | ReturnStatus::Completed => {
                debug!(number = %ret.return_number, "Return already approved, no-op");
                return Ok(ret);
            }
            ReturnStatus::Rejected => {
                return Err(CoreError::InvalidStatus {
                    entity: "Return",
                    id: ret.id,
                    status: "rejected".into(),
                }
                .into());
            }
            ReturnStatus::Pending => {}
        }

        for line in &ret.products {
            let mut product = match self.product_for_ledger(&line.product_id).await {
                Ok(p) => p,
                Err(_) => {
                    warn!(
                        product_id = %line.product_id,
                        number = %ret.return_number,
                        "Product missing while approving return, skipping line"
                    );
                    continue;
                }
            };

            // Invoice-tied lines restore at the invoice price; everything
            // else restores at the current average.
            let invoice_tied = (ret.source_type == ReturnSource::Issue && line.unit_price > 0.0)
                || ret.original_invoice_number.is_some();
            let invoice_price = invoice_tied.then_some(line.unit_price);
            let unit = ledger::restore(&mut product, line.quantity, invoice_price)?;
            let product = self.commit_ledger_result(product, "return").await?;

            let txn = self.new_transaction(
                TransactionType::Return,
                &product,
                line.quantity,
                unit,
                line.quantity * unit,
                Some(ret.return_number.clone()),
            );
            self.commit(EntityKind::Transactions, &txn.id.clone(), &txn)
                .await?;
        }

        ret.status = ReturnStatus::Approved;
        ret.approved_by = approved_by;
        ret.approved_at = Some(Utc::now());
        ret.updated_at = Utc::now();
        ret.last_modified_by = Some(self.config.device_id.clone());
        self.commit(EntityKind::Returns, &ret.id.clone(), &ret)
            .await?;
        Ok(ret)
    }

    /// Rejects a pending return. Idempotent on already-rejected.
    pub async fn reject_return(&self, return_id: &str) -> StoreResult<Return> {
        let mut ret = self.return_by_id(return_id).await?;
        match ret.status {
            ReturnStatus::Rejected => return Ok(ret),
            ReturnStatus::Pending => {}
            other => {
                return Err(CoreError::InvalidStatus {
                    entity: "Return",
                    id: ret.id,
                    status: format!("{other:?}").to_lowercase(),
                }
                .into());
            }
        }
        ret.status = ReturnStatus::Rejected;
        ret.updated_at = Utc::now();
        ret.last_modified_by = Some(self.config.device_id.clone());
        self.commit(EntityKind::Returns, &ret.id.clone(), &ret)
            .await?;
        Ok(ret)
    }

    /// Deletes a return document. Approved stock stays restored; deleting
    /// the paper does not undo the goods movement.
    pub async fn delete_return(&self, return_id: &str) -> StoreResult<()> {
        self.return_by_id(return_id).await?;
        self.delete_with_grace(EntityKind::Returns, return_id).await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Catalogs
    // -------------------------------------------------------------------------

    pub async fn add_category(&self, name: &str, color: Option<String>) -> StoreResult<Category> {
        let category = Category {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            color,
            created_at: Utc::now(),
        };
        self.commit(EntityKind::Categories, &category.id.clone(), &category)
            .await?;
        Ok(category)
    }

    pub async fn delete_category(&self, id: &str) -> StoreResult<()> {
        self.delete_with_grace(EntityKind::Categories, id).await?;
        Ok(())
    }

    pub async fn add_branch(
        &self,
        name: &str,
        location: Option<String>,
        phone: Option<String>,
    ) -> StoreResult<Branch> {
        let branch = Branch {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            location,
            phone,
            created_at: Utc::now(),
        };
        self.commit(EntityKind::Branches, &branch.id.clone(), &branch)
            .await?;
        Ok(branch)
    }

    pub async fn delete_branch(&self, id: &str) -> StoreResult<()> {
        self.delete_with_grace(EntityKind::Branches, id).await?;
        Ok(())
    }

    pub async fn add_unit(&self, name: &str, abbreviation: Option<String>) -> StoreResult<Unit> {
        let unit = Unit {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            abbreviation,
            created_at: Utc::now(),
        };
        self.commit(EntityKind::Units, &unit.id.clone(), &unit)
            .await?;
        Ok(unit)
    }

    pub async fn delete_unit(&self, id: &str) -> StoreResult<()> {
        self.delete_with_grace(EntityKind::Units, id).await?;
        Ok(())
    }

    pub async fn add_location(
        &self,
        name: &str,
        description: Option<String>,
    ) -> StoreResult<Location> {
        let location = Location {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description,
            created_at: Utc::now(),
        };
        self.commit(EntityKind::Locations, &location.id.clone(), &location)
            .await?;
        Ok(location)
    }

    pub async fn delete_location(&self, id: &str) -> StoreResult<()> {
        self.delete_with_grace(EntityKind::Locations, id).await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Auxiliary documents
    // -------------------------------------------------------------------------

    /// Stores a raw document (branch requests, purchase requests, ...),
    /// assigning an id when the caller didn't.
    pub async fn upsert_document(
        &self,
        kind: EntityKind,
        mut value: serde_json::Value,
    ) -> StoreResult<serde_json::Value> {
        let id = match value.get("id").and_then(|v| v.as_str()) {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                if let Some(obj) = value.as_object_mut() {
                    obj.insert("id".into(), serde_json::Value::String(id.clone()));
                }
                id
            }
        };

        self.db.records().upsert(kind, &id, &value).await?;
        {
            let mut cache = self.cache.write().await;
            cache.upsert(kind, &id, &value)?;
        }
        self.events.emit(kind);
        self.send_outbound(OutboundMutation::Record {
            kind,
            record_id: id,
            op: RetryOp::Upsert,
            payload: Some(value.clone()),
        });
        Ok(value)
    }

    /// Creates a branch invoice, allocating its `OP####` number.
    pub async fn create_branch_invoice(
        &self,
        mut value: serde_json::Value,
    ) -> StoreResult<serde_json::Value> {
        let number = self
            .next_document_number(makhzan_core::SequenceKind::BranchOps)
            .await?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("invoiceNumber".into(), serde_json::Value::String(number));
        }
        self.upsert_document(EntityKind::BranchInvoices, value).await
    }

    /// Deletes a raw document.
    pub async fn delete_document(&self, kind: EntityKind, id: &str) -> StoreResult<()> {
        self.delete_with_grace(kind, id).await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub async fn products(&self) -> Vec<Product> {
        let cache = self.cache.read().await;
        let mut out: Vec<Product> = cache.products.values().cloned().collect();
        out.sort_by(|a, b| a.product_name.cmp(&b.product_name));
        out
    }

    pub async fn product(&self, id: &str) -> Option<Product> {
        self.cache.read().await.products.get(id).cloned()
    }

    pub async fn product_by_code(&self, code: &str) -> Option<Product> {
        let cache = self.cache.read().await;
        cache
            .products
            .values()
            .find(|p| p.product_code == code)
            .cloned()
    }

    pub async fn low_stock_products(&self) -> Vec<Product> {
        let cache = self.cache.read().await;
        let mut out: Vec<Product> = cache
            .products
            .values()
            .filter(|p| p.is_low_stock())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.product_name.cmp(&b.product_name));
        out
    }

    pub async fn transactions(&self) -> Vec<Transaction> {
        let cache = self.cache.read().await;
        let mut out: Vec<Transaction> = cache.transactions.values().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub async fn issues(&self) -> Vec<Issue> {
        let cache = self.cache.read().await;
        let mut out: Vec<Issue> = cache.issues.values().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub async fn issue(&self, id: &str) -> Option<Issue> {
        self.cache.read().await.issues.get(id).cloned()
    }

    pub async fn returns(&self) -> Vec<Return> {
        let cache = self.cache.read().await;
        let mut out: Vec<Return> = cache.returns.values().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub async fn return_document(&self, id: &str) -> Option<Return> {
        self.cache.read().await.returns.get(id).cloned()
    }

    pub async fn categories(&self) -> Vec<Category> {
        self.cache.read().await.categories.values().cloned().collect()
    }

    pub async fn branches(&self) -> Vec<Branch> {
        self.cache.read().await.branches.values().cloned().collect()
    }

    pub async fn units(&self) -> Vec<Unit> {
        self.cache.read().await.units.values().cloned().collect()
    }

    pub async fn locations(&self) -> Vec<Location> {
        self.cache.read().await.locations.values().cloned().collect()
    }

    pub async fn adjustments(&self) -> Vec<InventoryAdjustment> {
        let cache = self.cache.read().await;
        let mut out: Vec<InventoryAdjustment> = cache.adjustments.values().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub async fn product_image(&self, product_id: &str) -> Option<ProductImage> {
        self.cache.read().await.product_images.get(product_id).cloned()
    }

    /// Raw documents of one kind, straight from the cache.
    pub async fn documents(&self, kind: EntityKind) -> Vec<serde_json::Value> {
        let cache = self.cache.read().await;
        match kind {
            EntityKind::BranchRequests => cache.branch_requests.values().cloned().collect(),
            EntityKind::BranchInvoices => cache.branch_invoices.values().cloned().collect(),
            EntityKind::PurchaseRequests => cache.purchase_requests.values().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Aggregates the transaction trail.
    pub async fn financial_summary(&self) -> FinancialSummary {
        let cache = self.cache.read().await;
        let mut summary = FinancialSummary::default();
        for txn in cache.transactions.values() {
            match txn.transaction_type {
                TransactionType::Purchase => {
                    summary.purchase_count += 1;
                    summary.purchase_value += txn.total_amount;
                }
                TransactionType::Sale => {
                    summary.issue_count += 1;
                    summary.issue_value += txn.total_amount;
                }
                TransactionType::Return => {
                    summary.return_count += 1;
                    summary.return_value += txn.total_amount;
                }
                TransactionType::Adjustment => {
                    summary.adjustment_count += 1;
                }
            }
        }
        summary
    }

    /// Number of cached records of one kind (heartbeat counters).
    pub async fn record_count(&self, kind: EntityKind) -> usize {
        self.cache.read().await.len(kind)
    }

    // -------------------------------------------------------------------------
    // Remote applies (called by the sync engine)
    // -------------------------------------------------------------------------

    /// Applies one subscription batch from the cloud.
    ///
    /// Guarded ids are skipped (resurrection protection), malformed payloads
    /// are warned and skipped, and exactly one event pair fires for the
    /// whole batch.
    pub async fn apply_remote_batch(
        &self,
        kind: EntityKind,
        upserts: Vec<(String, serde_json::Value)>,
        removed: Vec<String>,
    ) -> StoreResult<RemoteApplyStats> {
        let mut stats = RemoteApplyStats::default();
        let mut accepted: Vec<(String, serde_json::Value)> = Vec::new();

        {
            let mut cache = self.cache.write().await;
            for (id, value) in upserts {
                if self.guard.is_deleting(&id) {
                    debug!(kind = %kind, id = %id, "Skipping guarded remote upsert");
                    stats.skipped += 1;
                    continue;
                }
                match cache.upsert(kind, &id, &value) {
                    Ok(()) => {
                        accepted.push((id, value));
                        stats.applied += 1;
                    }
                    Err(e) => {
                        warn!(kind = %kind, id = %id, error = %e, "Malformed remote record, skipping");
                        stats.skipped += 1;
                    }
                }
            }
            for id in &removed {
                if self.guard.is_deleting(id) {
                    stats.skipped += 1;
                    continue;
                }
                cache.remove(kind, id);
                stats.applied += 1;
            }
        }

        self.db.records().bulk_upsert(kind, &accepted).await?;
        for id in &removed {
            if !self.guard.is_deleting(id) {
                self.db.records().delete(kind, id).await?;
            }
        }

        if stats.applied > 0 {
            self.events.emit(kind);
        }
        Ok(stats)
    }

    /// Replaces one kind with the server's full collection contents.
    ///
    /// Local records absent from the payload are pruned UNLESS they have a
    /// pending upsert in the retry queue or are deletion-guarded — those are
    /// local truth the server simply hasn't seen yet.
    pub async fn replace_kind_from_cloud(
        &self,
        kind: EntityKind,
        docs: Vec<serde_json::Value>,
    ) -> StoreResult<PullStats> {
        let mut stats = PullStats::default();

        let pending: std::collections::HashSet<String> = self
            .db
            .retry_queue()
            .pending_upsert_ids(kind.collection())
            .await?
            .into_iter()
            .collect();
        let guarded = self.guard.snapshot();

        let mut server_ids: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut accepted: Vec<(String, serde_json::Value)> = Vec::new();
        {
            let mut cache = self.cache.write().await;
            for doc in docs {
                let id = match doc.get("id").and_then(|v| v.as_str()) {
                    Some(id) => id.to_string(),
                    None => {
                        warn!(kind = %kind, "Server document without id, skipping");
                        continue;
                    }
                };
                server_ids.insert(id.clone());
                if guarded.contains(&id) {
                    stats.protected += 1;
                    continue;
                }
                match cache.upsert(kind, &id, &doc) {
                    Ok(()) => {
                        accepted.push((id, doc));
                        stats.upserted += 1;
                    }
                    Err(e) => {
                        warn!(kind = %kind, id = %id, error = %e, "Malformed server record, skipping");
                    }
                }
            }
        }
        self.db.records().bulk_upsert(kind, &accepted).await?;

        // Prune local records the server no longer has.
        let local_ids = self.db.records().ids(kind).await?;
        for id in local_ids {
            if server_ids.contains(&id) {
                continue;
            }
            if pending.contains(&id) || guarded.contains(&id) {
                stats.protected += 1;
                continue;
            }
            self.db.records().delete(kind, &id).await?;
            let mut cache = self.cache.write().await;
            cache.remove(kind, &id);
            stats.pruned += 1;
        }

        self.events.emit(kind);
        info!(
            kind = %kind,
            upserted = stats.upserted,
            pruned = stats.pruned,
            protected = stats.protected,
            "Replaced kind from cloud"
        );
        Ok(stats)
    }

    /// Clears the force-resync kinds ahead of a fresh pull.
    pub async fn clear_for_resync(&self) -> StoreResult<()> {
        for kind in EntityKind::FORCE_RESYNC {
            self.db.records().clear(kind).await?;
            let mut cache = self.cache.write().await;
            cache.clear_kind(kind);
            self.events.emit(kind);
        }
        Ok(())
    }

    /// Wipes everything (device `wipe_and_logout` command).
    pub async fn wipe(&self) -> StoreResult<()> {
        self.db.wipe_all().await?;
        {
            let mut cache = self.cache.write().await;
            cache.clear_all();
        }
        self.events.emit_change();
        Ok(())
    }

    /// Full local contents of one kind (bulk push source).
    pub async fn all_documents(&self, kind: EntityKind) -> StoreResult<Vec<serde_json::Value>> {
        Ok(self.db.records().all(kind).await?)
    }

    // -------------------------------------------------------------------------
    // Bulk clears (maintenance)
    // -------------------------------------------------------------------------

    /// Deletes every transaction, locally and in the cloud.
    pub async fn clear_transactions(&self) -> StoreResult<u64> {
        self.clear_kind_everywhere(EntityKind::Transactions).await
    }

    /// Deletes every issue, locally and in the cloud.
    pub async fn clear_issues(&self) -> StoreResult<u64> {
        self.clear_kind_everywhere(EntityKind::Issues).await
    }

    async fn clear_kind_everywhere(&self, kind: EntityKind) -> StoreResult<u64> {
        let ids = self.db.records().ids(kind).await?;
        for id in &ids {
            self.guard.mark(id);
        }
        let removed = self.db.records().clear(kind).await?;
        {
            let mut cache = self.cache.write().await;
            cache.clear_kind(kind);
        }
        self.events.emit(kind);
        for id in ids {
            self.send_outbound(OutboundMutation::Record {
                kind,
                record_id: id,
                op: RetryOp::Delete,
                payload: None,
            });
        }
        Ok(removed)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store() -> (Store, mpsc::UnboundedReceiver<OutboundMutation>) {
        Store::open(StoreConfig::in_memory("dev-test"))
            .await
            .unwrap()
    }

    fn draft(code: &str, name: &str, opening: f64, price: f64) -> ProductDraft {
        ProductDraft {
            product_code: code.to_string(),
            product_name: name.to_string(),
            opening_stock: opening,
            price,
            ..ProductDraft::default()
        }
    }

    #[tokio::test]
    async fn add_product_rejects_duplicates() {
        let (store, _rx) = open_store().await;
        store.add_product(draft("P-1", "Rice", 10.0, 5.0)).await.unwrap();

        let err = store
            .add_product(draft("P-1", "Other", 0.0, 1.0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn purchase_flows_through_ledger_and_emits() {
        let (store, mut rx) = open_store().await;
        let p = store.add_product(draft("P-1", "Rice", 10.0, 5.0)).await.unwrap();

        store
            .record_purchase(&p.id, 10.0, 7.0, None)
            .await
            .unwrap();

        let updated = store.product(&p.id).await.unwrap();
        assert!((updated.average_price - 6.0).abs() < 1e-9);
        assert_eq!(updated.current_stock, 20.0);
        assert_eq!(updated.last_modified_by.as_deref(), Some("dev-test"));

        // add_product + product update + transaction = 3 record mutations
        let mut upserts = 0;
        while let Ok(m) = rx.try_recv() {
            if matches!(m, OutboundMutation::Record { op: RetryOp::Upsert, .. }) {
                upserts += 1;
            }
        }
        assert_eq!(upserts, 3);
    }

    #[tokio::test]
    async fn issue_delivery_is_idempotent() {
        let (store, _rx) = open_store().await;
        let p = store.add_product(draft("P-1", "Rice", 10.0, 5.0)).await.unwrap();

        let issue = store
            .create_issue(IssueDraft {
                branch_id: "b1".into(),
                branch_name: "Branch".into(),
                lines: vec![IssueLineDraft {
                    product_id: p.id.clone(),
                    quantity: 4.0,
                }],
                notes: None,
            })
            .await
            .unwrap();
        assert!(issue.invoice_number.starts_with("SW"));
        assert_eq!(store.product(&p.id).await.unwrap().current_stock, 10.0);

        store.set_issue_delivered(&issue.id, None).await.unwrap();
        assert_eq!(store.product(&p.id).await.unwrap().current_stock, 6.0);

        // Second delivery must not double-deduct.
        store.set_issue_delivered(&issue.id, None).await.unwrap();
        assert_eq!(store.product(&p.id).await.unwrap().current_stock, 6.0);
    }

    #[tokio::test]
    async fn approve_return_restores_and_is_idempotent() {
        let (store, _rx) = open_store().await;
        let p = store.add_product(draft("P-1", "Rice", 10.0, 5.0)).await.unwrap();

        let issue = store
            .create_issue(IssueDraft {
                branch_id: "b1".into(),
                branch_name: "Branch".into(),
                lines: vec![IssueLineDraft {
                    product_id: p.id.clone(),
                    quantity: 4.0,
                }],
                notes: None,
            })
            .await
            .unwrap();
        store.set_issue_delivered(&issue.id, None).await.unwrap();

        let ret = store
            .create_return(ReturnDraft {
                source_type: ReturnSource::Issue,
                issue_id: Some(issue.id.clone()),
                reason: None,
                lines: vec![IssueLineDraft {
                    product_id: p.id.clone(),
                    quantity: 4.0,
                }],
            })
            .await
            .unwrap();
        assert!(ret.return_number.starts_with('R'));
        assert_eq!(
            ret.original_invoice_number.as_deref(),
            Some(issue.invoice_number.as_str())
        );

        store.approve_return(&ret.id, Some("admin".into())).await.unwrap();
        assert_eq!(store.product(&p.id).await.unwrap().current_stock, 10.0);

        // Echoed approval is a no-op.
        store.approve_return(&ret.id, None).await.unwrap();
        assert_eq!(store.product(&p.id).await.unwrap().current_stock, 10.0);
    }

    #[tokio::test]
    async fn delete_product_marks_guard_and_emits_delete() {
        let (store, mut rx) = open_store().await;
        let p = store.add_product(draft("P-1", "Rice", 10.0, 5.0)).await.unwrap();
        while rx.try_recv().is_ok() {}

        store.delete_product(&p.id).await.unwrap();
        assert!(store.guard().is_deleting(&p.id));
        assert!(store.product(&p.id).await.is_none());

        let m = rx.try_recv().unwrap();
        assert_eq!(
            m,
            OutboundMutation::Record {
                kind: EntityKind::Products,
                record_id: p.id.clone(),
                op: RetryOp::Delete,
                payload: None,
            }
        );
    }

    #[tokio::test]
    async fn remote_upsert_for_guarded_id_is_skipped() {
        let (store, _rx) = open_store().await;
        let p = store.add_product(draft("P-1", "Rice", 10.0, 5.0)).await.unwrap();
        let echo = serde_json::to_value(&p).unwrap();

        store.delete_product(&p.id).await.unwrap();

        // Cloud echoes the pre-delete document back.
        let stats = store
            .apply_remote_batch(EntityKind::Products, vec![(p.id.clone(), echo)], vec![])
            .await
            .unwrap();
        assert_eq!(stats.skipped, 1);
        assert!(store.product(&p.id).await.is_none(), "deleted stays deleted");
    }

    #[tokio::test]
    async fn remote_batch_applies_and_counts_malformed() {
        let (store, _rx) = open_store().await;
        let good = serde_json::json!({
            "id": "c1", "name": "Food", "createdAt": "2026-01-01T00:00:00Z"
        });
        let bad = serde_json::json!({"id": "c2", "name": 5});

        let stats = store
            .apply_remote_batch(
                EntityKind::Categories,
                vec![("c1".into(), good), ("c2".into(), bad)],
                vec![],
            )
            .await
            .unwrap();
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(store.categories().await.len(), 1);
    }

    #[tokio::test]
    async fn reapplying_a_remote_upsert_changes_nothing() {
        let (store, _rx) = open_store().await;
        let doc = serde_json::json!({
            "id": "p1", "productCode": "P-1", "productName": "Rice",
            "openingStock": 10.0, "purchases": 5.0, "issues": 2.0,
            "currentStock": 13.0, "price": 5.0, "averagePrice": 5.0,
            "createdAt": "2026-01-01T00:00:00Z", "updatedAt": "2026-01-01T00:00:00Z",
        });

        for _ in 0..2 {
            let stats = store
                .apply_remote_batch(
                    EntityKind::Products,
                    vec![("p1".into(), doc.clone())],
                    vec![],
                )
                .await
                .unwrap();
            assert_eq!(stats.applied, 1);
        }

        let products = store.products().await;
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].purchases, 5.0);
        assert_eq!(products[0].current_stock, 13.0);
    }

    #[tokio::test]
    async fn pull_prunes_unprotected_and_keeps_pending() {
        let (store, _rx) = open_store().await;
        let kept = store.add_product(draft("P-1", "Kept", 1.0, 1.0)).await.unwrap();
        let pruned = store.add_product(draft("P-2", "Pruned", 1.0, 1.0)).await.unwrap();

        // P-1 has a pending upsert in the retry queue → protected.
        store
            .db()
            .retry_queue()
            .enqueue(
                EntityKind::Products.collection(),
                &kept.id,
                RetryOp::Upsert,
                Some("{}"),
            )
            .await
            .unwrap();

        // Server knows neither product.
        let stats = store
            .replace_kind_from_cloud(EntityKind::Products, vec![])
            .await
            .unwrap();
        assert_eq!(stats.pruned, 1);
        assert_eq!(stats.protected, 1);
        assert!(store.product(&kept.id).await.is_some());
        assert!(store.product(&pruned.id).await.is_none());
    }

    #[tokio::test]
    async fn financial_summary_aggregates_by_type() {
        let (store, _rx) = open_store().await;
        let p = store.add_product(draft("P-1", "Rice", 10.0, 5.0)).await.unwrap();
        store.record_purchase(&p.id, 10.0, 7.0, None).await.unwrap();
        store.record_sale(&p.id, 2.0, None).await.unwrap();

        let s = store.financial_summary().await;
        assert_eq!(s.purchase_count, 1);
        assert_eq!(s.issue_count, 1);
        assert!((s.purchase_value - 70.0).abs() < 1e-9);
        assert!((s.issue_value - 12.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn image_offload_uses_sentinel() {
        let (store, _rx) = open_store().await;
        let mut d = draft("P-1", "Rice", 1.0, 1.0);
        d.image = Some("x".repeat(2000));
        let p = store.add_product(d).await.unwrap();

        assert_eq!(p.image.as_deref(), Some(DB_IMAGE_SENTINEL));
        let image = store.product_image(&p.id).await.unwrap();
        assert_eq!(image.data.len(), 2000);

        // Small images stay inline.
        let mut d2 = draft("P-2", "Sugar", 1.0, 1.0);
        d2.image = Some("tiny".into());
        let p2 = store.add_product(d2).await.unwrap();
        assert_eq!(p2.image.as_deref(), Some("tiny"));
        assert!(store.product_image(&p2.id).await.is_none());
    }
}
