//! # Ledger / Valuation Engine
//!
//! Pure stock and valuation math, applied to one [`Product`] at a time.
//!
//! ## Valuation Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Weighted Average Cost (WAC)                          │
//! │                                                                         │
//! │  PURCHASE (qty q at price p, stock S at average A)                      │
//! │       S > 0:   A' = (S·A + q·p) / (S + q)                               │
//! │       S ≤ 0:   A' = p          (restock after stock-out resets cost)    │
//! │                                                                         │
//! │  ISSUE (qty q)                                                          │
//! │       issues += q,  issuesValue += q·A     (A unchanged)                │
//! │                                                                         │
//! │  RETURN (qty q at unit cost u)                                          │
//! │       u = invoice line price when tied to an invoice, else A            │
//! │       V' = max(0, V + q·u),   A' = V'/S' if S' > 0 else u               │
//! │       issues, issuesValue floored at 0                                  │
//! │                                                                         │
//! │  ALWAYS:  currentStock = openingStock + purchases − issues              │
//! │           currentStockValue = currentStock · averagePrice               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Self-Correcting Derived Fields
//! Every operation ends with a full recompute from the source counters.
//! A device that received a document with drifted derived fields heals it on
//! the next local mutation.

use crate::error::{CoreError, CoreResult};
use crate::types::Product;

// =============================================================================
// Input Validation
// =============================================================================

fn require_positive(field: &'static str, value: f64) -> CoreResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(CoreError::InvalidLedgerInput { field, value });
    }
    Ok(())
}

fn require_non_negative(field: &'static str, value: f64) -> CoreResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(CoreError::InvalidLedgerInput { field, value });
    }
    Ok(())
}

// =============================================================================
// Operations
// =============================================================================

/// Records a purchase of `quantity` units at `unit_price`.
///
/// Folds the new units into the weighted average. A purchase into zero or
/// negative stock resets the average to the purchase price: there is nothing
/// on hand to average against, and a stale average from before a stock-out
/// must not leak into the new stock's valuation.
pub fn purchase(product: &mut Product, quantity: f64, unit_price: f64) -> CoreResult<()> {
    require_positive("quantity", quantity)?;
    require_non_negative("unitPrice", unit_price)?;

    product.recompute_derived();
    let stock = product.current_stock;

    product.average_price = if stock > 0.0 {
        (stock * product.average_price + quantity * unit_price) / (stock + quantity)
    } else {
        unit_price
    };
    product.purchases += quantity;
    product.price = unit_price;
    product.recompute_derived();
    Ok(())
}

/// Records an issue (outbound) of `quantity` units.
///
/// Issued units are charged at the current average; the average itself does
/// not move. Stock may go negative — a device that has not yet pulled a
/// purchase from another device must still be able to record the physical
/// issue that happened.
///
/// Returns the cost charged (`quantity × averagePrice`), which callers use
/// as the transaction amount.
pub fn issue(product: &mut Product, quantity: f64) -> CoreResult<f64> {
    product.recompute_derived();
    let unit_cost = product.average_price;
    issue_at(product, quantity, unit_cost)
}

/// Records an issue of `quantity` units at an explicit unit cost.
///
/// Used when an issue document is delivered: its lines carry the average
/// price snapshotted at creation, and delivery charges those prices even if
/// the running average has moved since.
pub fn issue_at(product: &mut Product, quantity: f64, unit_cost: f64) -> CoreResult<f64> {
    require_positive("quantity", quantity)?;
    require_non_negative("unitPrice", unit_cost)?;

    product.recompute_derived();
    let cost = quantity * unit_cost;
    product.issues += quantity;
    product.issues_value += cost;
    product.recompute_derived();
    Ok(cost)
}

/// Restores `quantity` units returned against an issue or purchase.
///
/// `invoice_price` carries the original invoice line price when the return
/// is tied to an invoice; `None` restores at the current average. The issue
/// counters are wound back and floored at zero so a return recorded against
/// a period that was since closed cannot drive them negative.
pub fn restore(product: &mut Product, quantity: f64, invoice_price: Option<f64>) -> CoreResult<f64> {
    require_positive("quantity", quantity)?;
    if let Some(p) = invoice_price {
        require_non_negative("unitPrice", p)?;
    }

    product.recompute_derived();
    let unit_cost = invoice_price.unwrap_or(product.average_price);
    let prev_value = product.current_stock_value;

    product.issues = (product.issues - quantity).max(0.0);
    product.issues_value = (product.issues_value - quantity * unit_cost).max(0.0);
    product.current_stock = product.opening_stock + product.purchases - product.issues;

    let new_value = (prev_value + quantity * unit_cost).max(0.0);
    product.average_price = if product.current_stock > 0.0 {
        new_value / product.current_stock
    } else {
        unit_cost
    };
    product.recompute_derived();
    Ok(unit_cost)
}

/// Records a physical count.
///
/// The count does not rewrite the flow counters; it only sets
/// `inventoryCount`, from which `difference` is derived. Reconciliation
/// happens at period close.
pub fn adjust(product: &mut Product, counted: f64) -> CoreResult<()> {
    require_non_negative("inventoryCount", counted)?;

    product.inventory_count = counted;
    product.recompute_derived();
    Ok(())
}

/// Closes the current period for one product.
///
/// The physical count wins when one was entered (`inventoryCount > 0`),
/// otherwise the computed stock carries over. Flow counters reset; the
/// average price carries across periods.
pub fn close_period(product: &mut Product) {
    product.recompute_derived();
    let base_stock = if product.inventory_count > 0.0 {
        product.inventory_count
    } else {
        product.current_stock
    };

    product.opening_stock = base_stock;
    product.purchases = 0.0;
    product.issues = 0.0;
    product.issues_value = 0.0;
    product.inventory_count = 0.0;
    product.recompute_derived();
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const EPS: f64 = 1e-9;

    fn product(opening: f64, average: f64) -> Product {
        let mut p = Product {
            id: "p1".into(),
            product_code: "P-100".into(),
            item_number: None,
            product_name: "Rice 5kg".into(),
            location: None,
            category: None,
            unit: None,
            quantity: 0.0,
            opening_stock: opening,
            purchases: 0.0,
            issues: 0.0,
            inventory_count: 0.0,
            current_stock: 0.0,
            difference: 0.0,
            price: average,
            average_price: average,
            current_stock_value: 0.0,
            issues_value: 0.0,
            image: None,
            min_stock_limit: None,
            last_activity: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_modified_by: None,
        };
        p.recompute_derived();
        p
    }

    fn assert_invariants(p: &Product) {
        assert!(
            (p.current_stock - (p.opening_stock + p.purchases - p.issues)).abs() < EPS,
            "stock formula violated"
        );
        assert!(
            (p.current_stock_value - p.current_stock * p.average_price).abs() < EPS,
            "value formula violated"
        );
        assert!(p.issues >= 0.0);
        assert!(p.issues_value >= -EPS);
    }

    #[test]
    fn purchase_folds_into_weighted_average() {
        // 10 on hand at 5.00, buy 10 at 7.00 → average 6.00
        let mut p = product(10.0, 5.0);
        purchase(&mut p, 10.0, 7.0).unwrap();
        assert!((p.average_price - 6.0).abs() < EPS);
        assert_eq!(p.current_stock, 20.0);
        assert_eq!(p.price, 7.0);
        assert_invariants(&p);
    }

    #[test]
    fn purchase_into_empty_stock_takes_purchase_price() {
        let mut p = product(0.0, 99.0);
        purchase(&mut p, 5.0, 7.0).unwrap();
        assert_eq!(p.average_price, 7.0);
        assert_eq!(p.current_stock, 5.0);
        assert_invariants(&p);
    }

    #[test]
    fn purchase_into_negative_stock_resets_average() {
        let mut p = product(0.0, 5.0);
        issue(&mut p, 3.0).unwrap();
        assert_eq!(p.current_stock, -3.0);
        purchase(&mut p, 10.0, 8.0).unwrap();
        assert_eq!(p.average_price, 8.0);
        assert_invariants(&p);
    }

    #[test]
    fn issue_charges_average_without_moving_it() {
        let mut p = product(10.0, 6.0);
        let cost = issue(&mut p, 4.0).unwrap();
        assert!((cost - 24.0).abs() < EPS);
        assert_eq!(p.average_price, 6.0);
        assert_eq!(p.current_stock, 6.0);
        assert!((p.issues_value - 24.0).abs() < EPS);
        assert_invariants(&p);
    }

    #[test]
    fn issue_at_snapshot_price_ignores_moved_average() {
        let mut p = product(10.0, 6.0);
        purchase(&mut p, 10.0, 8.0).unwrap(); // average now 7.0
        let cost = issue_at(&mut p, 2.0, 6.0).unwrap();
        assert!((cost - 12.0).abs() < EPS);
        assert!((p.issues_value - 12.0).abs() < EPS);
        assert!((p.average_price - 7.0).abs() < EPS);
        assert_invariants(&p);
    }

    #[test]
    fn return_at_invoice_price_is_inverse_of_issue() {
        let mut p = product(10.0, 6.0);
        let before = p.clone();
        issue(&mut p, 4.0).unwrap();
        restore(&mut p, 4.0, Some(6.0)).unwrap();
        assert!((p.current_stock - before.current_stock).abs() < EPS);
        assert!((p.average_price - before.average_price).abs() < EPS);
        assert!((p.issues_value - before.issues_value).abs() < EPS);
        assert_invariants(&p);
    }

    #[test]
    fn return_at_different_price_moves_average() {
        // 6 on hand at 6.00 (value 36), return 2 at invoice price 9.00
        // → stock 8, value 54, average 6.75
        let mut p = product(10.0, 6.0);
        issue(&mut p, 4.0).unwrap();
        restore(&mut p, 2.0, Some(9.0)).unwrap();
        assert_eq!(p.current_stock, 8.0);
        assert!((p.average_price - 54.0 / 8.0).abs() < EPS);
        assert_invariants(&p);
    }

    #[test]
    fn return_without_invoice_uses_current_average() {
        let mut p = product(10.0, 6.0);
        issue(&mut p, 4.0).unwrap();
        let unit = restore(&mut p, 1.0, None).unwrap();
        assert_eq!(unit, 6.0);
        assert_eq!(p.average_price, 6.0);
        assert_invariants(&p);
    }

    #[test]
    fn return_floors_issue_counters_at_zero() {
        // Return recorded after a period close wound the counters to zero:
        // nothing to unwind, so stock holds and only the valuation absorbs
        // the returned units.
        let mut p = product(10.0, 6.0);
        restore(&mut p, 3.0, Some(6.0)).unwrap();
        assert_eq!(p.issues, 0.0);
        assert_eq!(p.issues_value, 0.0);
        assert_eq!(p.current_stock, 10.0);
        assert!((p.average_price - 78.0 / 10.0).abs() < EPS);
        assert_invariants(&p);
    }

    #[test]
    fn return_into_non_positive_stock_sets_average_to_unit_cost() {
        // Nothing to unwind (issues already 0) and stock not positive:
        // the average falls back to the return's unit cost.
        let mut p = product(0.0, 0.0);
        p.opening_stock = -2.0;
        p.recompute_derived();
        restore(&mut p, 2.0, Some(5.0)).unwrap();
        assert_eq!(p.current_stock, -2.0);
        assert_eq!(p.average_price, 5.0);
        assert_invariants(&p);
    }

    #[test]
    fn adjustment_sets_count_only() {
        let mut p = product(10.0, 6.0);
        adjust(&mut p, 8.0).unwrap();
        assert_eq!(p.inventory_count, 8.0);
        assert_eq!(p.opening_stock, 10.0);
        assert_eq!(p.current_stock, 10.0);
        assert_eq!(p.difference, -2.0);
        assert_invariants(&p);
    }

    #[test]
    fn close_period_without_count_carries_computed_stock() {
        // opening 100, purchases 50, issues 30, no count → base 120
        let mut p = product(100.0, 4.0);
        purchase(&mut p, 50.0, 4.0).unwrap();
        issue(&mut p, 30.0).unwrap();
        close_period(&mut p);
        assert_eq!(p.opening_stock, 120.0);
        assert_eq!(p.current_stock, 120.0);
        assert_eq!(p.purchases, 0.0);
        assert_eq!(p.issues, 0.0);
        assert_eq!(p.issues_value, 0.0);
        assert_eq!(p.inventory_count, 0.0);
        assert_invariants(&p);
    }

    #[test]
    fn close_period_prefers_physical_count() {
        let mut p = product(100.0, 4.0);
        adjust(&mut p, 95.0).unwrap();
        close_period(&mut p);
        assert_eq!(p.opening_stock, 95.0);
        assert_eq!(p.current_stock, 95.0);
        assert_eq!(p.inventory_count, 0.0);
        assert_invariants(&p);
    }

    #[test]
    fn rejects_invalid_inputs() {
        let mut p = product(10.0, 5.0);
        assert!(purchase(&mut p, 0.0, 5.0).is_err());
        assert!(purchase(&mut p, -1.0, 5.0).is_err());
        assert!(purchase(&mut p, 1.0, f64::NAN).is_err());
        assert!(issue(&mut p, 0.0).is_err());
        assert!(restore(&mut p, -2.0, None).is_err());
        assert!(adjust(&mut p, -1.0).is_err());
    }

    #[test]
    fn invariants_hold_over_mixed_sequence() {
        let mut p = product(50.0, 3.0);
        purchase(&mut p, 25.0, 4.0).unwrap();
        issue(&mut p, 40.0).unwrap();
        restore(&mut p, 5.0, Some(3.5)).unwrap();
        adjust(&mut p, 38.0).unwrap();
        purchase(&mut p, 10.0, 5.0).unwrap();
        issue(&mut p, 12.0).unwrap();
        assert_invariants(&p);
        close_period(&mut p);
        assert_invariants(&p);
        assert_eq!(p.opening_stock, 38.0);
    }
}
