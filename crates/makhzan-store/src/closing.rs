//! # Month-End Close
//!
//! Rolls every product's period counters into a fresh opening stock and
//! records the close under the `last_month_closing` setting. The close
//! record also drives the "you haven't closed this month yet" alert.
//!
//! The physical count wins when one was entered (`inventoryCount > 0`);
//! otherwise the computed stock carries over.

use chrono::Utc;
use tracing::info;

use makhzan_core::{ledger, MonthClosing};

use crate::error::StoreResult;
use crate::store::Store;

/// Settings key the close record persists under (locally and in the cloud
/// settings document).
pub const LAST_MONTH_CLOSING_KEY: &str = "last_month_closing";

fn current_month() -> String {
    Utc::now().format("%Y-%m").to_string()
}

impl Store {
    /// Closes the current period across all products.
    pub async fn close_month(&self) -> StoreResult<MonthClosing> {
        let products = self.products().await;
        let product_count = products.len() as u64;

        for mut product in products {
            ledger::close_period(&mut product);
            product.last_activity = Some("month close".into());
            self.update_product(product).await?;
        }

        let closing = MonthClosing {
            month: current_month(),
            closed_at: Utc::now(),
            product_count,
        };
        let value = serde_json::to_value(&closing)?;
        self.db()
            .settings()
            .set(LAST_MONTH_CLOSING_KEY, &value)
            .await?;
        self.send_setting(LAST_MONTH_CLOSING_KEY, value);

        info!(
            month = %closing.month,
            products = product_count,
            "Month closed"
        );
        Ok(closing)
    }

    /// The last recorded close, if any.
    pub async fn last_month_closing(&self) -> StoreResult<Option<MonthClosing>> {
        match self.db().settings().get(LAST_MONTH_CLOSING_KEY).await? {
            Some(value) => Ok(serde_json::from_value(value).ok()),
            None => Ok(None),
        }
    }

    /// True when no close has been recorded for the current month.
    pub async fn should_close_alert(&self) -> StoreResult<bool> {
        match self.last_month_closing().await? {
            Some(closing) => Ok(closing.month != current_month()),
            None => Ok(true),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ProductDraft, StoreConfig};

    async fn open() -> Store {
        Store::open(StoreConfig::in_memory("dev-close"))
            .await
            .unwrap()
            .0
    }

    #[tokio::test]
    async fn close_rolls_counters_into_opening_stock() {
        let store = open().await;
        let p = store
            .add_product(ProductDraft {
                product_code: "P-1".into(),
                product_name: "Rice".into(),
                opening_stock: 100.0,
                price: 5.0,
                ..ProductDraft::default()
            })
            .await
            .unwrap();
        store.record_purchase(&p.id, 50.0, 5.0, None).await.unwrap();
        store.record_sale(&p.id, 30.0, None).await.unwrap();

        let closing = store.close_month().await.unwrap();
        assert_eq!(closing.product_count, 1);

        // 100 + 50 - 30 = 120 carries over; period counters reset.
        let p = store.product(&p.id).await.unwrap();
        assert_eq!(p.opening_stock, 120.0);
        assert_eq!(p.purchases, 0.0);
        assert_eq!(p.issues, 0.0);
        assert_eq!(p.current_stock, 120.0);
    }

    #[tokio::test]
    async fn physical_count_wins_when_entered() {
        let store = open().await;
        let p = store
            .add_product(ProductDraft {
                product_code: "P-1".into(),
                product_name: "Rice".into(),
                opening_stock: 100.0,
                price: 5.0,
                ..ProductDraft::default()
            })
            .await
            .unwrap();
        store.add_adjustment(&p.id, 95.0, None).await.unwrap();

        store.close_month().await.unwrap();

        let p = store.product(&p.id).await.unwrap();
        assert_eq!(p.opening_stock, 95.0);
        assert_eq!(p.inventory_count, 0.0);
    }

    #[tokio::test]
    async fn alert_clears_after_close() {
        let store = open().await;
        assert!(store.should_close_alert().await.unwrap());

        store.close_month().await.unwrap();
        assert!(!store.should_close_alert().await.unwrap());

        let closing = store.last_month_closing().await.unwrap().unwrap();
        assert_eq!(closing.month, Utc::now().format("%Y-%m").to_string());
    }
}
