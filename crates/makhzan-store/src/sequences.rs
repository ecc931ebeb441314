//! # Document Number Allocation
//!
//! The stateful side of sequence numbers: persisted counters, the cloud
//! mirror, the duplicate scan and recovery. The math (formatting, parsing,
//! merging) lives in `makhzan_core::sequence`.
//!
//! ## Allocation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  next_document_number(Issue)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  local counter (settings "seq_issue")        = 12                       │
//! │  cloud mirror  (settings "seq_issue_cloud")  = 15                       │
//! │       │                                                                 │
//! │       ▼ merge = max(12, 15) = 15, candidate = 16                        │
//! │                                                                         │
//! │  scan existing invoice numbers; bump past any collision                 │
//! │       │                                                                 │
//! │       ▼ persist 16 locally, push "seq_issue" = 16 to the cloud          │
//! │                                                                         │
//! │  "SW0016"                                                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Counters only move forward: the cloud mirror is written with `max`, never
//! overwritten blindly, so a stale cloud value can never roll a device back.

use tracing::{info, warn};

use makhzan_core::{sequence, EntityKind, SequenceKind};

use crate::error::StoreResult;
use crate::store::Store;

fn cloud_mirror_key(kind: SequenceKind) -> String {
    format!("{}_cloud", kind.counter_key())
}

impl Store {
    async fn read_counter(&self, key: &str) -> StoreResult<u32> {
        let value = self.db().settings().get(key).await?;
        Ok(value
            .and_then(|v| v.as_u64())
            .map(|n| n.min(u64::from(u32::MAX)) as u32)
            .unwrap_or(0))
    }

    /// Every document number currently in use for one sequence family.
    async fn existing_numbers(&self, kind: SequenceKind) -> Vec<String> {
        match kind {
            SequenceKind::Issue => self
                .issues()
                .await
                .into_iter()
                .map(|i| i.invoice_number)
                .collect(),
            SequenceKind::Return => self
                .returns()
                .await
                .into_iter()
                .map(|r| r.return_number)
                .collect(),
            SequenceKind::BranchOps => self
                .documents(EntityKind::BranchInvoices)
                .await
                .into_iter()
                .filter_map(|d| {
                    d.get("invoiceNumber")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                })
                .collect(),
        }
    }

    /// Allocates the next document number for a family.
    ///
    /// Merges the local counter with the cloud mirror, advances, and bumps
    /// past any number already carried by an existing document (two devices
    /// allocating offline collide exactly here). The allocated counter is
    /// persisted locally and pushed to the cloud settings document.
    pub async fn next_document_number(&self, kind: SequenceKind) -> StoreResult<String> {
        let local = self.read_counter(kind.counter_key()).await?;
        let cloud = self.read_counter(&cloud_mirror_key(kind)).await?;
        let merged = sequence::merge_counters(local, cloud);
        let mut candidate = sequence::next_candidate(merged);

        let existing = self.existing_numbers(kind).await;
        while existing.contains(&sequence::format_number(kind, candidate))
            && !sequence::is_exhausted(candidate)
        {
            candidate += 1;
        }

        if sequence::is_exhausted(candidate) {
            warn!(
                prefix = kind.prefix(),
                "Sequence exhausted at 9999; numbers will repeat until renumbered"
            );
        }

        let value = serde_json::json!(candidate);
        self.db().settings().set(kind.counter_key(), &value).await?;
        self.send_setting(kind.counter_key(), value);

        Ok(sequence::format_number(kind, candidate))
    }

    /// Rebuilds a counter from the documents that exist.
    ///
    /// Takes the max of the recovered tail and the persisted counter, so
    /// recovery can only move the counter forward.
    pub async fn recover_sequence(&self, kind: SequenceKind) -> StoreResult<u32> {
        let numbers = self.existing_numbers(kind).await;
        let recovered = sequence::recover_counter(kind, numbers.iter().map(String::as_str));
        let local = self.read_counter(kind.counter_key()).await?;
        let counter = sequence::merge_counters(local, recovered);

        let value = serde_json::json!(counter);
        self.db().settings().set(kind.counter_key(), &value).await?;
        self.send_setting(kind.counter_key(), value);

        info!(
            prefix = kind.prefix(),
            recovered = recovered,
            counter = counter,
            "Sequence counter recovered from documents"
        );
        Ok(counter)
    }

    /// Records the cloud's counter value (from the settings pull).
    ///
    /// The mirror only moves forward; a stale cloud document cannot roll
    /// allocation back.
    pub async fn note_cloud_counter(&self, kind: SequenceKind, value: u32) -> StoreResult<()> {
        let key = cloud_mirror_key(kind);
        let current = self.read_counter(&key).await?;
        let merged = sequence::merge_counters(current, value);
        self.db()
            .settings()
            .set(&key, &serde_json::json!(merged))
            .await?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{IssueDraft, IssueLineDraft, ProductDraft, StoreConfig};

    async fn open() -> Store {
        Store::open(StoreConfig::in_memory("dev-seq")).await.unwrap().0
    }

    #[tokio::test]
    async fn diverged_counters_merge_to_max_plus_one() {
        let store = open().await;
        let settings = store.db().settings();
        settings.set("seq_issue", &serde_json::json!(12)).await.unwrap();
        settings
            .set("seq_issue_cloud", &serde_json::json!(15))
            .await
            .unwrap();

        let number = store.next_document_number(SequenceKind::Issue).await.unwrap();
        assert_eq!(number, "SW0016");
        assert_eq!(
            settings.get("seq_issue").await.unwrap(),
            Some(serde_json::json!(16))
        );
    }

    #[tokio::test]
    async fn allocation_skips_existing_numbers() {
        let store = open().await;
        let p = store
            .add_product(ProductDraft {
                product_code: "P-1".into(),
                product_name: "Rice".into(),
                opening_stock: 10.0,
                price: 5.0,
                ..ProductDraft::default()
            })
            .await
            .unwrap();

        // First allocation: SW0001.
        let issue = store
            .create_issue(IssueDraft {
                branch_id: "b1".into(),
                branch_name: "Branch".into(),
                lines: vec![IssueLineDraft {
                    product_id: p.id.clone(),
                    quantity: 1.0,
                }],
                notes: None,
            })
            .await
            .unwrap();
        assert_eq!(issue.invoice_number, "SW0001");

        // A stale counter would hand out SW0001 again; the scan bumps past it.
        store
            .db()
            .settings()
            .set("seq_issue", &serde_json::json!(0))
            .await
            .unwrap();
        let number = store.next_document_number(SequenceKind::Issue).await.unwrap();
        assert_eq!(number, "SW0002");
    }

    #[tokio::test]
    async fn recovery_rebuilds_from_document_tails() {
        let store = open().await;
        for n in ["SW0005", "SW0009", "SW0015"] {
            let doc = serde_json::json!({
                "id": format!("i-{n}"),
                "invoiceNumber": n,
                "branchId": "b1", "branchName": "Branch",
                "products": [], "totalValue": 0.0, "status": "pending",
                "createdAt": "2026-01-01T00:00:00Z",
                "updatedAt": "2026-01-01T00:00:00Z",
            });
            store
                .apply_remote_batch(
                    EntityKind::Issues,
                    vec![(format!("i-{n}"), doc)],
                    vec![],
                )
                .await
                .unwrap();
        }

        let counter = store.recover_sequence(SequenceKind::Issue).await.unwrap();
        assert_eq!(counter, 15);

        let number = store.next_document_number(SequenceKind::Issue).await.unwrap();
        assert_eq!(number, "SW0016");
    }

    #[tokio::test]
    async fn cloud_mirror_only_moves_forward() {
        let store = open().await;
        store
            .note_cloud_counter(SequenceKind::Return, 20)
            .await
            .unwrap();
        store
            .note_cloud_counter(SequenceKind::Return, 7)
            .await
            .unwrap();

        let number = store.next_document_number(SequenceKind::Return).await.unwrap();
        assert_eq!(number, "R0021");
    }
}
