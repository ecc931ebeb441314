//! # Deletion Guard
//!
//! Shared set of record ids that are mid-deletion. Closes the resurrection
//! race between a local delete and the cloud subscription echoing the old
//! document back.
//!
//! ## The Race
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  t0  user deletes product P               mark(P)                       │
//! │  t1  local delete committed                                             │
//! │  t2  cloud delete push in flight...                                     │
//! │  t3  subscription delivers a batch that   is_deleting(P) → skip         │
//! │      still contains P (pre-delete state)                                │
//! │  t4  cloud delete lands                                                 │
//! │  t5  grace window elapses                 unmark(P)                     │
//! │                                                                         │
//! │  Without the guard, t3 would resurrect P locally and the next push      │
//! │  would resurrect it in the cloud too.                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The unmark is delayed past the push settling (success or failure) so a
//! subscription snapshot taken just before the delete cannot slip in.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

/// Cheap-to-clone guard; all clones share one id set.
#[derive(Debug, Clone, Default)]
pub struct DeletionGuard {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl DeletionGuard {
    pub fn new() -> Self {
        DeletionGuard::default()
    }

    /// Marks an id as mid-deletion. Call BEFORE the local delete commits.
    pub fn mark(&self, id: &str) {
        let mut set = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        set.insert(id.to_string());
        debug!(id = %id, "Deletion guard marked");
    }

    /// Removes the mark immediately.
    pub fn unmark(&self, id: &str) {
        let mut set = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(id);
        debug!(id = %id, "Deletion guard unmarked");
    }

    /// True while the id is guarded; inbound applies for it must be skipped.
    pub fn is_deleting(&self, id: &str) -> bool {
        let set = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        set.contains(id)
    }

    /// Schedules an unmark after `delay`.
    ///
    /// Used once the delete push has settled: a shorter grace after success,
    /// a longer one after failure (the retry queue still owns the delete).
    pub fn unmark_after(&self, id: &str, delay: Duration) {
        let guard = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            guard.unmark(&id);
        });
    }

    /// Number of currently guarded ids.
    pub fn len(&self) -> usize {
        let set = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the guarded ids (prune protection in bulk pulls).
    pub fn snapshot(&self) -> HashSet<String> {
        let set = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        set.clone()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_unmark_cycle() {
        let guard = DeletionGuard::new();
        assert!(!guard.is_deleting("p1"));

        guard.mark("p1");
        assert!(guard.is_deleting("p1"));
        assert!(!guard.is_deleting("p2"));

        guard.unmark("p1");
        assert!(!guard.is_deleting("p1"));
        assert!(guard.is_empty());
    }

    #[test]
    fn clones_share_state() {
        let guard = DeletionGuard::new();
        let clone = guard.clone();

        guard.mark("x");
        assert!(clone.is_deleting("x"));
        clone.unmark("x");
        assert!(!guard.is_deleting("x"));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_unmark_fires_after_grace() {
        let guard = DeletionGuard::new();
        guard.mark("p1");
        guard.unmark_after("p1", Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(guard.is_deleting("p1"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!guard.is_deleting("p1"));
    }
}
