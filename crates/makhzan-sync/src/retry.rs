//! # Retry Queue Drain
//!
//! Replays pushes that failed while offline. Entries live in the durable
//! `retry_queue` table (written by the push worker), so nothing is lost to a
//! restart.
//!
//! ## Drain Triggers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  • Engine startup        (whatever accumulated while the app was shut)  │
//! │  • Reconnect             (RemoteEvent::Connected)                       │
//! │  • Every drain_interval  (default 60s, catches everything else)         │
//! │                                                                         │
//! │  A pass walks the queue oldest-first and stops at the first failure:    │
//! │  if entry 3 of 40 cannot be pushed the network is still down, and the   │
//! │  remaining 37 would only burn timeouts.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Delivery is at-least-once: an ack lost after the cloud applied a push
//! replays it on the next pass, and upserts carry full documents so the
//! replay is harmless.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use makhzan_core::{RetryEntry, RetryOp};
use makhzan_store::Store;

use crate::cloud::{CloudClient, RemoteEvent};
use crate::error::{SyncError, SyncResult};

/// Retry queue kind for settings pushes (not an entity collection).
pub(crate) const SETTINGS_KIND: &str = "settings";

/// Outcome counters of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Entries pushed and removed.
    pub pushed: usize,
    /// Entries that failed (pass stops at the first).
    pub failed: usize,
}

/// Replays one queue entry against the cloud.
async fn replay(
    cloud: &dyn CloudClient,
    push_timeout: Duration,
    entry: &RetryEntry,
) -> SyncResult<()> {
    let fut = async {
        if entry.kind == SETTINGS_KIND {
            let value: serde_json::Value = match &entry.payload {
                Some(text) => serde_json::from_str(text)?,
                None => {
                    return Err(SyncError::InvalidMessage(
                        "settings retry entry without payload".into(),
                    ))
                }
            };
            return cloud.set_setting(&entry.record_id, &value).await;
        }

        match entry.op {
            RetryOp::Delete => cloud.delete(&entry.kind, &entry.record_id).await,
            RetryOp::Upsert => {
                let document: serde_json::Value = match &entry.payload {
                    Some(text) => serde_json::from_str(text)?,
                    None => {
                        return Err(SyncError::InvalidMessage(
                            "upsert retry entry without payload".into(),
                        ))
                    }
                };
                cloud.push(&entry.kind, &entry.record_id, &document).await
            }
        }
    };

    match timeout(push_timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(push_timeout.as_secs())),
    }
}

/// Drains the retry queue, oldest first.
///
/// Poison entries (unparseable payloads) are dropped with a warning; they
/// can never succeed. A retryable failure ends the pass.
pub async fn drain(
    store: &Store,
    cloud: &dyn CloudClient,
    push_timeout: Duration,
    batch_size: u32,
) -> SyncResult<DrainStats> {
    let mut stats = DrainStats::default();
    let queue = store.db().retry_queue();

    let entries = queue.oldest(batch_size).await?;
    if entries.is_empty() {
        return Ok(stats);
    }
    info!(count = entries.len(), "Draining retry queue");

    for entry in entries {
        match replay(cloud, push_timeout, &entry).await {
            Ok(()) => {
                queue.remove(&entry.id).await?;
                stats.pushed += 1;
                debug!(kind = %entry.kind, id = %entry.record_id, "Replayed queued push");
            }
            Err(e) if e.is_retryable() => {
                queue.mark_failed(&entry.id, &e.to_string()).await?;
                stats.failed += 1;
                debug!(
                    kind = %entry.kind,
                    id = %entry.record_id,
                    error = %e,
                    "Still unreachable, ending drain pass"
                );
                break;
            }
            Err(e) => {
                warn!(
                    kind = %entry.kind,
                    id = %entry.record_id,
                    error = %e,
                    "Dropping poison retry entry"
                );
                queue.remove(&entry.id).await?;
            }
        }
    }

    Ok(stats)
}

// =============================================================================
// Retry Worker
// =============================================================================

/// Periodic + reconnect-triggered drains.
pub struct RetryWorker {
    store: Arc<Store>,
    cloud: Arc<dyn CloudClient>,
    push_timeout: Duration,
    drain_interval: Duration,
    batch_size: u32,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling the retry worker.
#[derive(Clone)]
pub struct RetryWorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl RetryWorkerHandle {
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelClosed("retry worker shutdown".into()))
    }
}

impl RetryWorker {
    pub fn new(
        store: Arc<Store>,
        cloud: Arc<dyn CloudClient>,
        push_timeout: Duration,
        drain_interval: Duration,
        batch_size: u32,
    ) -> (Self, RetryWorkerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let worker = RetryWorker {
            store,
            cloud,
            push_timeout,
            drain_interval,
            batch_size,
            shutdown_rx,
        };
        (worker, RetryWorkerHandle { shutdown_tx })
    }

    /// Runs until shutdown.
    pub async fn run(mut self) {
        info!(interval = ?self.drain_interval, "Retry worker starting");

        let mut events = self.cloud.events();
        let mut interval = tokio::time::interval(self.drain_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; that's the startup drain.

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.drain_once().await;
                }
                event = events.recv() => {
                    match event {
                        Ok(RemoteEvent::Connected) => {
                            info!("Reconnected, draining retry queue");
                            self.drain_once().await;
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "Retry worker lagged on cloud events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            info!("Cloud event stream closed, retry worker stopping");
                            break;
                        }
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Retry worker shutting down");
                    break;
                }
            }
        }
    }

    async fn drain_once(&self) {
        match drain(
            &self.store,
            self.cloud.as_ref(),
            self.push_timeout,
            self.batch_size,
        )
        .await
        {
            Ok(stats) if stats.pushed > 0 || stats.failed > 0 => {
                info!(pushed = stats.pushed, failed = stats.failed, "Drain pass finished");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Drain pass errored"),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCloud;
    use makhzan_core::EntityKind;
    use makhzan_store::StoreConfig;

    async fn store() -> Store {
        Store::open(StoreConfig::in_memory("dev-retry"))
            .await
            .unwrap()
            .0
    }

    #[tokio::test]
    async fn drain_replays_oldest_first_and_clears() {
        let store = store().await;
        let cloud = MemoryCloud::new();
        let queue = store.db().retry_queue();

        queue
            .enqueue(
                EntityKind::Products.collection(),
                "p1",
                RetryOp::Upsert,
                Some(r#"{"id":"p1"}"#),
            )
            .await
            .unwrap();
        queue
            .enqueue(
                EntityKind::Products.collection(),
                "p2",
                RetryOp::Delete,
                None,
            )
            .await
            .unwrap();
        cloud.seed("products", "p2", serde_json::json!({"id": "p2"}));

        let stats = drain(&store, &cloud, Duration::from_secs(5), 50)
            .await
            .unwrap();
        assert_eq!(stats, DrainStats { pushed: 2, failed: 0 });
        assert!(cloud.contains("products", "p1"));
        assert!(!cloud.contains("products", "p2"));
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn drain_stops_at_first_network_failure() {
        let store = store().await;
        let cloud = MemoryCloud::new();
        cloud.set_online(false);
        let queue = store.db().retry_queue();

        for id in ["a", "b", "c"] {
            queue
                .enqueue(
                    EntityKind::Products.collection(),
                    id,
                    RetryOp::Upsert,
                    Some(&format!(r#"{{"id":"{id}"}}"#)),
                )
                .await
                .unwrap();
        }

        let stats = drain(&store, &cloud, Duration::from_secs(5), 50)
            .await
            .unwrap();
        assert_eq!(stats, DrainStats { pushed: 0, failed: 1 });
        // Nothing was lost; all three remain queued.
        assert_eq!(queue.count().await.unwrap(), 3);

        let first = &queue.oldest(1).await.unwrap()[0];
        assert_eq!(first.attempts, 1);
        assert!(first.last_error.is_some());
    }

    #[tokio::test]
    async fn poison_entries_are_dropped() {
        let store = store().await;
        let cloud = MemoryCloud::new();
        let queue = store.db().retry_queue();

        queue
            .enqueue(
                EntityKind::Products.collection(),
                "bad",
                RetryOp::Upsert,
                Some("this is not json"),
            )
            .await
            .unwrap();

        let stats = drain(&store, &cloud, Duration::from_secs(5), 50)
            .await
            .unwrap();
        assert_eq!(stats, DrainStats::default());
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn settings_entries_replay_as_setting_writes() {
        let store = store().await;
        let cloud = MemoryCloud::new();
        store
            .db()
            .retry_queue()
            .enqueue(SETTINGS_KIND, "seq_issue", RetryOp::Upsert, Some("16"))
            .await
            .unwrap();

        drain(&store, &cloud, Duration::from_secs(5), 50)
            .await
            .unwrap();

        let (value, _) = cloud.get_setting("seq_issue").await.unwrap().unwrap();
        assert_eq!(value, serde_json::json!(16));
    }
}
