//! # Event Bus
//!
//! Broadcast notifications for everything that changes local state.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every committed mutation emits:                                        │
//! │                                                                         │
//! │    StoreEvent::Entity(kind)   ← the kind that changed                  │
//! │    StoreEvent::Change         ← generic "something changed"            │
//! │                                                                         │
//! │  A remote batch (subscription delivery, bulk pull) emits ONE pair per  │
//! │  kind per batch, not one per record — a 500-document catch-up is one   │
//! │  repaint, not five hundred.                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Built on `tokio::sync::broadcast`: subscribers that fall behind see a
//! `Lagged` error and simply refresh from the cache, which is always current.

use tokio::sync::broadcast;

use makhzan_core::EntityKind;

/// Buffered events per subscriber before lag kicks in.
const EVENT_CAPACITY: usize = 256;

// =============================================================================
// StoreEvent
// =============================================================================

/// A change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    /// Records of this kind changed.
    Entity(EntityKind),
    /// Something changed (always follows an `Entity` event; also emitted
    /// alone for store-wide actions like a wipe).
    Change,
}

// =============================================================================
// EventBus
// =============================================================================

/// Cheap-to-clone broadcast bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        EventBus { sender }
    }

    /// Subscribes to all store events.
    ///
    /// The returned receiver only sees events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    /// Emits the entity event plus the generic change event.
    pub fn emit(&self, kind: EntityKind) {
        // send() only errors when there are no subscribers; that's fine.
        let _ = self.sender.send(StoreEvent::Entity(kind));
        let _ = self.sender.send(StoreEvent::Change);
    }

    /// Emits only the generic change event (store-wide actions).
    pub fn emit_change(&self) {
        let _ = self.sender.send(StoreEvent::Change);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_delivers_entity_then_change() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(EntityKind::Products);

        assert_eq!(rx.recv().await.unwrap(), StoreEvent::Entity(EntityKind::Products));
        assert_eq!(rx.recv().await.unwrap(), StoreEvent::Change);
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.emit(EntityKind::Issues); // must not panic
        bus.emit_change();
    }

    #[tokio::test]
    async fn subscribers_are_independent() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit_change();

        assert_eq!(a.recv().await.unwrap(), StoreEvent::Change);
        assert_eq!(b.recv().await.unwrap(), StoreEvent::Change);
    }
}
