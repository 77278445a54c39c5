//! Event system for state change notifications
//!
//! This module provides a global event bus for broadcasting control-plane
//! state changes to observers (the CLI status loop, future UIs).

use serde::Serialize;
use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Control-plane state change events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SystemEvent {
    /// Gadget was configured or torn down
    GadgetStateChanged { configured: bool },
    /// A catalog item was mounted into a LUN slot
    ItemMounted { item_id: String, lun_id: u32 },
    /// A catalog item was ejected from its LUN slot
    ItemEjected { item_id: String },
    /// Charging suspend flag changed
    ChargingStateChanged { suspended: bool },
    /// Catalog contents changed (append/replace/remove)
    CatalogChanged,
}

/// Global event bus for broadcasting system events
///
/// Uses tokio's broadcast channel to distribute events to multiple
/// subscribers. Publishing with no active subscribers silently drops the
/// event - events are fire-and-forget notifications.
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: SystemEvent) {
        // If no subscribers, send returns Err which is normal
        let _ = self.tx.send(event);
    }

    /// Subscribe to events
    ///
    /// The receiver uses a ring buffer; a subscriber that falls too far
    /// behind receives a `Lagged` error and misses events.
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(SystemEvent::GadgetStateChanged { configured: true });

        match rx.recv().await.unwrap() {
            SystemEvent::GadgetStateChanged { configured } => assert!(configured),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        // Must not panic or error
        bus.publish(SystemEvent::CatalogChanged);
    }
}
