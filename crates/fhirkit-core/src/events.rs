//! Store change events (design note §9: "replace pub/sub with explicit
//! channels"). The source codebase wires `OnChanged` and
//! `OnSubscriptionSendEvent` handlers directly onto its store objects; that
//! invites re-entrancy when a handler itself writes back into the store
//! this event came from. Here a [`StoreEvent`] is just a value written onto
//! an unbounded `tokio::sync::broadcast` channel — the Resource Store
//! commits its state transition, releases its lock, and only then sends the
//! record. The Subscription Engine and any other observer (e.g. a UI
//! console) each hold their own receiver and drain it independently.

use crate::resource::StoredResource;
use tokio::sync::broadcast;

/// A single resource-store mutation, emitted after the write has committed
/// and the store's lock has been released (spec §4.3, §5).
#[derive(Debug, Clone)]
pub enum StoreEvent {
    InstanceCreated {
        current: StoredResource,
    },
    InstanceUpdated {
        previous: StoredResource,
        current: StoredResource,
    },
    InstanceDeleted {
        previous: StoredResource,
    },
}

impl StoreEvent {
    pub fn resource_type(&self) -> &str {
        match self {
            Self::InstanceCreated { current } => &current.resource_type,
            Self::InstanceUpdated { current, .. } => &current.resource_type,
            Self::InstanceDeleted { previous } => &previous.resource_type,
        }
    }
}

/// Fan-out point for [`StoreEvent`]s. One broadcaster per tenant; the
/// Resource Store for every resource type in that tenant shares it.
/// Broadcast is lossy under very slow subscribers (rather than unbounded
/// memory growth) — receivers that fall behind see [`broadcast::error::RecvError::Lagged`]
/// and should resynchronize from the store rather than assume delivery.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<StoreEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    /// Sends the event to every live subscriber. A send with no subscribers
    /// is not an error — the Subscription Engine may not have started yet
    /// during bootstrap replay.
    pub fn publish(&self, event: StoreEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn delivers_to_multiple_subscribers() {
        let broadcaster = EventBroadcaster::default();
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();

        let resource = StoredResource::new_initial("Patient", "p1", json!({}));
        broadcaster.publish(StoreEvent::InstanceCreated { current: resource });

        let got_a = a.recv().await.unwrap();
        let got_b = b.recv().await.unwrap();
        assert_eq!(got_a.resource_type(), "Patient");
        assert_eq!(got_b.resource_type(), "Patient");
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let broadcaster = EventBroadcaster::default();
        let resource = StoredResource::new_initial("Patient", "p1", json!({}));
        broadcaster.publish(StoreEvent::InstanceCreated { current: resource });
    }
}
