//! Event bus (C7, §4.7): fans out cluster-state patches and discrete
//! events to listener subscribers over bounded queues. A subscriber that
//! falls behind is disconnected rather than allowed to apply backpressure
//! to the rest of the cluster, and told to re-sync with a fresh snapshot.

use agent_core::wire::EventRecord;
use tokio::sync::broadcast;

/// Default bound on a subscriber's lagging queue before it is dropped
/// (§4.7).
pub const DEFAULT_QUEUE_CAPACITY: usize = 512;

/// A message pushed to every subscriber: either a single event record, or
/// a signal that the subscriber fell behind and must request a full
/// re-sync before trusting further deltas.
#[derive(Debug, Clone)]
pub enum EventBusMessage {
    Record(EventRecord),
    ResyncRequired,
}

/// Fan-out hub. Cloning `EventBus` cheaply shares the same broadcast
/// channel; each subscriber gets its own bounded receiver.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventRecord>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publishes an event to all current subscribers. Silently succeeds
    /// with zero effect if nobody is subscribed.
    pub fn publish(&self, record: EventRecord) {
        let _ = self.sender.send(record);
    }

    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription { receiver: self.sender.subscribe() }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// One subscriber's view of the bus. `recv` surfaces `ResyncRequired` when
/// the underlying broadcast channel reports the receiver lagged and
/// dropped messages.
pub struct EventSubscription {
    receiver: broadcast::Receiver<EventRecord>,
}

impl EventSubscription {
    pub async fn recv(&mut self) -> EventBusMessage {
        match self.receiver.recv().await {
            Ok(record) => EventBusMessage::Record(record),
            Err(broadcast::error::RecvError::Lagged(_)) => EventBusMessage::ResyncRequired,
            Err(broadcast::error::RecvError::Closed) => EventBusMessage::ResyncRequired,
        }
    }
}

#[cfg(test)]
mod tests {
    use agent_core::wire::EventKind;
    use serde_json::json;

    use super::*;

    fn record(n: u32) -> EventRecord {
        EventRecord { nodename: "n1".into(), kind: EventKind::Event, ts: f64::from(n), data: json!({"seq": n}) }
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new(8);
        let mut sub = bus.subscribe();
        bus.publish(record(1));
        match sub.recv().await {
            EventBusMessage::Record(r) => assert_eq!(r.ts, 1.0),
            EventBusMessage::ResyncRequired => panic!("expected record"),
        }
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_to_resync() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        for n in 0..10 {
            bus.publish(record(n));
        }
        let mut saw_resync = false;
        for _ in 0..10 {
            if matches!(sub.recv().await, EventBusMessage::ResyncRequired) {
                saw_resync = true;
                break;
            }
        }
        assert!(saw_resync);
    }

    #[tokio::test]
    async fn subscriber_count_tracks_active_subscriptions() {
        let bus = EventBus::new(8);
        assert_eq!(bus.subscriber_count(), 0);
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
