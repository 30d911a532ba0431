//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! Shared via `Arc<EventBus>`; the worker's loops publish task and
//! order events, and any number of subscribers (notification delivery,
//! admin streams) receive every one independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use inkstone_core::types::DbId;

/// A domain event: a task reached a terminal state, an order moved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Dot-separated event name, e.g. `"order.paid"`, `"task.completed"`.
    pub event_type: String,

    /// Order the event belongs to, when there is one.
    pub order_id: Option<DbId>,

    /// Task the event belongs to, when there is one.
    pub task_id: Option<DbId>,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    /// Create a new event with only the required `event_type`.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            order_id: None,
            task_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Attach the order the event concerns.
    pub fn with_order(mut self, order_id: DbId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    /// Attach the task the event concerns.
    pub fn with_task(mut self, task_id: DbId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Set the JSON payload for the event.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed messages are
    /// dropped and slow receivers observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// With zero subscribers the event is silently dropped; the order
    /// and task tables remain the source of truth either way.
    pub fn publish(&self, event: DomainEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(
            DomainEvent::new("order.paid")
                .with_order(42)
                .with_payload(serde_json::json!({"amount_fen": 19900})),
        );

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event_type, "order.paid");
        assert_eq!(received.order_id, Some(42));
        assert!(received.task_id.is_none());
        assert_eq!(received.payload["amount_fen"], 19900);
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(DomainEvent::new("task.completed").with_task(7));

        assert_eq!(rx1.recv().await.unwrap().task_id, Some(7));
        assert_eq!(rx2.recv().await.unwrap().task_id, Some(7));
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(DomainEvent::new("orphan.event"));
    }
}
