//! Event types and broadcast bus
//!
//! Services publish [`AccessMapEvent`]s on an [`EventBus`]; HTTP layers
//! forward them to clients as Server-Sent Events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted by the observation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AccessMapEvent {
    /// An entrance's accessibility record was recomputed and swapped in
    RecordUpdated {
        entrance_id: i64,
        observation_count: usize,
        attribute_count: usize,
        computed_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// A submission was rejected before reaching the observation store
    SubmissionFailed {
        error_kind: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// An observation was moved to another entrance by an administrator
    ObservationReassigned {
        observation_id: i64,
        from_entrance_id: i64,
        to_entrance_id: i64,
        timestamp: DateTime<Utc>,
    },
}

impl AccessMapEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            AccessMapEvent::RecordUpdated { .. } => "RecordUpdated",
            AccessMapEvent::SubmissionFailed { .. } => "SubmissionFailed",
            AccessMapEvent::ObservationReassigned { .. } => "ObservationReassigned",
        }
    }
}

/// Broadcast bus for pipeline events
///
/// Cloning the bus is cheap; every clone publishes to the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AccessMapEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus that buffers `capacity` events per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<AccessMapEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` carrying the event when nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: AccessMapEvent,
    ) -> Result<usize, broadcast::error::SendError<AccessMapEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: AccessMapEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No subscribers for event");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_event() -> AccessMapEvent {
        AccessMapEvent::SubmissionFailed {
            error_kind: "timeout".to_string(),
            message: "inference deadline exceeded".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_emit_without_subscribers_returns_err() {
        let bus = EventBus::new(8);
        assert!(bus.emit(failed_event()).is_err());
        // Lossy emit never panics
        bus.emit_lossy(failed_event());
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let event = failed_event();
        bus.emit(event.clone()).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
        assert_eq!(received.event_type(), "SubmissionFailed");
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = AccessMapEvent::ObservationReassigned {
            observation_id: 7,
            from_entrance_id: 1,
            to_entrance_id: 2,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ObservationReassigned");
        assert_eq!(json["observation_id"], 7);
    }
}
