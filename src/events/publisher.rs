use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::ExecutionStatus;

/// Status-change event delivered to live subscribers.
///
/// Delivery is at-most-once, best-effort. The persisted execution record
/// remains the durable source of truth.
#[derive(Debug, Clone)]
pub struct StatusChangeEvent {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    /// Short result or error summary, when one exists.
    pub summary: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Broadcast publisher for execution status changes.
#[derive(Debug, Clone)]
pub struct StatusEventPublisher {
    sender: broadcast::Sender<StatusChangeEvent>,
}

impl StatusEventPublisher {
    /// Create a new publisher with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a status change. A send with no subscribers is not an error;
    /// events are published whether or not anyone is listening.
    pub fn publish(&self, execution_id: Uuid, status: ExecutionStatus, summary: Option<String>) {
        let event = StatusChangeEvent {
            execution_id,
            status,
            summary,
            occurred_at: Utc::now(),
        };
        let _ = self.sender.send(event);
    }

    /// Subscribe to the status feed.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChangeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for StatusEventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let publisher = StatusEventPublisher::default();
        let mut rx = publisher.subscribe();

        let id = Uuid::new_v4();
        publisher.publish(id, ExecutionStatus::Running, None);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.execution_id, id);
        assert_eq!(event.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let publisher = StatusEventPublisher::default();
        publisher.publish(Uuid::new_v4(), ExecutionStatus::Success, Some("done".into()));
    }
}
