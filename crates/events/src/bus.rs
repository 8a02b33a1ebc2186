//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the aggregate publish/subscribe hub for [`TaskEvent`]s.
//! It is cheap to clone; clones publish into the same channel.

use std::fmt;

use artgen_core::types::{TaskId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// TaskEvent
// ---------------------------------------------------------------------------

/// Lifecycle milestone of a task.
///
/// Every task emits exactly one outcome (`Succeeded`, `Failed`,
/// `Cancelled` or `TimedOut`) followed by exactly one `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    Started,
    Completed,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl TaskEventKind {
    /// Whether this kind is one of the four mutually exclusive outcomes.
    pub fn is_outcome(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for TaskEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event of one task.
///
/// Constructed via [`TaskEvent::new`] and optionally enriched with
/// [`with_detail`](TaskEvent::with_detail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,

    /// Human-readable task name, usually the endpoint name.
    pub task_name: String,

    pub kind: TaskEventKind,

    /// Error text for `failed` and `timed_out`.
    pub detail: Option<String>,

    /// When the event was created (UTC).
    pub timestamp: Timestamp,
}

impl TaskEvent {
    pub fn new(task_id: TaskId, task_name: impl Into<String>, kind: TaskEventKind) -> Self {
        Self {
            task_id,
            task_name: task_name.into(),
            kind,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`TaskEvent`].
///
/// # Usage
///
/// ```rust
/// use artgen_events::bus::{EventBus, TaskEvent, TaskEventKind};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(TaskEvent::new(artgen_core::types::TaskId::nil(), "art", TaskEventKind::Started));
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: TaskEvent) {
        // Ignore the SendError -- it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    /// Whether `other` publishes into the same channel as `self`.
    pub fn same_bus(&self, other: &EventBus) -> bool {
        self.sender.same_channel(&other.sender)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use artgen_core::types::TaskId;

    use super::*;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let id = TaskId::new_v4();

        bus.publish(TaskEvent::new(id, "art", TaskEventKind::Failed).with_detail("boom"));

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.task_id, id);
        assert_eq!(received.task_name, "art");
        assert_eq!(received.kind, TaskEventKind::Failed);
        assert_eq!(received.detail.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(TaskEvent::new(TaskId::nil(), "art", TaskEventKind::Started));

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");
        assert_eq!(e1.kind, TaskEventKind::Started);
        assert_eq!(e2.kind, TaskEventKind::Started);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(TaskEvent::new(TaskId::nil(), "art", TaskEventKind::Completed));
    }

    #[test]
    fn clones_share_the_channel() {
        let bus = EventBus::default();
        let clone = bus.clone();
        assert!(bus.same_bus(&clone));
        assert!(!bus.same_bus(&EventBus::default()));
    }

    #[test]
    fn only_four_kinds_are_outcomes() {
        assert!(!TaskEventKind::Started.is_outcome());
        assert!(!TaskEventKind::Completed.is_outcome());
        assert!(TaskEventKind::TimedOut.is_outcome());
        assert!(TaskEventKind::Cancelled.is_outcome());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&TaskEventKind::TimedOut).unwrap();
        assert_eq!(json, r#""timed_out""#);
    }
}
