//! Per-task event channels with fan-out to aggregate buses.

use std::sync::Mutex;

use artgen_core::types::TaskId;
use tokio::sync::broadcast;

use crate::bus::{EventBus, TaskEvent, TaskEventKind};

/// Buffer capacity of a single task's own channel.
const TASK_CAPACITY: usize = 64;

/// The event channels of one task.
///
/// Subscribers may listen to the task directly via [`subscribe`](Self::subscribe)
/// or through any [`EventBus`] the task is tracked by. Tracking is a
/// plain observer list: tracking the same bus twice delivers every
/// event twice.
pub struct TaskEvents {
    task_id: TaskId,
    task_name: String,
    local: EventBus,
    forwards: Mutex<Vec<EventBus>>,
}

impl TaskEvents {
    pub fn new(task_id: TaskId, task_name: impl Into<String>) -> Self {
        Self {
            task_id,
            task_name: task_name.into(),
            local: EventBus::new(TASK_CAPACITY),
            forwards: Mutex::new(Vec::new()),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// Listen to this task's events only.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.local.subscribe()
    }

    /// Start forwarding this task's events to `bus`.
    pub fn track(&self, bus: &EventBus) {
        self.lock_forwards().push(bus.clone());
    }

    /// Stop forwarding to `bus`. Removes one registration; returns
    /// whether one was found.
    pub fn untrack(&self, bus: &EventBus) -> bool {
        let mut forwards = self.lock_forwards();
        match forwards.iter().position(|b| b.same_bus(bus)) {
            Some(index) => {
                forwards.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of bus registrations currently held.
    pub fn forward_count(&self) -> usize {
        self.lock_forwards().len()
    }

    /// Publish `kind` to the local channel and every tracked bus.
    pub fn emit(&self, kind: TaskEventKind, detail: Option<String>) {
        let mut event = TaskEvent::new(self.task_id, self.task_name.clone(), kind);
        event.detail = detail;

        tracing::debug!(
            task_id = %self.task_id,
            task = %self.task_name,
            kind = %kind,
            "Task event",
        );

        let forwards = self.lock_forwards().clone();
        for bus in &forwards {
            bus.publish(event.clone());
        }
        self.local.publish(event);
    }

    pub fn started(&self) {
        self.emit(TaskEventKind::Started, None);
    }

    pub fn succeeded(&self) {
        self.emit(TaskEventKind::Succeeded, None);
    }

    pub fn failed(&self, message: impl Into<String>) {
        self.emit(TaskEventKind::Failed, Some(message.into()));
    }

    pub fn cancelled(&self) {
        self.emit(TaskEventKind::Cancelled, None);
    }

    pub fn timed_out(&self, message: impl Into<String>) {
        self.emit(TaskEventKind::TimedOut, Some(message.into()));
    }

    pub fn completed(&self) {
        self.emit(TaskEventKind::Completed, None);
    }

    fn lock_forwards(&self) -> std::sync::MutexGuard<'_, Vec<EventBus>> {
        self.forwards.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for TaskEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEvents")
            .field("task_id", &self.task_id)
            .field("task_name", &self.task_name)
            .field("forwards", &self.forward_count())
            .finish()
    }
}
