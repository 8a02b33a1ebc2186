//! Task lifecycle events.
//!
//! Every task owns a [`TaskEvents`] channel set. A registry-wide
//! [`EventBus`] aggregates them: tracking a task forwards its events to
//! the bus, untracking stops the forwarding.

pub mod bus;
pub mod task_events;

pub use bus::{EventBus, TaskEvent, TaskEventKind};
pub use task_events::TaskEvents;
