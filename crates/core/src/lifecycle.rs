//! Local lifecycle of a single job instance.
//!
//! ```text
//! Idle -> Queued -> Processing -> Complete | Failed
//!           \            \
//!            +------------+--> Cancelled
//! ```
//!
//! Progress only moves forward; `Complete`, `Failed` and `Cancelled`
//! are absorbing.

use std::fmt;

use crate::error::CoreError;
use crate::status::JobStatus;
use crate::types::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Built but not yet submitted.
    Idle,
    Queued,
    Processing,
    Complete,
    Failed,
    /// Stopped locally by cooperative cancellation.
    Cancelled,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Queued => 1,
            Self::Processing => 2,
            Self::Complete | Self::Failed | Self::Cancelled => 3,
        }
    }

    /// Whether `self -> to` is a legal forward move.
    pub fn can_advance_to(self, to: LifecycleState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            Self::Idle => false,
            Self::Cancelled => matches!(self, Self::Queued | Self::Processing),
            _ => to.rank() > self.rank(),
        }
    }
}

impl From<JobStatus> for LifecycleState {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Queued => Self::Queued,
            JobStatus::Processing => Self::Processing,
            JobStatus::Complete => Self::Complete,
            JobStatus::Failed => Self::Failed,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// State holder enforcing the forward-only transition rules.
#[derive(Debug, Clone)]
pub struct JobLifecycle {
    state: LifecycleState,
    changed_at: Timestamp,
}

impl Default for JobLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl JobLifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Idle,
            changed_at: chrono::Utc::now(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn changed_at(&self) -> Timestamp {
        self.changed_at
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to `to`.
    ///
    /// Returns `Ok(false)` when already in the (non-terminal) target state.
    pub fn advance(&mut self, to: LifecycleState) -> Result<bool, CoreError> {
        if self.state == to && !to.is_terminal() {
            return Ok(false);
        }
        if !self.state.can_advance_to(to) {
            return Err(CoreError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.changed_at = chrono::Utc::now();
        Ok(true)
    }

    /// Follow a server status report.
    pub fn observe(&mut self, status: JobStatus) -> Result<bool, CoreError> {
        self.advance(status.into())
    }
}
