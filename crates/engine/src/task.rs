//! The unit of tracking and cancellation: one request and its result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use artgen_client::PollPolicy;
use artgen_core::types::TaskId;
use artgen_core::{EndpointConfig, JobLifecycle, JobRequest, JobResult, LifecycleState, StatusResponse};
use artgen_events::{TaskEventKind, TaskEvents};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// One job request bound to its observable result.
///
/// The result lives in a `watch` cell and is updated in place, so every
/// [`watch_result`](Self::watch_result) receiver sees each poll as it
/// lands.
pub struct JobRequestTask {
    id: TaskId,
    request: Mutex<JobRequest>,
    result: watch::Sender<JobResult>,
    lifecycle: Mutex<JobLifecycle>,
    cancel: CancellationToken,
    poll: PollPolicy,
    events: TaskEvents,
    /// Set once the outcome and `completed` events have been emitted.
    concluded: AtomicBool,
}

impl JobRequestTask {
    pub fn new(request: JobRequest, poll: PollPolicy) -> Self {
        let id = TaskId::new_v4();
        let events = TaskEvents::new(id, request.config().name.clone());
        let result = match &request.job_id {
            Some(job_id) => JobResult::for_job(job_id.clone()),
            None => JobResult::default(),
        };
        let (result, _) = watch::channel(result);

        Self {
            id,
            request: Mutex::new(request),
            result,
            lifecycle: Mutex::new(JobLifecycle::new()),
            cancel: CancellationToken::new(),
            poll,
            events,
            concluded: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.events.task_name()
    }

    pub fn request(&self) -> JobRequest {
        lock(&self.request).clone()
    }

    pub fn config(&self) -> Arc<EndpointConfig> {
        lock(&self.request).config().clone()
    }

    /// Server-assigned job id, empty until submission succeeds.
    pub fn job_id(&self) -> String {
        self.result.borrow().job_id.clone()
    }

    /// Snapshot of the current result.
    pub fn result(&self) -> JobResult {
        self.result.borrow().clone()
    }

    pub fn watch_result(&self) -> watch::Receiver<JobResult> {
        self.result.subscribe()
    }

    pub fn state(&self) -> LifecycleState {
        lock(&self.lifecycle).state()
    }

    pub fn events(&self) -> &TaskEvents {
        &self.events
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.poll
    }

    /// Request cooperative cancellation. Takes effect at the next poll or
    /// fetch boundary; a request already in flight completes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_concluded(&self) -> bool {
        self.concluded.load(Ordering::Acquire)
    }

    /// Record the outcome of a successful submission.
    pub(crate) fn submitted(&self, request: JobRequest, result: JobResult) {
        *lock(&self.request) = request;
        self.observe(result.status);
        self.result.send_modify(|current| *current = result);
    }

    /// Record the request after a failed submission. A job id the backend
    /// assigned before reporting the failure is kept on the result.
    pub(crate) fn assigned(&self, request: JobRequest) {
        if let Some(job_id) = request.job_id.clone() {
            self.result.send_modify(|current| current.job_id = job_id);
        }
        *lock(&self.request) = request;
    }

    /// Merge a status poll into the result in place.
    ///
    /// A status that would move the lifecycle backwards is logged and
    /// left out of the merge; the rest of the response still applies.
    pub(crate) fn apply(&self, mut response: StatusResponse) {
        if let Some(status) = response.status {
            if !self.observe(status) {
                response.status = None;
            }
        }
        self.result.send_modify(|current| current.merge(response));
    }

    /// Move the lifecycle to `to` unless it already reached a terminal state.
    pub(crate) fn settle(&self, to: LifecycleState) {
        let mut lifecycle = lock(&self.lifecycle);
        if !lifecycle.is_terminal() {
            if let Err(e) = lifecycle.advance(to) {
                tracing::warn!(task_id = %self.id, error = %e, "Lifecycle not settled");
            }
        }
    }

    /// Emit `outcome` followed by `completed`, exactly once per task.
    ///
    /// Returns `false` if the task had already concluded.
    pub(crate) fn conclude(&self, outcome: TaskEventKind, detail: Option<String>) -> bool {
        debug_assert!(outcome.is_outcome());
        if self.concluded.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.events.emit(outcome, detail);
        self.events.completed();
        true
    }

    fn observe(&self, status: artgen_core::JobStatus) -> bool {
        match lock(&self.lifecycle).observe(status) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    task_id = %self.id,
                    status = %status,
                    error = %e,
                    "Ignoring out-of-order status",
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for JobRequestTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRequestTask")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("job_id", &self.job_id())
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
