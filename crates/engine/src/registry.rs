//! Registry of in-flight jobs.
//!
//! The registry is constructed once with the owning context's
//! [`ContextHandle`] and shared by reference. It submits tasks, drives
//! them to exactly one outcome, delivers their images through the
//! foreground surface, and aggregates every tracked task's events on a
//! single [`EventBus`].
//!
//! Outcome mapping:
//!
//! | Result of `get_images`           | Event        | Lifecycle   |
//! |----------------------------------|--------------|-------------|
//! | images delivered                 | `succeeded`  | `Complete`  |
//! | `JobError::Cancelled`            | `cancelled`  | `Cancelled` |
//! | `JobError::Timeout`              | `timed_out`  | unchanged   |
//! | any other error                  | `failed`     | `Failed`    |
//!
//! A lifecycle that is already terminal keeps its state. `completed`
//! always follows the outcome, after which the task is untracked.

use std::sync::{Arc, Mutex, MutexGuard};

use artgen_client::api::check_finished;
use artgen_client::{
    AssetFetcher, DecodedImage, ImageSink, JobClient, JobError, PollDriver, PollOutcome,
    PollPolicy,
};
use artgen_core::{ContextHandle, EndpointConfig, JobRequest, LifecycleState};
use artgen_events::{EventBus, TaskEvent, TaskEventKind};
use tokio::sync::broadcast;

use crate::task::JobRequestTask;

/// Tunables for registry-driven tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    pub poll: PollPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            poll: PollPolicy::TRACKED,
        }
    }
}

pub struct TaskRegistry {
    client: JobClient,
    fetcher: AssetFetcher,
    context: ContextHandle,
    active: Mutex<Vec<Arc<JobRequestTask>>>,
    bus: EventBus,
    config: RegistryConfig,
}

impl TaskRegistry {
    pub fn new(client: JobClient, context: ContextHandle, config: RegistryConfig) -> Self {
        let fetcher = AssetFetcher::new(client.http().clone(), context.clone());
        Self {
            client,
            fetcher,
            context,
            active: Mutex::new(Vec::new()),
            bus: EventBus::default(),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Listen to the events of every tracked task.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.bus.subscribe()
    }

    // ---- tracking ----

    /// Register `task` and forward its events to the registry bus.
    ///
    /// Not idempotent: tracking a task twice delivers its events twice.
    pub fn track(&self, task: &Arc<JobRequestTask>) {
        task.events().track(&self.bus);
        self.lock_active().push(task.clone());
        tracing::debug!(task_id = %task.id(), task = %task.name(), "Task tracked");
    }

    /// Reverse one [`track`](Self::track). Returns whether the task was listed.
    pub fn untrack(&self, task: &JobRequestTask) -> bool {
        task.events().untrack(&self.bus);
        let mut active = self.lock_active();
        match active.iter().position(|t| t.id() == task.id()) {
            Some(index) => {
                active.remove(index);
                tracing::debug!(task_id = %task.id(), "Task untracked");
                true
            }
            None => false,
        }
    }

    pub fn active_tasks(&self) -> Vec<Arc<JobRequestTask>> {
        self.lock_active().clone()
    }

    // ---- cancellation ----

    /// Cooperatively cancel `task`. No request is sent to the backend.
    pub fn cancel(&self, task: &JobRequestTask) {
        tracing::info!(task_id = %task.id(), job_id = %task.job_id(), "Task cancellation requested");
        task.cancel();
    }

    /// Cancel every tracked task. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let tasks = self.active_tasks();
        for task in &tasks {
            self.cancel(task);
        }
        tasks.len()
    }

    // ---- lifecycle ----

    /// Wrap `request` in a new task using the registry poll policy.
    pub fn create_task(&self, request: JobRequest) -> Arc<JobRequestTask> {
        Arc::new(JobRequestTask::new(request, self.config.poll))
    }

    /// Track a new task for `request` and submit it.
    ///
    /// On failure the task concludes with `failed`, is untracked, and the
    /// error is returned.
    pub async fn submit(&self, request: JobRequest) -> Result<Arc<JobRequestTask>, JobError> {
        let task = self.create_task(request);
        self.submit_task(&task).await?;
        Ok(task)
    }

    /// Track `task` and submit its request.
    ///
    /// A job id assigned by the backend is recorded on the task even when
    /// the submission then fails. If this future is dropped before it
    /// returns, the task concludes as `cancelled` and is untracked.
    pub async fn submit_task(&self, task: &Arc<JobRequestTask>) -> Result<(), JobError> {
        if task.is_concluded() {
            return Err(JobError::Precondition(format!(
                "Task {} already concluded",
                task.id()
            )));
        }
        self.track(task);
        task.events().started();
        let mut guard = ConcludeOnDrop::new(self, task);

        let client = self.client.clone();
        let mut request = task.request();
        let submitted = self
            .context
            .background(async move {
                let outcome = client.submit(&mut request).await;
                Ok::<_, JobError>((request, outcome))
            })
            .await;
        guard.disarm();

        match submitted {
            Ok((request, Ok(result))) => {
                task.submitted(request, result);
                Ok(())
            }
            Ok((request, Err(e))) => {
                task.assigned(request);
                self.finish(task, Err(&e));
                Err(e)
            }
            Err(e) => {
                self.finish(task, Err(&e));
                Err(e)
            }
        }
    }

    /// Track a task for a job that was submitted earlier, e.g. one whose
    /// polling timed out, so [`get_images`](Self::get_images) can resume.
    pub fn resume(
        &self,
        config: Arc<EndpointConfig>,
        job_id: impl Into<String>,
    ) -> Result<Arc<JobRequestTask>, JobError> {
        let job_id = job_id.into();
        if job_id.trim().is_empty() {
            return Err(JobError::Precondition(
                "Cannot resume a job without an id".to_string(),
            ));
        }
        config.validate()?;

        let mut request = JobRequest::new(config, String::new());
        request.job_id = Some(job_id.clone());
        let task = self.create_task(request);
        task.settle(LifecycleState::Queued);

        self.track(&task);
        task.events().started();
        tracing::info!(task_id = %task.id(), job_id = %job_id, "Resuming job");
        Ok(task)
    }

    /// Poll `task` to a terminal status and deliver its images to `sink`.
    ///
    /// Emits exactly one outcome event followed by `completed`, then
    /// untracks the task. Cancellation observed before or right after
    /// the job finishes yields [`JobError::Cancelled`] and no images.
    /// Dropping the returned future early counts as cancellation.
    ///
    /// A task that already concluded is not driven again and fails with
    /// [`JobError::Precondition`]; use [`resume`](Self::resume) to keep
    /// waiting on a timed-out job.
    pub async fn get_images(
        &self,
        task: &Arc<JobRequestTask>,
        sink: Arc<dyn ImageSink>,
    ) -> Result<Vec<Arc<DecodedImage>>, JobError> {
        if task.is_concluded() {
            return Err(JobError::Precondition(format!(
                "Task {} already concluded",
                task.id()
            )));
        }

        let mut guard = ConcludeOnDrop::new(self, task);
        let outcome = self.drive(task, sink).await;
        guard.disarm();

        self.finish(task, outcome.as_ref().map(|_| ()));
        outcome
    }

    /// Submit `request` and deliver its images in one call.
    pub async fn run(
        &self,
        request: JobRequest,
        sink: Arc<dyn ImageSink>,
    ) -> Result<Vec<Arc<DecodedImage>>, JobError> {
        let task = self.submit(request).await?;
        self.get_images(&task, sink).await
    }

    async fn drive(
        &self,
        task: &Arc<JobRequestTask>,
        sink: Arc<dyn ImageSink>,
    ) -> Result<Vec<Arc<DecodedImage>>, JobError> {
        let config = task.config();
        let job_id = task.job_id();
        let driver = PollDriver::new(task.poll_policy(), task.cancel_token().clone());

        let outcome = loop {
            if let Some(outcome) = driver.wait(task.result().status).await {
                break outcome;
            }

            let client = self.client.clone();
            let config = config.clone();
            let id = job_id.clone();
            let response = self
                .context
                .background(async move { client.fetch_status(&config, &id).await })
                .await?;
            task.apply(response);
        };

        match outcome {
            PollOutcome::Finished => {
                if task.is_cancelled() {
                    return Err(JobError::Cancelled);
                }
                let result = task.result();
                check_finished(&result)?;
                tracing::info!(task_id = %task.id(), job_id = %job_id, "Job finished, fetching images");
                self.fetcher
                    .fetch_all(&result.image_urls(), task.cancel_token(), sink)
                    .await
            }
            PollOutcome::TimedOut { waited } => Err(JobError::Timeout { job_id, waited }),
            PollOutcome::Cancelled => Err(JobError::Cancelled),
        }
    }

    /// Conclude `task` with the event matching `outcome` and untrack it.
    fn finish(&self, task: &JobRequestTask, outcome: Result<(), &JobError>) {
        if task.is_concluded() {
            return;
        }

        let (kind, detail) = match outcome {
            Ok(()) => {
                task.settle(LifecycleState::Complete);
                (TaskEventKind::Succeeded, None)
            }
            Err(JobError::Cancelled) => {
                task.settle(LifecycleState::Cancelled);
                (TaskEventKind::Cancelled, None)
            }
            Err(e @ JobError::Timeout { .. }) => (TaskEventKind::TimedOut, Some(e.to_string())),
            Err(e) => {
                task.settle(LifecycleState::Failed);
                (TaskEventKind::Failed, Some(e.to_string()))
            }
        };

        match kind {
            TaskEventKind::Succeeded => {
                tracing::info!(task_id = %task.id(), job_id = %task.job_id(), "Task succeeded")
            }
            TaskEventKind::Cancelled => {
                tracing::info!(task_id = %task.id(), job_id = %task.job_id(), "Task cancelled")
            }
            _ => tracing::error!(
                task_id = %task.id(),
                job_id = %task.job_id(),
                outcome = %kind,
                error = detail.as_deref().unwrap_or_default(),
                "Task did not succeed",
            ),
        }

        if task.conclude(kind, detail) {
            self.untrack(task);
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Vec<Arc<JobRequestTask>>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Concludes a task as cancelled if the call driving it is dropped
/// before reaching [`TaskRegistry::finish`].
struct ConcludeOnDrop<'a> {
    registry: &'a TaskRegistry,
    task: &'a JobRequestTask,
    armed: bool,
}

impl<'a> ConcludeOnDrop<'a> {
    fn new(registry: &'a TaskRegistry, task: &'a JobRequestTask) -> Self {
        Self {
            registry,
            task,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ConcludeOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(task_id = %self.task.id(), "Task abandoned before completion");
            self.task.cancel();
            self.registry.finish(self.task, Err(&JobError::Cancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use artgen_client::RateLimiter;
    use artgen_core::executor::capture;

    use super::*;

    fn registry() -> TaskRegistry {
        let (ctx, _queue) = capture().unwrap();
        let client = JobClient::new(Arc::new(RateLimiter::default()));
        TaskRegistry::new(client, ctx, RegistryConfig::default())
    }

    fn request() -> JobRequest {
        let config = Arc::new(EndpointConfig::new("art", "http://h", "/job", "/status", "k"));
        JobRequest::new(config, "p")
    }

    #[tokio::test]
    async fn default_config_uses_tracked_policy() {
        let registry = registry();
        assert_eq!(registry.config().poll, PollPolicy::TRACKED);
        assert_eq!(registry.create_task(request()).poll_policy(), PollPolicy::TRACKED);
    }

    #[tokio::test]
    async fn track_and_untrack_update_active_list() {
        let registry = registry();
        let task = registry.create_task(request());

        registry.track(&task);
        assert_eq!(registry.active_tasks().len(), 1);
        assert_eq!(task.events().forward_count(), 1);

        assert!(registry.untrack(&task));
        assert!(registry.active_tasks().is_empty());
        assert_eq!(task.events().forward_count(), 0);
        assert!(!registry.untrack(&task));
    }

    #[tokio::test]
    async fn double_tracking_double_delivers() {
        let registry = registry();
        let mut rx = registry.subscribe();
        let task = registry.create_task(request());

        registry.track(&task);
        registry.track(&task);
        task.events().started();

        assert_eq!(rx.try_recv().unwrap().kind, TaskEventKind::Started);
        assert_eq!(rx.try_recv().unwrap().kind, TaskEventKind::Started);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn finish_untracks_after_completed() {
        let registry = registry();
        let mut rx = registry.subscribe();
        let task = registry.create_task(request());
        registry.track(&task);

        registry.finish(&task, Err(&JobError::Cancelled));
        registry.finish(&task, Ok(()));

        assert_eq!(rx.try_recv().unwrap().kind, TaskEventKind::Cancelled);
        assert_eq!(rx.try_recv().unwrap().kind, TaskEventKind::Completed);
        assert!(rx.try_recv().is_err());
        assert!(registry.active_tasks().is_empty());
    }

    #[tokio::test]
    async fn timeout_leaves_lifecycle_open() {
        let registry = registry();
        let task = registry.create_task(request());
        task.settle(LifecycleState::Processing);

        let timeout = JobError::Timeout {
            job_id: "j".into(),
            waited: std::time::Duration::from_secs(300),
        };
        registry.finish(&task, Err(&timeout));
        assert_eq!(task.state(), LifecycleState::Processing);
        assert!(task.is_concluded());
    }

    #[tokio::test]
    async fn cancel_all_reports_count() {
        let registry = registry();
        let a = registry.create_task(request());
        let b = registry.create_task(request());
        registry.track(&a);
        registry.track(&b);

        assert_eq!(registry.cancel_all(), 2);
        assert!(a.is_cancelled() && b.is_cancelled());
    }
}
