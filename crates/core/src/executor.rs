//! Dual-context execution: background workers and the owning thread.
//!
//! [`capture`] must be called on the thread that owns caller-visible
//! state, from inside a Tokio runtime. It returns two halves:
//!
//! - [`ContextHandle`] is `Clone + Send` and travels into workers. It
//!   spawns background work on the captured runtime and queues
//!   foreground actions for the owning thread.
//! - [`ForegroundQueue`] is `!Send` and stays on the owning thread,
//!   which drains it with [`ForegroundQueue::pump`] or
//!   [`ForegroundQueue::run_until`].
//!
//! Foreground actions run one at a time in queue order, so two of them
//! never execute concurrently.

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::thread::{self, ThreadId};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

type ForegroundJob = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The owning thread is not inside a Tokio runtime.
    #[error("No Tokio runtime on the owning thread")]
    NoRuntime,

    /// The foreground queue was dropped before the action ran.
    #[error("Owning context is gone")]
    OwnerGone,

    #[error("Background work panicked: {0}")]
    BackgroundPanicked(String),

    #[error("Background work was cancelled by the runtime")]
    BackgroundCancelled,

    #[error("Foreground action panicked: {0}")]
    ForegroundPanicked(String),
}

/// Capture the current thread as the owning context.
///
/// Fails with [`ExecutorError::NoRuntime`] when called outside a Tokio
/// runtime. This is a fatal configuration error and is not retried.
pub fn capture() -> Result<(ContextHandle, ForegroundQueue), ExecutorError> {
    let runtime = Handle::try_current().map_err(|_| ExecutorError::NoRuntime)?;
    let owner = thread::current().id();
    let (tx, rx) = mpsc::unbounded_channel();

    let handle = ContextHandle {
        runtime,
        queue: tx,
        owner,
    };
    let queue = ForegroundQueue {
        rx,
        owner,
        _not_send: PhantomData,
    };
    tracing::debug!(owner = ?owner, "Owning context captured");
    Ok((handle, queue))
}

// ---------------------------------------------------------------------------
// ContextHandle
// ---------------------------------------------------------------------------

/// Sendable handle to both execution surfaces.
#[derive(Clone)]
pub struct ContextHandle {
    runtime: Handle,
    queue: mpsc::UnboundedSender<ForegroundJob>,
    owner: ThreadId,
}

impl std::fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandle")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl ContextHandle {
    /// Run `work` on a runtime worker and wait for it.
    ///
    /// Errors returned by `work` are handed back unchanged and logged at
    /// `debug`; the caller decides how loudly to report them. A panic
    /// inside `work` surfaces as [`ExecutorError::BackgroundPanicked`]
    /// and is logged at `error`.
    pub async fn background<F, T, E>(&self, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<ExecutorError> + std::fmt::Display + Send + 'static,
    {
        match self.runtime.spawn(work).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Background work failed");
                Err(e)
            }
            Err(join_err) => {
                let err = if join_err.is_panic() {
                    ExecutorError::BackgroundPanicked(panic_message(join_err.into_panic()))
                } else {
                    ExecutorError::BackgroundCancelled
                };
                tracing::error!(error = %err, "Background work aborted");
                Err(err.into())
            }
        }
    }

    /// Queue `action` for the owning thread.
    ///
    /// The action is queued immediately, before the returned future is
    /// polled. The future resolves once the action has run, with its
    /// return value or [`ExecutorError::ForegroundPanicked`].
    pub fn foreground<F, T>(
        &self,
        action: F,
    ) -> impl Future<Output = Result<T, ExecutorError>> + Send + 'static
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: ForegroundJob = Box::new(move || {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(action))
                .map_err(|payload| ExecutorError::ForegroundPanicked(panic_message(payload)));
            let _ = tx.send(outcome);
        });
        let queued = self.queue.send(job).map_err(|_| ExecutorError::OwnerGone);

        async move {
            queued?;
            rx.await.map_err(|_| ExecutorError::OwnerGone)?
        }
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }
}

// ---------------------------------------------------------------------------
// ForegroundQueue
// ---------------------------------------------------------------------------

/// Receiving half of the foreground surface. Lives on the owning thread.
pub struct ForegroundQueue {
    rx: mpsc::UnboundedReceiver<ForegroundJob>,
    owner: ThreadId,
    _not_send: PhantomData<*const ()>,
}

impl ForegroundQueue {
    /// Run every action queued so far. Returns how many ran.
    pub fn pump(&mut self) -> usize {
        debug_assert_eq!(thread::current().id(), self.owner);
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Drive `fut` to completion while running foreground actions as
    /// they arrive. Actions still queued when `fut` finishes are run
    /// before returning.
    pub async fn run_until<F: Future>(&mut self, fut: F) -> F::Output {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                biased;
                output = &mut fut => {
                    self.pump();
                    return output;
                }
                Some(job) = self.rx.recv() => job(),
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
