//! Pacing for status polling: fixed interval, wall-clock ceiling,
//! cooperative cancellation.

use std::time::Duration;

use artgen_core::JobStatus;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How often to poll and how long to keep trying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between two status polls.
    pub interval: Duration,
    /// Total wait after which polling gives up with a timeout.
    pub max_wait: Duration,
}

impl PollPolicy {
    /// For direct callers of [`JobClient`](crate::JobClient).
    pub const SIMPLE: Self = Self {
        interval: Duration::from_secs(5),
        max_wait: Duration::from_secs(60),
    };

    /// For tasks tracked by a registry.
    pub const TRACKED: Self = Self {
        interval: Duration::from_secs(5),
        max_wait: Duration::from_secs(300),
    };

    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::SIMPLE
    }
}

/// Why polling stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The job reached `Complete` or `Failed`.
    Finished,
    /// The ceiling passed while the job was still running.
    TimedOut { waited: Duration },
    Cancelled,
}

/// Decides, between polls, whether to poll again.
///
/// ```ignore
/// let driver = PollDriver::new(policy, cancel.clone());
/// let outcome = loop {
///     if let Some(outcome) = driver.wait(result.status).await {
///         break outcome;
///     }
///     client.poll_status(&config, &mut result).await?;
/// };
/// ```
#[derive(Debug)]
pub struct PollDriver {
    policy: PollPolicy,
    cancel: CancellationToken,
    started: Instant,
}

impl PollDriver {
    /// Start the clock now.
    pub fn new(policy: PollPolicy, cancel: CancellationToken) -> Self {
        Self {
            policy,
            cancel,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Given the latest status, either stop with an outcome or sleep
    /// until the next poll is due and return `None`.
    ///
    /// The last sleep is clipped so one final poll lands on the ceiling.
    /// Cancellation interrupts the sleep and is checked again right
    /// before returning `None`.
    pub async fn wait(&self, status: JobStatus) -> Option<PollOutcome> {
        if status.is_finished() {
            return Some(PollOutcome::Finished);
        }

        let waited = self.started.elapsed();
        if waited >= self.policy.max_wait {
            return Some(PollOutcome::TimedOut { waited });
        }

        let pause = self.policy.interval.min(self.policy.max_wait - waited);
        tokio::select! {
            _ = self.cancel.cancelled() => return Some(PollOutcome::Cancelled),
            _ = tokio::time::sleep(pause) => {}
        }

        if self.cancel.is_cancelled() {
            return Some(PollOutcome::Cancelled);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn finished_status_stops_immediately() {
        let driver = PollDriver::new(PollPolicy::SIMPLE, CancellationToken::new());
        assert_eq!(driver.wait(JobStatus::Complete).await, Some(PollOutcome::Finished));
        assert_eq!(driver.wait(JobStatus::Failed).await, Some(PollOutcome::Finished));
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_one_interval_between_polls() {
        let driver = PollDriver::new(PollPolicy::SIMPLE, CancellationToken::new());
        assert_eq!(driver.wait(JobStatus::Processing).await, None);
        assert!(driver.elapsed() >= Duration::from_secs(5));
        assert!(driver.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_ceiling() {
        let driver = PollDriver::new(PollPolicy::SIMPLE, CancellationToken::new());
        let mut polls = 0;
        let outcome = loop {
            if let Some(outcome) = driver.wait(JobStatus::Processing).await {
                break outcome;
            }
            polls += 1;
        };
        match outcome {
            PollOutcome::TimedOut { waited } => assert!(waited >= Duration::from_secs(60)),
            other => panic!("Expected TimedOut, got {other:?}"),
        }
        assert_eq!(polls, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn final_sleep_is_clipped_to_ceiling() {
        let policy = PollPolicy::new(Duration::from_secs(5), Duration::from_secs(7));
        let driver = PollDriver::new(policy, CancellationToken::new());
        assert_eq!(driver.wait(JobStatus::Queued).await, None);
        assert_eq!(driver.wait(JobStatus::Queued).await, None);
        assert!(driver.elapsed() < Duration::from_secs(8));
        assert!(matches!(
            driver.wait(JobStatus::Queued).await,
            Some(PollOutcome::TimedOut { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let driver = PollDriver::new(PollPolicy::TRACKED, cancel.clone());
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        assert_eq!(driver.wait(JobStatus::Processing).await, Some(PollOutcome::Cancelled));
        assert!(driver.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn finished_wins_over_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let driver = PollDriver::new(PollPolicy::SIMPLE, cancel);
        assert_eq!(driver.wait(JobStatus::Complete).await, Some(PollOutcome::Finished));
    }
}
