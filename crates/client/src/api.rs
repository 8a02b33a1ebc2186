//! REST client for generation backends.
//!
//! Wraps the two endpoints every backend exposes: job submission
//! (`POST {host}{job_path}`) and status polling
//! (`POST {host}{status_path}` with `{"id": ...}`). Both answer with a
//! [`StatusResponse`] that is merged into a [`JobResult`].

use std::sync::Arc;
use std::time::Duration;

use artgen_core::{EndpointConfig, JobRequest, JobResult, JobStatus, StatusResponse};
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::JobError;
use crate::poll::{PollDriver, PollOutcome, PollPolicy};
use crate::rate_limit::RateLimiter;

/// HTTP client shared by every job against any backend.
#[derive(Clone)]
pub struct JobClient {
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
}

impl JobClient {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self::with_client(reqwest::Client::new(), limiter)
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(http: reqwest::Client, limiter: Arc<RateLimiter>) -> Self {
        Self { http, limiter }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Submit `request` and return the backend's first view of the job.
    ///
    /// Waits on the rate limiter for the request's endpoint first. The
    /// server-assigned id is written back into `request.job_id`. A 200
    /// response carrying an `error` field fails with [`JobError::Job`].
    pub async fn submit(&self, request: &mut JobRequest) -> Result<JobResult, JobError> {
        request.validate()?;
        let config = request.config().clone();

        self.limiter.acquire(&config).await;

        let response = self
            .http
            .post(config.job_url())
            .bearer_auth(&config.api_key)
            .header(ACCEPT, "application/json")
            .json(&request.to_body())
            .send()
            .await?;
        let body: StatusResponse = Self::parse_response(response).await?;

        let mut result = JobResult::default();
        result.merge(body);
        if result.job_id.is_empty() {
            return Err(JobError::Protocol(
                "Submission response carried no job id".to_string(),
            ));
        }
        request.job_id = Some(result.job_id.clone());

        tracing::info!(
            endpoint = %config.name,
            job_id = %result.job_id,
            status = %result.status,
            "Job submitted",
        );

        check_reported_error(&result)?;
        if result.status.is_finished() {
            check_finished(&result)?;
        }
        Ok(result)
    }

    /// Fetch the current status of `job_id` without touching any result.
    ///
    /// An empty `job_id` fails with [`JobError::Precondition`] before
    /// any request is made.
    pub async fn fetch_status(
        &self,
        config: &EndpointConfig,
        job_id: &str,
    ) -> Result<StatusResponse, JobError> {
        if job_id.trim().is_empty() {
            return Err(JobError::Precondition(
                "Cannot poll a job without an id".to_string(),
            ));
        }
        config.validate()?;

        let response = self
            .http
            .post(config.status_url())
            .bearer_auth(&config.api_key)
            .header(ACCEPT, "application/json")
            .json(&serde_json::json!({ "id": job_id }))
            .send()
            .await?;
        let body: StatusResponse = Self::parse_response(response).await?;

        tracing::debug!(
            endpoint = %config.name,
            job_id,
            status = ?body.status,
            "Status polled",
        );
        Ok(body)
    }

    /// Poll once and merge the response into `result` in place.
    pub async fn poll_status(
        &self,
        config: &EndpointConfig,
        result: &mut JobResult,
    ) -> Result<(), JobError> {
        let response = self.fetch_status(config, &result.job_id).await?;
        result.merge(response);
        Ok(())
    }

    /// Single readiness check for an already-submitted job.
    ///
    /// Returns the finished result, or [`JobError::Timeout`] with zero
    /// wait when the job is still running.
    pub async fn check_ready(
        &self,
        config: &EndpointConfig,
        job_id: &str,
    ) -> Result<JobResult, JobError> {
        let mut result = JobResult::for_job(job_id);
        self.poll_status(config, &mut result).await?;
        if !result.status.is_finished() {
            return Err(JobError::Timeout {
                job_id: result.job_id,
                waited: Duration::ZERO,
            });
        }
        finished_outcome(result)
    }

    /// Submit and poll until the job finishes, times out or is cancelled.
    ///
    /// Only a successfully completed job is returned as `Ok`.
    pub async fn run_to_completion(
        &self,
        request: &mut JobRequest,
        policy: PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<JobResult, JobError> {
        let mut result = self.submit(request).await?;
        let config = request.config().clone();
        let driver = PollDriver::new(policy, cancel.clone());

        let outcome = loop {
            if let Some(outcome) = driver.wait(result.status).await {
                break outcome;
            }
            self.poll_status(&config, &mut result).await?;
        };

        match outcome {
            PollOutcome::Finished => finished_outcome(result),
            PollOutcome::TimedOut { waited } => Err(JobError::Timeout {
                job_id: result.job_id,
                waited,
            }),
            PollOutcome::Cancelled => Err(JobError::Cancelled),
        }
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`JobError::Http`]
    /// containing the status and body text on failure.
    pub(crate) async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, JobError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(JobError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    ///
    /// A body that does not match `T` is a [`JobError::Protocol`].
    pub(crate) async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, JobError> {
        let response = Self::ensure_success(response).await?;
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| JobError::Protocol(format!("Unexpected response body: {e}")))
    }
}

/// Turn a non-empty backend `error` field into [`JobError::Job`].
pub fn check_reported_error(result: &JobResult) -> Result<(), JobError> {
    match result.error_message() {
        Some(message) => Err(JobError::Job {
            job_id: result.job_id.clone(),
            message: message.to_string(),
        }),
        None => Ok(()),
    }
}

/// Check that a finished result is a usable success.
///
/// `Failed` becomes [`JobError::Job`]; `Complete` without output is a
/// [`JobError::Protocol`].
pub fn check_finished(result: &JobResult) -> Result<(), JobError> {
    check_reported_error(result)?;
    if result.status == JobStatus::Failed {
        return Err(JobError::Job {
            job_id: result.job_id.clone(),
            message: artgen_core::result::DEFAULT_FAILURE_MESSAGE.to_string(),
        });
    }
    result.validate()?;
    Ok(())
}

fn finished_outcome(result: JobResult) -> Result<JobResult, JobError> {
    check_finished(&result)?;
    tracing::info!(job_id = %result.job_id, status = %result.status, "Job finished");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use artgen_core::JobOutput;

    use super::*;

    fn finished(status: JobStatus, error: Option<&str>, output: JobOutput) -> JobResult {
        JobResult {
            job_id: "j".into(),
            status,
            processor: None,
            error: error.map(str::to_string),
            output,
        }
    }

    #[test]
    fn complete_with_url_is_success() {
        let result = finished(JobStatus::Complete, None, JobOutput::Url("http://x/a.png".into()));
        assert!(check_finished(&result).is_ok());
    }

    #[test]
    fn complete_without_output_is_protocol_error() {
        let result = finished(JobStatus::Complete, None, JobOutput::Pending);
        assert!(matches!(check_finished(&result), Err(JobError::Protocol(_))));
    }

    #[test]
    fn failed_is_job_error() {
        let result = finished(JobStatus::Failed, Some("oom"), JobOutput::Pending);
        match check_finished(&result) {
            Err(JobError::Job { message, .. }) => assert_eq!(message, "oom"),
            other => panic!("Expected Job error, got {other:?}"),
        }
    }

    #[test]
    fn error_text_on_complete_is_job_error() {
        let result = finished(
            JobStatus::Complete,
            Some("model overloaded"),
            JobOutput::Url("http://x/a.png".into()),
        );
        assert!(matches!(check_finished(&result), Err(JobError::Job { .. })));
    }

    #[tokio::test]
    async fn empty_job_id_fails_before_any_request() {
        let client = JobClient::new(Arc::new(RateLimiter::default()));
        // Unroutable host: a request attempt would surface as Request, not Precondition.
        let config = EndpointConfig::new("art", "http://0.0.0.0:9", "/job", "/status", "key");
        let mut result = JobResult::default();
        let err = client.poll_status(&config, &mut result).await.unwrap_err();
        assert!(matches!(err, JobError::Precondition(_)));
    }

    #[tokio::test]
    async fn submit_with_missing_config_is_precondition() {
        let client = JobClient::new(Arc::new(RateLimiter::default()));
        let config = Arc::new(EndpointConfig::new("art", "", "/job", "/status", ""));
        let mut request = JobRequest::new(config, "a red fox");
        let err = client.submit(&mut request).await.unwrap_err();
        assert!(matches!(err, JobError::Precondition(_)));
        assert!(request.job_id.is_none());
    }
}
