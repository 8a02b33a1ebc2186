//! Serverless runner backends.
//!
//! These expose `POST {endpoint}/run`, `GET {endpoint}/status/{id}` and
//! `POST {endpoint}/cancel/{id}`. The finished output carries the image
//! itself as base64 in `output.message` rather than a URL to download.

use std::sync::Arc;
use std::time::Duration;

use artgen_core::{ContextHandle, EndpointConfig};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::header::{ACCEPT, CACHE_CONTROL, PRAGMA};
use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::JobClient;
use crate::error::JobError;
use crate::fetch::DecodedImage;
use crate::poll::PollPolicy;
use crate::rate_limit::RateLimiter;

/// Lower bound on the server-suggested delay between status checks.
pub const MIN_STATUS_DELAY: Duration = Duration::from_millis(250);

/// Build an [`EndpointConfig`] for a serverless endpoint URL.
pub fn serverless_endpoint(
    name: impl Into<String>,
    endpoint_url: impl Into<String>,
    api_key: impl Into<String>,
) -> EndpointConfig {
    EndpointConfig::new(name, endpoint_url, "/run", "/status", api_key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    InQueue,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl RunStatus {
    pub fn is_finished(self) -> bool {
        !matches!(self, Self::InQueue | Self::InProgress)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunOutput {
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of both the `/run` and `/status/{id}` responses.
#[derive(Debug, Clone, Deserialize)]
pub struct RunResponse {
    pub id: String,
    #[serde(default)]
    pub status: Option<RunStatus>,
    /// Server-suggested wait before the next status check, in ms.
    #[serde(rename = "delayTime", default)]
    pub delay_time: Option<u64>,
    #[serde(default)]
    pub output: Option<RunOutput>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Client for serverless runner endpoints.
///
/// Every request and the output decode run on the background surface of
/// the captured context; only the waits between polls stay on the caller.
#[derive(Clone)]
pub struct ServerlessClient {
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
    context: ContextHandle,
}

impl ServerlessClient {
    pub fn new(http: reqwest::Client, limiter: Arc<RateLimiter>, context: ContextHandle) -> Self {
        Self {
            http,
            limiter,
            context,
        }
    }

    /// Queue a run with `input` as the request document.
    pub async fn run(
        &self,
        config: &EndpointConfig,
        input: &serde_json::Value,
    ) -> Result<RunResponse, JobError> {
        config.validate()?;
        let this = self.clone();
        let config = config.clone();
        let input = input.clone();
        self.context
            .background(async move { this.send_run(&config, &input).await })
            .await
    }

    pub async fn status(
        &self,
        config: &EndpointConfig,
        job_id: &str,
    ) -> Result<RunResponse, JobError> {
        if job_id.trim().is_empty() {
            return Err(JobError::Precondition(
                "Cannot poll a run without an id".to_string(),
            ));
        }
        let this = self.clone();
        let config = config.clone();
        let job_id = job_id.to_string();
        self.context
            .background(async move { this.fetch_status(&config, &job_id).await })
            .await
    }

    async fn send_run(
        &self,
        config: &EndpointConfig,
        input: &serde_json::Value,
    ) -> Result<RunResponse, JobError> {
        self.limiter.acquire(config).await;

        let response = self
            .http
            .post(config.job_url())
            .bearer_auth(&config.api_key)
            .header(ACCEPT, "application/json")
            .json(input)
            .send()
            .await?;
        let run: RunResponse = JobClient::parse_response(response).await?;
        if run.id.is_empty() {
            return Err(JobError::Protocol("Run response carried no job id".to_string()));
        }

        tracing::info!(endpoint = %config.name, job_id = %run.id, "Serverless run queued");
        Ok(run)
    }

    async fn fetch_status(
        &self,
        config: &EndpointConfig,
        job_id: &str,
    ) -> Result<RunResponse, JobError> {
        let response = self
            .http
            .get(format!("{}/{}", config.status_url(), job_id))
            .bearer_auth(&config.api_key)
            .header(CACHE_CONTROL, "no-cache, no-store, must-revalidate")
            .header(PRAGMA, "no-cache")
            .send()
            .await?;
        let status: RunResponse = JobClient::parse_response(response).await?;
        tracing::debug!(job_id, status = ?status.status, "Serverless status polled");
        Ok(status)
    }

    /// Ask the backend to stop a run. Best effort: failures are logged
    /// and swallowed.
    pub async fn cancel(&self, config: &EndpointConfig, job_id: &str) {
        let this = self.clone();
        let config = config.clone();
        let job_id = job_id.to_string();
        let sent = self
            .context
            .background(async move {
                this.send_cancel(&config, &job_id).await;
                Ok::<_, JobError>(())
            })
            .await;
        if let Err(e) = sent {
            tracing::warn!(error = %e, "Serverless cancel aborted");
        }
    }

    async fn send_cancel(&self, config: &EndpointConfig, job_id: &str) {
        let url = format!("{}/cancel/{}", config.host.trim_end_matches('/'), job_id);
        let sent = self
            .http
            .post(&url)
            .bearer_auth(&config.api_key)
            .send()
            .await;

        match sent {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                if status.is_success() {
                    tracing::info!(job_id, body = %body, "Serverless run cancel requested");
                } else {
                    tracing::warn!(job_id, status = status.as_u16(), body = %body, "Serverless cancel rejected");
                }
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Serverless cancel failed");
            }
        }
    }

    /// Run `input` and wait for the decoded output image.
    ///
    /// Waits the server-suggested `delayTime` between checks (at least
    /// [`MIN_STATUS_DELAY`]), falling back to the policy interval.
    pub async fn run_to_image(
        &self,
        config: &EndpointConfig,
        input: &serde_json::Value,
        policy: PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<DecodedImage, JobError> {
        let mut current = self.run(config, input).await?;
        let job_id = current.id.clone();
        let started = Instant::now();

        loop {
            let status = current.status;
            match status {
                Some(RunStatus::Completed) => {
                    let job_id = job_id.clone();
                    return self
                        .context
                        .background(async move { decode_output(&job_id, &current) })
                        .await;
                }
                Some(status) if status.is_finished() => {
                    return Err(JobError::Job {
                        message: current
                            .error
                            .clone()
                            .filter(|e| !e.trim().is_empty())
                            .unwrap_or_else(|| format!("run ended with status {status:?}")),
                        job_id,
                    });
                }
                _ => {}
            }

            let waited = started.elapsed();
            if waited >= policy.max_wait {
                return Err(JobError::Timeout { job_id, waited });
            }

            let delay = current
                .delay_time
                .map(|ms| Duration::from_millis(ms).max(MIN_STATUS_DELAY))
                .unwrap_or(policy.interval)
                .min(policy.max_wait - waited);

            tokio::select! {
                _ = cancel.cancelled() => return Err(JobError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            if cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }

            current = self.status(config, &job_id).await?;
        }
    }
}

fn decode_output(job_id: &str, response: &RunResponse) -> Result<DecodedImage, JobError> {
    let url = format!("serverless:{job_id}");
    let encoded = response
        .output
        .as_ref()
        .and_then(|o| o.message.as_deref())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| JobError::Protocol(format!("Run '{job_id}' completed without output")))?;

    let bytes = BASE64.decode(encoded.trim()).map_err(|e| JobError::Decode {
        url: url.clone(),
        reason: e.to_string(),
    })?;
    let image = image::load_from_memory(&bytes).map_err(|e| JobError::Decode {
        url: url.clone(),
        reason: e.to_string(),
    })?;

    tracing::info!(job_id, "Serverless run completed");
    Ok(DecodedImage { url, image })
}
