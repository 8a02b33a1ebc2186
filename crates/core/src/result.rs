//! Server-observed job state and the wire shape it is populated from.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::status::JobStatus;

/// Error text recorded when the backend reports `failed` without a reason.
pub const DEFAULT_FAILURE_MESSAGE: &str = "job failed";

/// One downloadable output of a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub url: String,
    #[serde(default)]
    pub filename: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub subfolder: String,
}

/// Result location(s) of a job.
///
/// Backends answer either with a single `url` or with an `images` list;
/// consumers match on the variant rather than probing optional fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum JobOutput {
    /// No result has been reported yet.
    #[default]
    Pending,
    /// A single result URL.
    Url(String),
    /// An ordered list of result assets.
    Assets(Vec<AssetDescriptor>),
}

impl JobOutput {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Result URLs in delivery order.
    pub fn urls(&self) -> Vec<String> {
        match self {
            Self::Pending => Vec::new(),
            Self::Url(url) => vec![url.clone()],
            Self::Assets(assets) => assets.iter().map(|a| a.url.clone()).collect(),
        }
    }
}

/// JSON body returned by both the submission and the status endpoints.
///
/// Every field is optional: a response only overwrites what it carries.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub processor: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<AssetDescriptor>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Latest known state of one remote job.
///
/// Updated in place by successive status responses via [`merge`](Self::merge).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobResult {
    /// Server-assigned job id; empty until submission succeeds.
    pub job_id: String,
    pub status: JobStatus,
    /// Backend worker that handled the job, when reported.
    pub processor: Option<String>,
    pub error: Option<String>,
    pub output: JobOutput,
}

impl JobResult {
    /// A result placeholder for an already-known job id.
    pub fn for_job(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            ..Default::default()
        }
    }

    /// Apply a status response on top of the current state.
    pub fn merge(&mut self, response: StatusResponse) {
        if let Some(id) = response.id.filter(|id| !id.is_empty()) {
            self.job_id = id;
        }
        if let Some(status) = response.status {
            self.status = status;
        }
        if response.processor.is_some() {
            self.processor = response.processor;
        }
        if response.error.is_some() {
            self.error = response.error;
        }

        match (response.images, response.url) {
            (Some(images), _) if !images.is_empty() => self.output = JobOutput::Assets(images),
            (_, Some(url)) if !url.is_empty() => self.output = JobOutput::Url(url),
            _ => {}
        }

        if self.status == JobStatus::Failed && self.error_message().is_none() {
            self.error = Some(DEFAULT_FAILURE_MESSAGE.to_string());
        }
    }

    /// The backend's error text, if it is non-empty.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.trim().is_empty())
    }

    /// Check the invariants a finished result must hold.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self.status {
            JobStatus::Complete if self.output.is_pending() => Err(CoreError::Validation(
                format!("Job '{}' is complete but reported no output", self.job_id),
            )),
            JobStatus::Failed if self.error_message().is_none() => Err(CoreError::Validation(
                format!("Job '{}' failed without an error message", self.job_id),
            )),
            _ => Ok(()),
        }
    }

    pub fn image_urls(&self) -> Vec<String> {
        self.output.urls()
    }
}
