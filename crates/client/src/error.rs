//! Failure taxonomy for job submission, polling and asset retrieval.

use std::time::Duration;

use artgen_core::{CoreError, ExecutorError};

/// Errors surfaced by the job client layer.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// A required input is missing (configuration field, job id).
    /// Reported before any request is sent.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend answered with a non-2xx status code.
    #[error("Backend error ({status}): {body}")]
    Http {
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response body does not have the expected shape.
    #[error("Malformed response: {0}")]
    Protocol(String),

    /// The backend reported an application-level failure for the job.
    #[error("Job '{job_id}' failed: {message}")]
    Job { job_id: String, message: String },

    /// The polling ceiling was reached before the job finished.
    #[error("Job '{job_id}' not finished after {waited:?}")]
    Timeout { job_id: String, waited: Duration },

    /// Cooperative cancellation was observed.
    #[error("Job cancelled")]
    Cancelled,

    /// Downloaded bytes could not be decoded as an image.
    #[error("Failed to decode image from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Coarse classification of a [`JobError`], for callers that only need
/// to tell outcomes apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Precondition,
    /// Our call failed: connectivity or non-2xx status.
    Transport,
    Protocol,
    /// The job itself failed on the backend.
    Job,
    Timeout,
    Cancelled,
    Decode,
    Internal,
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Precondition(_) => ErrorKind::Precondition,
            Self::Request(_) | Self::Http { .. } => ErrorKind::Transport,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Job { .. } => ErrorKind::Job,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Executor(_) => ErrorKind::Internal,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

impl From<CoreError> for JobError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Precondition(msg) => Self::Precondition(msg),
            CoreError::Validation(msg) => Self::Protocol(msg),
            other @ CoreError::InvalidTransition { .. } => Self::Protocol(other.to_string()),
        }
    }
}
