//! Remote generation backend configuration.
//!
//! An [`EndpointConfig`] is immutable once built and is shared read-only
//! (usually behind an `Arc`) by every job submitted against it.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Connection details for one remote image-generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Human-readable name, used as the task name in events and logs.
    pub name: String,
    /// Scheme and authority, e.g. `https://api.example.com`.
    pub host: String,
    /// Path that accepts job submissions, e.g. `/art-api/job`.
    pub job_path: String,
    /// Path that reports job status, e.g. `/art-api/job/status`.
    pub status_path: String,
    /// Bearer credential sent with every request.
    pub api_key: String,
}

/// Stable identity of a backend, used to coalesce rate limiting.
///
/// Two configs with the same host, job path and credential throttle
/// together even when they are distinct values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    host: String,
    job_path: String,
    api_key: String,
}

impl EndpointConfig {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        job_path: impl Into<String>,
        status_path: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            job_path: job_path.into(),
            status_path: status_path.into(),
            api_key: api_key.into(),
        }
    }

    /// Ensure every transport field is populated.
    ///
    /// Missing configuration is a precondition failure, reported before
    /// any request is attempted.
    pub fn validate(&self) -> Result<(), CoreError> {
        let fields = [
            ("host", &self.host),
            ("job_path", &self.job_path),
            ("status_path", &self.status_path),
            ("api_key", &self.api_key),
        ];
        let missing: Vec<&str> = fields
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| *field)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Precondition(format!(
                "Endpoint '{}' is missing: {}",
                self.name,
                missing.join(", ")
            )))
        }
    }

    /// Full URL of the submission endpoint.
    pub fn job_url(&self) -> String {
        join_url(&self.host, &self.job_path)
    }

    /// Full URL of the status endpoint.
    pub fn status_url(&self) -> String {
        join_url(&self.host, &self.status_path)
    }

    pub fn key(&self) -> EndpointKey {
        EndpointKey {
            host: self.host.trim_end_matches('/').to_string(),
            job_path: self.job_path.clone(),
            api_key: self.api_key.clone(),
        }
    }
}

fn join_url(host: &str, path: &str) -> String {
    let host = host.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{host}{path}")
    } else {
        format!("{host}/{path}")
    }
}
