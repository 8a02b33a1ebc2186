use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use artgen_client::PollPolicy;
use artgen_core::request::DEFAULT_BASE_RESOLUTION;
use artgen_core::{EndpointConfig, GenerationParams};

/// Seed value that asks for a fresh random seed on every run.
const RANDOM_SEED: &str = "random";

/// Binary configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ArtgenConfig {
    pub endpoint: EndpointConfig,
    pub poll: PollPolicy,
    /// Minimum spacing between submissions to the same endpoint.
    pub min_request_interval: Duration,
    pub generation: GenerationParams,
}

impl ArtgenConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                 |
    /// |----------------------------------|-------------------------|
    /// | `ARTGEN_HOST`                    | `http://localhost:8000` |
    /// | `ARTGEN_JOB_PATH`                | `/art-api/job`          |
    /// | `ARTGEN_STATUS_PATH`             | `/art-api/job/status`   |
    /// | `ARTGEN_API_KEY`                 | (empty)                 |
    /// | `ARTGEN_ENDPOINT_NAME`           | `default`               |
    /// | `ARTGEN_POLL_INTERVAL_MS`        | `5000`                  |
    /// | `ARTGEN_MAX_WAIT_SECS`           | `60`                    |
    /// | `ARTGEN_MIN_REQUEST_INTERVAL_MS` | `1000`                  |
    /// | `ARTGEN_BASE_RESOLUTION`         | `512`                   |
    /// | `ARTGEN_ASPECT_RATIO`            | `1.0`                   |
    /// | `ARTGEN_SEED`                    | unset (backend chooses) |
    ///
    /// `ARTGEN_SEED=random` draws a new seed for the run. An empty API
    /// key is accepted here and rejected at submission.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ArtgenConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.into());

        let endpoint = EndpointConfig::new(
            text("ARTGEN_ENDPOINT_NAME", "default"),
            text("ARTGEN_HOST", "http://localhost:8000"),
            text("ARTGEN_JOB_PATH", "/art-api/job"),
            text("ARTGEN_STATUS_PATH", "/art-api/job/status"),
            text("ARTGEN_API_KEY", ""),
        );

        let poll_interval_ms: u64 = parse(&lookup, "ARTGEN_POLL_INTERVAL_MS", 5000)?;
        let max_wait_secs: u64 = parse(&lookup, "ARTGEN_MAX_WAIT_SECS", 60)?;
        let min_request_interval_ms: u64 = parse(&lookup, "ARTGEN_MIN_REQUEST_INTERVAL_MS", 1000)?;
        let base_resolution: u32 =
            parse(&lookup, "ARTGEN_BASE_RESOLUTION", DEFAULT_BASE_RESOLUTION)?;
        let aspect_ratio: f32 = parse(&lookup, "ARTGEN_ASPECT_RATIO", 1.0)?;
        if !(aspect_ratio.is_finite() && aspect_ratio > 0.0) {
            anyhow::bail!("ARTGEN_ASPECT_RATIO must be a positive number");
        }

        let mut generation = GenerationParams {
            base_resolution,
            aspect_ratio,
            seed: None,
        };
        match lookup("ARTGEN_SEED").map(|s| s.trim().to_string()) {
            Some(seed) if seed.eq_ignore_ascii_case(RANDOM_SEED) => {
                generation.randomize_seed();
            }
            Some(seed) if !seed.is_empty() => generation.seed = Some(seed),
            _ => {}
        }

        Ok(Self {
            endpoint,
            poll: PollPolicy::new(
                Duration::from_millis(poll_interval_ms),
                Duration::from_secs(max_wait_secs),
            ),
            min_request_interval: Duration::from_millis(min_request_interval_ms),
            generation,
        })
    }
}

fn parse<F, T>(lookup: &F, name: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a valid {}", std::any::type_name::<T>())),
        None => Ok(default),
    }
}
