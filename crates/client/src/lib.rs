//! HTTP side of remote image generation.
//!
//! Submits jobs to a generation backend, polls them to a terminal
//! status, and downloads and decodes the resulting images. Every
//! network call goes through the background surface of an
//! [`artgen_core::ContextHandle`] when driven by the engine.

pub mod api;
pub mod error;
pub mod fetch;
pub mod poll;
pub mod rate_limit;
pub mod serverless;

pub use api::JobClient;
pub use error::{ErrorKind, JobError};
pub use fetch::{AssetFetcher, DecodedImage, ImageSink};
pub use poll::{PollDriver, PollOutcome, PollPolicy};
pub use rate_limit::RateLimiter;
pub use serverless::{RunStatus, ServerlessClient};
