//! Domain types and execution primitives for remote image-generation jobs.
//!
//! Nothing in this crate performs network I/O. It defines the data model
//! shared by the client and engine crates (endpoint configuration, job
//! requests and results, the job lifecycle state machine) and the
//! [`executor`] that separates worker execution from the owning thread.

pub mod endpoint;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod request;
pub mod result;
pub mod status;
pub mod types;

pub use endpoint::{EndpointConfig, EndpointKey};
pub use error::CoreError;
pub use executor::{ContextHandle, ExecutorError, ForegroundQueue};
pub use lifecycle::{JobLifecycle, LifecycleState};
pub use request::{GenerationParams, JobRequest};
pub use result::{AssetDescriptor, JobOutput, JobResult, StatusResponse};
pub use status::JobStatus;
