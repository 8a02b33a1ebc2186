//! Job orchestration on top of the client and event crates.
//!
//! A [`JobRequestTask`] binds one request to its evolving result, its
//! lifecycle and a cancellation token. The [`TaskRegistry`] submits
//! tasks, drives them to an outcome, delivers decoded images to the
//! owning thread and fans task events out to one aggregate bus.

pub mod registry;
pub mod task;

pub use registry::{RegistryConfig, TaskRegistry};
pub use task::JobRequestTask;
