//! Execution streams and the runtime manager.
//!
//! A stream owns the live executions behind one declared entry point,
//! applying its isolation level and concurrency cap; the manager owns the
//! streams plus every shared runtime service (event bus, state store, wait
//! ledger, storage) and their durable lifecycle.

pub mod config;
pub mod manager;
#[allow(clippy::module_inception)]
pub mod stream;

pub use config::{DATA_DIR_ENV, RuntimeConfig};
pub use manager::RuntimeManager;
pub use stream::{ExecutionStream, StreamError};
