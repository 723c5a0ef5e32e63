//! Job execution: hand blueprints to a backend, retry transient failures,
//! observe and cancel the result.

pub mod backend;
pub mod config;
pub mod executor;

pub use backend::{BackendError, BackendKind, ExecutionState, JobBackend, JobSpec};
pub use config::{BackendConfig, BackendDeps, ExecutorConfig};
pub use executor::{ExecutionHandle, JobExecutionError, JobExecutor};
