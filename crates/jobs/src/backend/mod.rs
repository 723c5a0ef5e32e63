//! Execution backends.
//!
//! Each backend knows how to start a blueprint job somewhere, report on it
//! and stop it. The set is closed: [`BackendKind`] names every variant and
//! [`crate::config::BackendConfig::build`] is the only factory.

mod container;
mod local;
mod process;
mod queue;

use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use choreo_core::blueprint::Blueprint;
pub use choreo_core::blueprint::BLUEPRINT_ENV;

pub use container::{ContainerBackend, ContainerSettings};
pub use local::LocalBackend;
pub use process::ProcessBackend;
pub use queue::QueueBackend;

/// Failure talking to a backend. Only the transient variants are retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("backend call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("backend connection failed: {0}")]
    Connection(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend rejected credentials: {0}")]
    Unauthorized(String),

    #[error("invalid job request: {0}")]
    Invalid(String),

    #[error("job not found: {0}")]
    NotFound(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Connection(_) | Self::Unavailable(_)
        )
    }

    /// Classify an I/O failure from spawning or talking to a subprocess.
    pub(crate) fn from_io(context: &str, e: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::NotFound => Self::Invalid(format!("{context}: {e}")),
            ErrorKind::PermissionDenied => Self::Unauthorized(format!("{context}: {e}")),
            ErrorKind::TimedOut => Self::Timeout { secs: 0 },
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => {
                Self::Connection(format!("{context}: {e}"))
            }
            _ => Self::Unavailable(format!("{context}: {e}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Process,
    Queue,
    Container,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Process => "process",
            Self::Queue => "queue",
            Self::Container => "container",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "process" => Ok(Self::Process),
            "queue" => Ok(Self::Queue),
            "container" => Ok(Self::Container),
            other => Err(format!(
                "unknown backend '{other}', expected local, process, queue or container"
            )),
        }
    }
}

/// Where a job is in its life, as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecutionState {
    Queued,
    Running,
    Succeeded,
    Failed { error: String },
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. } | Self::Cancelled)
    }
}

/// A job as handed to a backend.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub task_id: String,
    pub user_id: String,
    pub blueprint: Blueprint,
}

impl JobSpec {
    pub fn blueprint_json(&self) -> Result<String, BackendError> {
        self.blueprint
            .to_json()
            .map_err(|e| BackendError::Invalid(format!("blueprint does not serialise: {e}")))
    }
}

#[async_trait]
pub trait JobBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Start the job and return the backend's id for it.
    async fn submit(&self, job: &JobSpec) -> Result<String, BackendError>;

    async fn poll(&self, external_id: &str) -> Result<ExecutionState, BackendError>;

    /// Stop the job. `Ok(false)` when it had already finished.
    async fn cancel(&self, external_id: &str) -> Result<bool, BackendError>;
}

/// Finished jobs an in-memory backend keeps for late polls. Beyond this
/// the oldest finished entries are dropped on the next submit and their
/// ids poll as not found.
pub const FINISHED_RETENTION: usize = 256;

/// Ids to drop so that at most `retention` finished jobs remain. `finished`
/// holds `(submission sequence, id)` pairs; the lowest sequences go first.
pub(crate) fn finished_overflow(mut finished: Vec<(u64, String)>, retention: usize) -> Vec<String> {
    if finished.len() <= retention {
        return Vec::new();
    }
    finished.sort_unstable_by_key(|(seq, _)| *seq);
    let excess = finished.len() - retention;
    finished.into_iter().take(excess).map(|(_, id)| id).collect()
}
