//! Submit, observe and cancel blueprint jobs on a backend.
//!
//! Every backend call is bounded by `call_timeout` and wrapped in the
//! executor's [`RetryPolicy`]. Timeouts, connection failures and
//! unavailability are retried with exponential backoff; anything else
//! fails on the attempt that produced it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use choreo_core::blueprint::Blueprint;
use choreo_core::retry::RetryPolicy;
use choreo_core::task::{StoreError, TaskStatusStore, TaskUpdate};

use crate::backend::{BackendError, BackendKind, ExecutionState, JobBackend, JobSpec};

/// Error message recorded on a task stopped by [`JobExecutor::cancel`].
pub const CANCELLED_MESSAGE: &str = "cancelled by request";

/// A backend call gave up.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("job execution failed after {attempts} attempt(s): {source}")]
pub struct JobExecutionError {
    pub attempts: u32,
    #[source]
    pub source: BackendError,
}

impl JobExecutionError {
    /// Rejected before any backend call was made.
    fn rejected(source: BackendError) -> Self {
        Self { attempts: 0, source }
    }
}

/// Identifies a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHandle {
    pub task_id: String,
    pub backend: BackendKind,
    /// The backend's own id (queue row, container id, task id).
    pub external_id: String,
    /// Backend calls it took to get the job accepted.
    pub attempts: u32,
}

fn store_error(e: StoreError) -> BackendError {
    match e {
        StoreError::Conflict(task_id) => {
            BackendError::Invalid(format!("task '{task_id}' already exists"))
        }
        StoreError::Backend(msg) => BackendError::Unavailable(format!("task store: {msg}")),
    }
}

pub struct JobExecutor {
    backend: Arc<dyn JobBackend>,
    store: Arc<dyn TaskStatusStore>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl JobExecutor {
    pub fn new(
        backend: Arc<dyn JobBackend>,
        store: Arc<dyn TaskStatusStore>,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            store,
            retry,
            call_timeout,
        }
    }

    /// Run one backend operation under the timeout and retry policy.
    /// Returns the value and the attempts it took.
    async fn call<T, F, Fut>(
        &self,
        op_name: &str,
        task_id: &str,
        op: F,
    ) -> Result<(T, u32), JobExecutionError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, BackendError>>,
    {
        let timeout = self.call_timeout;
        let result = self
            .retry
            .run(
                |attempt| {
                    let fut = op();
                    async move {
                        tracing::debug!(op = op_name, task_id, attempt, "Backend call");
                        match tokio::time::timeout(timeout, fut).await {
                            Ok(result) => result,
                            Err(_) => Err(BackendError::Timeout {
                                secs: timeout.as_secs(),
                            }),
                        }
                    }
                },
                BackendError::is_transient,
            )
            .await;

        match result {
            Ok((value, attempts)) => {
                if attempts > 1 {
                    tracing::info!(op = op_name, task_id, attempts, "Backend call succeeded after retry");
                }
                Ok((value, attempts))
            }
            Err(exhausted) => {
                tracing::error!(
                    op = op_name,
                    task_id,
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "Backend call failed",
                );
                Err(JobExecutionError {
                    attempts: exhausted.attempts,
                    source: exhausted.last_error,
                })
            }
        }
    }

    /// Record a `pending` task and start it on the backend.
    ///
    /// A backend that never accepts the job leaves the task `failed`.
    pub async fn submit(
        &self,
        task_id: &str,
        user_id: &str,
        blueprint: Blueprint,
    ) -> Result<ExecutionHandle, JobExecutionError> {
        if blueprint.task_id != task_id {
            return Err(JobExecutionError::rejected(BackendError::Invalid(format!(
                "blueprint belongs to task '{}', not '{task_id}'",
                blueprint.task_id
            ))));
        }
        blueprint
            .validate()
            .map_err(|e| JobExecutionError::rejected(BackendError::Invalid(e.to_string())))?;

        self.store
            .create(task_id, user_id)
            .await
            .map_err(|e| JobExecutionError::rejected(store_error(e)))?;

        let spec = JobSpec {
            task_id: task_id.to_string(),
            user_id: user_id.to_string(),
            blueprint,
        };
        match self.call("submit", task_id, || self.backend.submit(&spec)).await {
            Ok((external_id, attempts)) => {
                tracing::info!(
                    task_id,
                    backend = %self.backend.kind(),
                    external_id = %external_id,
                    attempts,
                    "Job submitted",
                );
                Ok(ExecutionHandle {
                    task_id: task_id.to_string(),
                    backend: self.backend.kind(),
                    external_id,
                    attempts,
                })
            }
            Err(e) => {
                if let Err(store_err) = self.store.update(task_id, TaskUpdate::failed(e.to_string())).await {
                    tracing::error!(task_id, error = %store_err, "Failed to record submit failure");
                }
                Err(e)
            }
        }
    }

    pub async fn status(&self, handle: &ExecutionHandle) -> Result<ExecutionState, JobExecutionError> {
        self.call("poll", &handle.task_id, || self.backend.poll(&handle.external_id))
            .await
            .map(|(state, _)| state)
    }

    /// Stop a job. Idempotent: `Ok(false)` once the job has finished or
    /// was already cancelled.
    pub async fn cancel(&self, handle: &ExecutionHandle) -> Result<bool, JobExecutionError> {
        let task_id = handle.task_id.as_str();
        if let Some(record) = self
            .store
            .get(task_id)
            .await
            .map_err(|e| JobExecutionError::rejected(store_error(e)))?
        {
            if record.status.is_terminal() {
                return Ok(false);
            }
        }

        let (stopped, _) = self
            .call("cancel", task_id, || self.backend.cancel(&handle.external_id))
            .await?;
        if stopped {
            let recorded = self
                .store
                .update(task_id, TaskUpdate::failed(CANCELLED_MESSAGE))
                .await
                .map_err(|e| JobExecutionError::rejected(store_error(e)))?;
            tracing::info!(task_id, recorded, "Job cancelled");
        }
        Ok(stopped)
    }

    /// Poll every `poll_interval` until the job is terminal or `deadline`
    /// elapses (a [`BackendError::Timeout`]).
    pub async fn wait(
        &self,
        handle: &ExecutionHandle,
        poll_interval: Duration,
        deadline: Duration,
    ) -> Result<ExecutionState, JobExecutionError> {
        match tokio::time::timeout(deadline, self.poll_until_terminal(handle, poll_interval)).await {
            Ok(result) => result,
            Err(_) => Err(JobExecutionError::rejected(BackendError::Timeout {
                secs: deadline.as_secs(),
            })),
        }
    }

    async fn poll_until_terminal(
        &self,
        handle: &ExecutionHandle,
        poll_interval: Duration,
    ) -> Result<ExecutionState, JobExecutionError> {
        loop {
            let state = self.status(handle).await?;
            if state.is_terminal() {
                return Ok(state);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}
