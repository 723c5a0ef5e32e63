//! Run one blueprint end to end and record the outcome.
//!
//! This is the job boundary: whatever goes wrong below it is turned into a
//! `failed` task update carrying the error's display string before the
//! error is handed back to the caller.

use std::sync::Arc;

use choreo_core::blueprint::{parse_and_validate, Blueprint, ValidationError};
use choreo_core::task::{StoreError, TaskStatus, TaskStatusStore, TaskUpdate};

use crate::assembler::{AssemblyOutput, VideoAssembler, VideoAssemblyError};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Assembly(#[from] VideoAssemblyError),

    #[error("task status store failed: {0}")]
    Store(#[from] StoreError),

    #[error("task '{task_id}' already finished as {}", status.as_str())]
    AlreadyFinished { task_id: String, status: TaskStatus },

    #[error("assembly output does not serialise: {0}")]
    Result(#[from] serde_json::Error),
}

pub struct JobRunner {
    assembler: Arc<VideoAssembler>,
    store: Arc<dyn TaskStatusStore>,
}

impl JobRunner {
    pub fn new(assembler: Arc<VideoAssembler>, store: Arc<dyn TaskStatusStore>) -> Self {
        Self { assembler, store }
    }

    /// Parse a blueprint document and run it.
    ///
    /// A document that fails validation is recorded as failed when it
    /// carries a task id.
    pub async fn run_json(&self, blueprint_json: &str) -> Result<AssemblyOutput, JobError> {
        match parse_and_validate(blueprint_json) {
            Ok(blueprint) => self.run(&blueprint).await,
            Err(e) => {
                match &e.task_id {
                    Some(task_id) => self.record_failure(task_id, &e.to_string()).await,
                    None => tracing::error!(error = %e, "Rejected blueprint without a task id"),
                }
                Err(e.into())
            }
        }
    }

    pub async fn run(&self, blueprint: &Blueprint) -> Result<AssemblyOutput, JobError> {
        let task_id = blueprint.task_id.as_str();
        let known = match self.store.get(task_id).await? {
            Some(record) if record.status.is_terminal() => {
                tracing::warn!(task_id, status = record.status.as_str(), "Task already finished, not rendering");
                return Err(JobError::AlreadyFinished {
                    task_id: task_id.to_string(),
                    status: record.status,
                });
            }
            Some(_) => true,
            None => false,
        };

        if !self
            .store
            .update(task_id, TaskUpdate::status(TaskStatus::Started))
            .await?
        {
            if known {
                // Finished between the read and the update.
                let status = self
                    .store
                    .get(task_id)
                    .await?
                    .map(|r| r.status)
                    .unwrap_or(TaskStatus::Completed);
                return Err(JobError::AlreadyFinished {
                    task_id: task_id.to_string(),
                    status,
                });
            }
            tracing::warn!(task_id, "Task unknown to the status store, running anyway");
        }

        match self.assembler.assemble(blueprint).await {
            Ok(output) => {
                let result = match serde_json::to_value(&output) {
                    Ok(result) => result,
                    Err(e) => {
                        let err = JobError::Result(e);
                        self.record_failure(task_id, &err.to_string()).await;
                        return Err(err);
                    }
                };
                self.store.update(task_id, TaskUpdate::completed(result)).await?;
                tracing::info!(task_id, output_url = %output.output_url, "Job completed");
                Ok(output)
            }
            Err(e) => {
                self.record_failure(task_id, &e.to_string()).await;
                Err(e.into())
            }
        }
    }

    async fn record_failure(&self, task_id: &str, error: &str) {
        tracing::error!(task_id, error, "Job failed");
        match self.store.update(task_id, TaskUpdate::failed(error)).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(task_id, "Failure not recorded, task unknown or finished"),
            Err(e) => tracing::error!(task_id, error = %e, "Failed to record job failure"),
        }
    }
}
