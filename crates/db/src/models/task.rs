//! Row model for the `choreography_tasks` table.

use choreo_core::error::CoreError;
use choreo_core::task::{TaskRecord, TaskStatus};
use choreo_core::types::Timestamp;
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `choreography_tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TaskRow {
    pub task_id: String,
    pub user_id: String,
    pub status: String,
    pub progress: i32,
    pub stage: Option<String>,
    pub message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = CoreError;

    /// Rejects rows whose `status` is not a known state.
    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(TaskRecord {
            status: row.status.parse::<TaskStatus>()?,
            task_id: row.task_id,
            user_id: row.user_id,
            progress: row.progress,
            stage: row.stage,
            message: row.message,
            result: row.result,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
