//! Choreography task status record and its store contract.
//!
//! A task moves `pending -> started -> running -> completed | failed`.
//! Terminal records are write-once: an update against a completed or
//! failed task is refused and nothing is written. Every store applies
//! updates through [`apply_update`] so the in-memory and PostgreSQL
//! implementations agree on clamping and terminal handling.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::CoreError;
use crate::types::{TaskId, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

pub const PROGRESS_MIN: i32 = 0;
pub const PROGRESS_MAX: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Started,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        Self::Pending,
        Self::Started,
        Self::Running,
        Self::Completed,
        Self::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "started" => Ok(Self::Started),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::Validation(format!(
                "Unknown task status '{other}'. Valid: pending, started, running, completed, failed"
            ))),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp a progress value into `[0, 100]`.
pub fn clamp_progress(progress: i32) -> i32 {
    progress.clamp(PROGRESS_MIN, PROGRESS_MAX)
}

// ---------------------------------------------------------------------------
// Record and update
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub user_id: String,
    pub status: TaskStatus,
    pub progress: i32,
    pub stage: Option<String>,
    pub message: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TaskRecord {
    pub fn new(task_id: impl Into<TaskId>, user_id: impl Into<String>, now: Timestamp) -> Self {
        Self {
            task_id: task_id.into(),
            user_id: user_id.into(),
            status: TaskStatus::Pending,
            progress: 0,
            stage: None,
            message: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<i32>,
    pub stage: Option<String>,
    pub message: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Progress report for a non-terminal stage.
    pub fn progress(status: TaskStatus, progress: i32, stage: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            progress: Some(progress),
            stage: Some(stage.into()),
            ..Self::default()
        }
    }

    pub fn completed(result: Value) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            progress: Some(PROGRESS_MAX),
            stage: Some("done".to_string()),
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            stage: Some("failed".to_string()),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Apply `update` to `record` in place.
///
/// Returns `false` (and leaves the record untouched) when the record is
/// already terminal. Progress is clamped.
pub fn apply_update(record: &mut TaskRecord, update: &TaskUpdate, now: Timestamp) -> bool {
    if record.status.is_terminal() {
        return false;
    }
    if let Some(status) = update.status {
        record.status = status;
    }
    if let Some(progress) = update.progress {
        record.progress = clamp_progress(progress);
    }
    if let Some(stage) = &update.stage {
        record.stage = Some(stage.clone());
    }
    if let Some(message) = &update.message {
        record.message = Some(message.clone());
    }
    if let Some(result) = &update.result {
        record.result = Some(result.clone());
    }
    if let Some(error) = &update.error {
        record.error = Some(error.clone());
    }
    record.updated_at = now;
    true
}

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Task '{0}' already exists")]
    Conflict(TaskId),

    #[error("Task store backend error: {0}")]
    Backend(String),
}

/// Durable status record per task. Implementations must apply each update
/// atomically.
#[async_trait]
pub trait TaskStatusStore: Send + Sync {
    /// Create a `pending` record. Fails with [`StoreError::Conflict`] when
    /// the id is taken.
    async fn create(&self, task_id: &str, user_id: &str) -> Result<TaskRecord, StoreError>;

    /// Apply a partial update. `Ok(false)` when the task is unknown or
    /// already terminal.
    async fn update(&self, task_id: &str, update: TaskUpdate) -> Result<bool, StoreError>;

    async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError>;
}

/// In-process store backed by a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    records: Mutex<HashMap<TaskId, TaskRecord>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStatusStore for MemoryTaskStore {
    async fn create(&self, task_id: &str, user_id: &str) -> Result<TaskRecord, StoreError> {
        let mut records = self.records.lock().await;
        if records.contains_key(task_id) {
            return Err(StoreError::Conflict(task_id.to_string()));
        }
        let record = TaskRecord::new(task_id, user_id, chrono::Utc::now());
        records.insert(task_id.to_string(), record.clone());
        Ok(record)
    }

    async fn update(&self, task_id: &str, update: TaskUpdate) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(task_id) else {
            return Ok(false);
        };
        Ok(apply_update(record, &update, chrono::Utc::now()))
    }

    async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.records.lock().await.get(task_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
