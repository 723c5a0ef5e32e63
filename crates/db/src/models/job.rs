//! Row model for the `choreography_jobs` queue table.

use choreo_core::types::Timestamp;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

pub const QUEUE_STATUS_QUEUED: &str = "queued";
pub const QUEUE_STATUS_CLAIMED: &str = "claimed";
pub const QUEUE_STATUS_COMPLETED: &str = "completed";
pub const QUEUE_STATUS_FAILED: &str = "failed";
pub const QUEUE_STATUS_CANCELLED: &str = "cancelled";

/// Statuses after which a queue row is never touched again.
pub const TERMINAL_QUEUE_STATUSES: [&str; 3] = [
    QUEUE_STATUS_COMPLETED,
    QUEUE_STATUS_FAILED,
    QUEUE_STATUS_CANCELLED,
];

/// A row from the `choreography_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QueuedJob {
    pub id: Uuid,
    pub task_id: String,
    pub user_id: String,
    /// Blueprint document as submitted.
    pub blueprint: serde_json::Value,
    pub status: String,
    pub worker_id: Option<String>,
    pub error_message: Option<String>,
    pub submitted_at: Timestamp,
    pub claimed_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

/// DTO for enqueueing a blueprint.
#[derive(Debug, Clone)]
pub struct EnqueueJob {
    pub task_id: String,
    pub user_id: String,
    pub blueprint: serde_json::Value,
}
