//! Repository for the `choreography_tasks` table.
//!
//! `update` is one conditional statement: each column is `COALESCE`d with
//! its bound value and the row only matches while it is non-terminal, so
//! concurrent writers never interleave partial values and terminal rows
//! stay write-once.

use async_trait::async_trait;
use sqlx::PgPool;

use choreo_core::task::{clamp_progress, StoreError, TaskRecord, TaskStatusStore, TaskUpdate};

use crate::models::task::TaskRow;

/// Column list for `choreography_tasks` queries.
const COLUMNS: &str = "\
    task_id, user_id, status, progress, stage, message, result, error, \
    created_at, updated_at";

/// Postgres unique-violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

pub struct TaskRepo;

impl TaskRepo {
    /// Insert a new `pending` row. Returns `None` if the id already exists.
    pub async fn create(
        pool: &PgPool,
        task_id: &str,
        user_id: &str,
    ) -> Result<Option<TaskRow>, sqlx::Error> {
        let query = format!(
            "INSERT INTO choreography_tasks (task_id, user_id) \
             VALUES ($1, $2) \
             ON CONFLICT (task_id) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(task_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, task_id: &str) -> Result<Option<TaskRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM choreography_tasks WHERE task_id = $1");
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(task_id)
            .fetch_optional(pool)
            .await
    }

    /// Apply a partial update to a non-terminal row.
    ///
    /// Returns `true` when a row was written, `false` when the task is
    /// unknown or already completed/failed.
    pub async fn update(
        pool: &PgPool,
        task_id: &str,
        update: &TaskUpdate,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE choreography_tasks SET \
                 status = COALESCE($2, status), \
                 progress = COALESCE($3, progress), \
                 stage = COALESCE($4, stage), \
                 message = COALESCE($5, message), \
                 result = COALESCE($6, result), \
                 error = COALESCE($7, error), \
                 updated_at = NOW() \
             WHERE task_id = $1 AND status NOT IN ('completed', 'failed')",
        )
        .bind(task_id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.progress.map(clamp_progress))
        .bind(update.stage.as_deref())
        .bind(update.message.as_deref())
        .bind(update.result.as_ref())
        .bind(update.error.as_deref())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// [`TaskStatusStore`] backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend_error(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl TaskStatusStore for PgTaskStore {
    async fn create(&self, task_id: &str, user_id: &str) -> Result<TaskRecord, StoreError> {
        let row = match TaskRepo::create(&self.pool, task_id, user_id).await {
            Ok(Some(row)) => row,
            Ok(None) => return Err(StoreError::Conflict(task_id.to_string())),
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                return Err(StoreError::Conflict(task_id.to_string()));
            }
            Err(e) => return Err(backend_error(e)),
        };
        TaskRecord::try_from(row).map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn update(&self, task_id: &str, update: TaskUpdate) -> Result<bool, StoreError> {
        let written = TaskRepo::update(&self.pool, task_id, &update)
            .await
            .map_err(backend_error)?;
        if !written {
            tracing::debug!(task_id, "Task update skipped (unknown or terminal)");
        }
        Ok(written)
    }

    async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let row = TaskRepo::find_by_id(&self.pool, task_id)
            .await
            .map_err(backend_error)?;
        row.map(TaskRecord::try_from)
            .transpose()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}
