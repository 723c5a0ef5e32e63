//! Repository for the `choreography_jobs` queue table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::job::{
    EnqueueJob, QueuedJob, QUEUE_STATUS_CANCELLED, QUEUE_STATUS_CLAIMED, QUEUE_STATUS_COMPLETED,
    QUEUE_STATUS_FAILED, QUEUE_STATUS_QUEUED, TERMINAL_QUEUE_STATUSES,
};

/// Column list for `choreography_jobs` queries.
const COLUMNS: &str = "\
    id, task_id, user_id, blueprint, status, worker_id, error_message, \
    submitted_at, claimed_at, finished_at";

pub struct JobQueueRepo;

impl JobQueueRepo {
    /// Add a blueprint to the queue.
    pub async fn enqueue(pool: &PgPool, input: &EnqueueJob) -> Result<QueuedJob, sqlx::Error> {
        let query = format!(
            "INSERT INTO choreography_jobs (id, task_id, user_id, blueprint, status) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueuedJob>(&query)
            .bind(Uuid::now_v7())
            .bind(&input.task_id)
            .bind(&input.user_id)
            .bind(&input.blueprint)
            .bind(QUEUE_STATUS_QUEUED)
            .fetch_one(pool)
            .await
    }

    /// Atomically claim the oldest queued job for a worker.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent workers never
    /// claim the same row.
    pub async fn claim_next(pool: &PgPool, worker_id: &str) -> Result<Option<QueuedJob>, sqlx::Error> {
        let query = format!(
            "UPDATE choreography_jobs \
             SET worker_id = $1, claimed_at = NOW(), status = $2 \
             WHERE id = ( \
                 SELECT id FROM choreography_jobs \
                 WHERE status = $3 \
                 ORDER BY submitted_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueuedJob>(&query)
            .bind(worker_id)
            .bind(QUEUE_STATUS_CLAIMED)
            .bind(QUEUE_STATUS_QUEUED)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<QueuedJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM choreography_jobs WHERE id = $1");
        sqlx::query_as::<_, QueuedJob>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Mark a claimed job finished. Terminal rows are left alone.
    pub async fn complete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        Self::finish(pool, id, QUEUE_STATUS_COMPLETED, None).await
    }

    pub async fn fail(pool: &PgPool, id: Uuid, error: &str) -> Result<bool, sqlx::Error> {
        Self::finish(pool, id, QUEUE_STATUS_FAILED, Some(error)).await
    }

    /// Cancel a job if it is not already terminal.
    ///
    /// Returns `true` if the job was cancelled, `false` if it was already
    /// completed, failed or cancelled.
    pub async fn cancel(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        Self::finish(pool, id, QUEUE_STATUS_CANCELLED, None).await
    }

    async fn finish(
        pool: &PgPool,
        id: Uuid,
        status: &str,
        error: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE choreography_jobs \
             SET status = $2, error_message = COALESCE($3, error_message), finished_at = NOW() \
             WHERE id = $1 AND status NOT IN ($4, $5, $6)",
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .bind(TERMINAL_QUEUE_STATUSES[0])
        .bind(TERMINAL_QUEUE_STATUSES[1])
        .bind(TERMINAL_QUEUE_STATUSES[2])
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
