//! PostgreSQL queue backend. Jobs are rows in `choreography_jobs`; queue
//! workers claim them with `FOR UPDATE SKIP LOCKED`.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use choreo_db::models::job::{
    EnqueueJob, QueuedJob, QUEUE_STATUS_CANCELLED, QUEUE_STATUS_CLAIMED, QUEUE_STATUS_COMPLETED,
    QUEUE_STATUS_FAILED, QUEUE_STATUS_QUEUED,
};
use choreo_db::JobQueueRepo;

use super::{BackendError, BackendKind, ExecutionState, JobBackend, JobSpec};

pub struct QueueBackend {
    pool: PgPool,
}

impl QueueBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Map a sqlx failure onto the retry classification.
pub(crate) fn classify_sqlx(e: sqlx::Error) -> BackendError {
    match e {
        sqlx::Error::PoolTimedOut => BackendError::Timeout { secs: 0 },
        sqlx::Error::Io(io) => BackendError::Connection(io.to_string()),
        sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            BackendError::Unavailable(e.to_string())
        }
        sqlx::Error::RowNotFound => BackendError::NotFound(e.to_string()),
        sqlx::Error::Tls(_) | sqlx::Error::Configuration(_) => {
            BackendError::Unauthorized(e.to_string())
        }
        other => BackendError::Invalid(other.to_string()),
    }
}

/// Queue row status to execution state.
pub(crate) fn queue_state(job: &QueuedJob) -> ExecutionState {
    match job.status.as_str() {
        QUEUE_STATUS_QUEUED => ExecutionState::Queued,
        QUEUE_STATUS_CLAIMED => ExecutionState::Running,
        QUEUE_STATUS_COMPLETED => ExecutionState::Succeeded,
        QUEUE_STATUS_CANCELLED => ExecutionState::Cancelled,
        QUEUE_STATUS_FAILED => ExecutionState::Failed {
            error: job
                .error_message
                .clone()
                .unwrap_or_else(|| "job failed".to_string()),
        },
        other => ExecutionState::Failed {
            error: format!("unknown queue status '{other}'"),
        },
    }
}

fn parse_id(external_id: &str) -> Result<Uuid, BackendError> {
    Uuid::parse_str(external_id)
        .map_err(|e| BackendError::Invalid(format!("'{external_id}' is not a queue job id: {e}")))
}

#[async_trait]
impl JobBackend for QueueBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Queue
    }

    async fn submit(&self, job: &JobSpec) -> Result<String, BackendError> {
        let blueprint = serde_json::to_value(&job.blueprint)
            .map_err(|e| BackendError::Invalid(format!("blueprint does not serialise: {e}")))?;
        let queued = JobQueueRepo::enqueue(
            &self.pool,
            &EnqueueJob {
                task_id: job.task_id.clone(),
                user_id: job.user_id.clone(),
                blueprint,
            },
        )
        .await
        .map_err(classify_sqlx)?;

        tracing::info!(task_id = %job.task_id, job_id = %queued.id, "Job enqueued");
        Ok(queued.id.to_string())
    }

    async fn poll(&self, external_id: &str) -> Result<ExecutionState, BackendError> {
        let id = parse_id(external_id)?;
        let job = JobQueueRepo::find_by_id(&self.pool, id)
            .await
            .map_err(classify_sqlx)?
            .ok_or_else(|| BackendError::NotFound(external_id.to_string()))?;
        Ok(queue_state(&job))
    }

    async fn cancel(&self, external_id: &str) -> Result<bool, BackendError> {
        let id = parse_id(external_id)?;
        JobQueueRepo::cancel(&self.pool, id)
            .await
            .map_err(classify_sqlx)
    }
}
