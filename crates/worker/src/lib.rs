//! The job process.
//!
//! `single` mode renders the blueprint found in `CHOREO_BLUEPRINT` and
//! exits; the exit status reflects the outcome. `queue` mode claims rows
//! from `choreography_jobs` until shut down.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use choreo_core::blueprint::BLUEPRINT_ENV;
use choreo_core::config::{self, ConfigError};
use choreo_core::task::{MemoryTaskStore, TaskStatusStore};
use choreo_db::models::job::QueuedJob;
use choreo_db::{JobQueueRepo, PgTaskStore};
use choreo_pipeline::config::PipelineConfig;
use choreo_pipeline::{AssemblyOutput, JobError, JobRunner};

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "choreo_worker=info,choreo_pipeline=info,choreo_db=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    Single,
    Queue,
}

impl FromStr for WorkerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(Self::Single),
            "queue" => Ok(Self::Queue),
            other => Err(format!("unknown mode '{other}', expected single or queue")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}', expected text or json")),
        }
    }
}

/// Initialise the global subscriber: `RUST_LOG` filter, text or JSON lines.
pub fn init_tracing(format: LogFormat) {
    let json = format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

/// Worker settings loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub mode: WorkerMode,
    pub database_url: Option<String>,
    pub blueprint: Option<String>,
    pub worker_id: String,
    pub poll_interval: Duration,
    pub log_format: LogFormat,
    pub pipeline: PipelineConfig,
}

impl WorkerConfig {
    /// | Env Var                | Default            |
    /// |------------------------|--------------------|
    /// | `CHOREO_WORKER_MODE`   | `single`           |
    /// | `CHOREO_BLUEPRINT`     | required in single mode |
    /// | `DATABASE_URL`         | required in queue mode  |
    /// | `CHOREO_WORKER_ID`     | `worker-{pid}`     |
    /// | `CHOREO_QUEUE_POLL_MS` | `1000`             |
    /// | `LOG_FORMAT`           | `text`             |
    ///
    /// Pipeline variables are read by [`PipelineConfig::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&config::process_env)
    }

    pub fn from_lookup<L>(lookup: &L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mode = config::parse_or(lookup, "CHOREO_WORKER_MODE", WorkerMode::Single)?;
        let database_url = lookup("DATABASE_URL");
        let blueprint = lookup(BLUEPRINT_ENV);
        match mode {
            WorkerMode::Single if blueprint.is_none() => {
                return Err(ConfigError::Missing {
                    name: BLUEPRINT_ENV,
                })
            }
            WorkerMode::Queue if database_url.is_none() => {
                return Err(ConfigError::Missing { name: "DATABASE_URL" })
            }
            _ => {}
        }
        let poll_ms = config::require_positive(
            "CHOREO_QUEUE_POLL_MS",
            config::parse_or(lookup, "CHOREO_QUEUE_POLL_MS", 1000u64)?,
        )?;

        Ok(Self {
            mode,
            database_url,
            blueprint,
            worker_id: lookup("CHOREO_WORKER_ID")
                .unwrap_or_else(|| format!("worker-{}", std::process::id())),
            poll_interval: Duration::from_millis(poll_ms),
            log_format: config::parse_or(lookup, "LOG_FORMAT", LogFormat::Text)?,
            pipeline: PipelineConfig::from_lookup(lookup)?,
        })
    }
}

/// Task store for the configured database, or an in-memory one for
/// stand-alone single runs.
pub fn task_store(pool: Option<&PgPool>) -> Arc<dyn TaskStatusStore> {
    match pool {
        Some(pool) => Arc::new(PgTaskStore::new(pool.clone())),
        None => {
            tracing::warn!("DATABASE_URL not set, task status is kept in memory only");
            Arc::new(MemoryTaskStore::new())
        }
    }
}

/// Render one blueprint document.
pub async fn run_single(runner: &JobRunner, blueprint_json: &str) -> Result<AssemblyOutput, JobError> {
    runner.run_json(blueprint_json).await
}

/// Claim and run queued jobs until `cancel` fires. A job in progress is
/// finished before shutting down.
pub async fn run_queue(
    pool: PgPool,
    runner: Arc<JobRunner>,
    worker_id: String,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    tracing::info!(
        worker_id = %worker_id,
        poll_interval_ms = poll_interval.as_millis() as u64,
        "Queue worker started",
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(worker_id = %worker_id, "Queue worker shutting down");
                break;
            }
            _ = ticker.tick() => {
                // Drain everything queued before sleeping again.
                while !cancel.is_cancelled() {
                    match JobQueueRepo::claim_next(&pool, &worker_id).await {
                        Ok(Some(job)) => process_job(&pool, &runner, job).await,
                        Ok(None) => break,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to claim job");
                            break;
                        }
                    }
                }
            }
        }
    }
}

async fn process_job(pool: &PgPool, runner: &JobRunner, job: QueuedJob) {
    tracing::info!(job_id = %job.id, task_id = %job.task_id, "Job claimed");
    let outcome = match serde_json::to_string(&job.blueprint) {
        Ok(json) => runner.run_json(&json).await.map(|_| ()).map_err(|e| e.to_string()),
        Err(e) => Err(format!("stored blueprint does not serialise: {e}")),
    };

    let recorded = match &outcome {
        Ok(()) => JobQueueRepo::complete(pool, job.id).await,
        Err(error) => JobQueueRepo::fail(pool, job.id, error).await,
    };
    match recorded {
        Ok(true) => {}
        // Cancelled while running; the cancel already finished the row.
        Ok(false) => tracing::info!(job_id = %job.id, "Job row already finished"),
        Err(e) => tracing::error!(job_id = %job.id, error = %e, "Failed to finish job row"),
    }
}
