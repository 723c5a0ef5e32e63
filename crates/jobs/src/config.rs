//! Executor configuration and the backend factory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use choreo_core::config::{self, ConfigError};
use choreo_core::retry::RetryPolicy;
use choreo_core::task::TaskStatusStore;
use choreo_pipeline::JobRunner;

use crate::backend::{
    BackendKind, ContainerBackend, ContainerSettings, JobBackend, LocalBackend, ProcessBackend,
    QueueBackend,
};
use crate::executor::JobExecutor;

#[derive(Debug, Clone, PartialEq)]
pub enum BackendConfig {
    Local,
    Process { worker_bin: PathBuf },
    Queue,
    Container(ContainerSettings),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Local => BackendKind::Local,
            Self::Process { .. } => BackendKind::Process,
            Self::Queue => BackendKind::Queue,
            Self::Container(_) => BackendKind::Container,
        }
    }

    /// Construct the configured backend. `local` needs a pipeline runner
    /// and `queue` a database pool.
    pub fn build(
        &self,
        deps: &BackendDeps,
    ) -> Result<Arc<dyn JobBackend>, ConfigError> {
        Ok(match self {
            Self::Local => {
                let runner = deps.runner.clone().ok_or(ConfigError::Missing {
                    name: "local pipeline runner",
                })?;
                Arc::new(LocalBackend::new(runner))
            }
            Self::Process { worker_bin } => Arc::new(ProcessBackend::new(worker_bin.clone())),
            Self::Queue => {
                let pool = deps
                    .pool
                    .clone()
                    .ok_or(ConfigError::Missing { name: "DATABASE_URL" })?;
                Arc::new(QueueBackend::new(pool))
            }
            Self::Container(settings) => Arc::new(ContainerBackend::new(settings.clone())),
        })
    }
}

/// Runtime dependencies some backends need.
#[derive(Default, Clone)]
pub struct BackendDeps {
    pub pool: Option<PgPool>,
    pub runner: Option<Arc<JobRunner>>,
}

/// Executor settings loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    pub backend: BackendConfig,
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
}

impl ExecutorConfig {
    /// | Env Var                         | Default         |
    /// |---------------------------------|-----------------|
    /// | `CHOREO_JOB_BACKEND`            | `local`         |
    /// | `CHOREO_JOB_MAX_ATTEMPTS`       | `3`             |
    /// | `CHOREO_JOB_RETRY_BASE_MS`      | `500`           |
    /// | `CHOREO_JOB_RETRY_MULTIPLIER`   | `2.0`           |
    /// | `CHOREO_JOB_RETRY_MAX_DELAY_MS` | `30000`         |
    /// | `CHOREO_JOB_CALL_TIMEOUT_SECS`  | `30`            |
    /// | `CHOREO_WORKER_BIN`             | `choreo-worker` |
    /// | `CHOREO_CONTAINER_RUNTIME`      | `docker`        |
    /// | `CHOREO_CONTAINER_IMAGE`        | required for `container` |
    /// | `CHOREO_CONTAINER_ARGS`         | unset (space separated) |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&config::process_env)
    }

    pub fn from_lookup<L>(lookup: &L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let kind: BackendKind = config::parse_or(lookup, "CHOREO_JOB_BACKEND", BackendKind::Local)?;
        let backend = match kind {
            BackendKind::Local => BackendConfig::Local,
            BackendKind::Process => BackendConfig::Process {
                worker_bin: config::string_or(lookup, "CHOREO_WORKER_BIN", "choreo-worker").into(),
            },
            BackendKind::Queue => BackendConfig::Queue,
            BackendKind::Container => BackendConfig::Container(ContainerSettings {
                runtime: config::string_or(lookup, "CHOREO_CONTAINER_RUNTIME", "docker").into(),
                image: config::require(lookup, "CHOREO_CONTAINER_IMAGE")?,
                run_args: lookup("CHOREO_CONTAINER_ARGS")
                    .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default(),
            }),
        };

        let multiplier: f64 = config::parse_or(lookup, "CHOREO_JOB_RETRY_MULTIPLIER", 2.0)?;
        if !(multiplier >= 1.0) {
            return Err(ConfigError::Invalid {
                name: "CHOREO_JOB_RETRY_MULTIPLIER",
                value: multiplier.to_string(),
                reason: "must be at least 1.0".to_string(),
            });
        }
        let retry = RetryPolicy {
            max_attempts: config::require_positive(
                "CHOREO_JOB_MAX_ATTEMPTS",
                config::parse_or(lookup, "CHOREO_JOB_MAX_ATTEMPTS", 3u32)?,
            )?,
            base_delay: Duration::from_millis(config::parse_or(
                lookup,
                "CHOREO_JOB_RETRY_BASE_MS",
                500u64,
            )?),
            multiplier,
            max_delay: Duration::from_millis(config::parse_or(
                lookup,
                "CHOREO_JOB_RETRY_MAX_DELAY_MS",
                30_000u64,
            )?),
        };
        let call_timeout = config::require_positive(
            "CHOREO_JOB_CALL_TIMEOUT_SECS",
            config::parse_or(lookup, "CHOREO_JOB_CALL_TIMEOUT_SECS", 30u64)?,
        )?;

        Ok(Self {
            backend,
            retry,
            call_timeout: Duration::from_secs(call_timeout),
        })
    }

    /// Build the backend and wrap it in an executor recording into `store`.
    pub fn build_executor(
        &self,
        deps: &BackendDeps,
        store: Arc<dyn TaskStatusStore>,
    ) -> Result<JobExecutor, ConfigError> {
        let backend = self.backend.build(deps)?;
        tracing::info!(backend = %backend.kind(), "Job executor configured");
        Ok(JobExecutor::new(backend, store, self.retry, self.call_timeout))
    }
}
