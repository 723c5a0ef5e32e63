//! Render a blueprint into a finished video.
//!
//! Stages run in order: fetch every input into a scratch directory, build
//! the encode plan (trim, join, mux), run the encoder once, check the
//! result's duration, upload. The scratch directory is a
//! [`tempfile::TempDir`], so it is removed on every exit path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use choreo_core::blueprint::{Blueprint, ValidationError, CROSSFADE_SECONDS};
use choreo_core::config::{self, ConfigError};
use choreo_core::retry::RetryPolicy;
use choreo_core::task::{TaskStatus, TaskStatusStore, TaskUpdate};

use crate::ffmpeg::{EncodePlan, Encoder, FfmpegError};
use crate::storage::{MediaStorage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum VideoAssemblyError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("required media file is missing: {path}")]
    MissingMedia { path: String },

    #[error("failed to fetch {path} after {attempts} attempt(s): {source}")]
    Fetch {
        path: String,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("encoding failed: {0}")]
    Encode(#[source] FfmpegError),

    #[error("encoded video lasts {actual:.3}s, expected {expected:.3}s")]
    DurationMismatch { expected: f64, actual: f64 },

    #[error("failed to upload {path} after {attempts} attempt(s): {source}")]
    Upload {
        path: String,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("failed to prepare working directory: {0}")]
    Workdir(#[source] std::io::Error),
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyStage {
    Fetching,
    Trimming,
    Concatenating,
    MuxingAudio,
    Uploading,
    Done,
    Failed,
}

impl AssemblyStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::Trimming => "trimming",
            Self::Concatenating => "concatenating",
            Self::MuxingAudio => "muxing_audio",
            Self::Uploading => "uploading",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Task progress reported on entering the stage.
    pub fn progress(self) -> Option<i32> {
        match self {
            Self::Fetching => Some(10),
            Self::Trimming => Some(35),
            Self::Concatenating => Some(45),
            Self::MuxingAudio => Some(55),
            Self::Uploading => Some(85),
            Self::Done => Some(100),
            Self::Failed => None,
        }
    }
}

impl std::fmt::Display for AssemblyStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a finished render produced. Serialised into the task's `result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyOutput {
    pub output_url: String,
    pub output_path: String,
    pub duration_seconds: f64,
    pub move_count: usize,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AssemblerConfig {
    /// Parallel fetches.
    pub fetch_concurrency: usize,
    /// Bound on each fetch attempt. A timeout counts as transient.
    pub fetch_timeout: Duration,
    pub fetch_retry: RetryPolicy,
    /// Bound on each upload attempt of the rendered video. A timeout
    /// counts as transient and shares `fetch_retry`.
    pub upload_timeout: Duration,
    /// Parent for scratch directories; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: 4,
            fetch_timeout: Duration::from_secs(60),
            fetch_retry: RetryPolicy::default(),
            upload_timeout: Duration::from_secs(300),
            scratch_dir: None,
        }
    }
}

impl AssemblerConfig {
    /// | Env Var                      | Default |
    /// |------------------------------|---------|
    /// | `CHOREO_FETCH_CONCURRENCY`   | `4`     |
    /// | `CHOREO_FETCH_TIMEOUT_SECS`  | `60`    |
    /// | `CHOREO_UPLOAD_TIMEOUT_SECS` | `300`   |
    /// | `CHOREO_SCRATCH_DIR`         | unset   |
    pub fn from_lookup<L>(lookup: &L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let concurrency = config::parse_or(lookup, "CHOREO_FETCH_CONCURRENCY", 4usize)?;
        let timeout = config::parse_or(lookup, "CHOREO_FETCH_TIMEOUT_SECS", 60u64)?;
        let upload_timeout = config::parse_or(lookup, "CHOREO_UPLOAD_TIMEOUT_SECS", 300u64)?;
        Ok(Self {
            fetch_concurrency: config::require_positive("CHOREO_FETCH_CONCURRENCY", concurrency)?,
            fetch_timeout: Duration::from_secs(config::require_positive(
                "CHOREO_FETCH_TIMEOUT_SECS",
                timeout,
            )?),
            fetch_retry: RetryPolicy::default(),
            upload_timeout: Duration::from_secs(config::require_positive(
                "CHOREO_UPLOAD_TIMEOUT_SECS",
                upload_timeout,
            )?),
            scratch_dir: lookup("CHOREO_SCRATCH_DIR").map(PathBuf::from),
        })
    }
}

// ---------------------------------------------------------------------------
// Assembler
// ---------------------------------------------------------------------------

pub struct VideoAssembler {
    storage: Arc<dyn MediaStorage>,
    encoder: Arc<dyn Encoder>,
    config: AssemblerConfig,
    status: Option<Arc<dyn TaskStatusStore>>,
}

impl VideoAssembler {
    pub fn new(
        storage: Arc<dyn MediaStorage>,
        encoder: Arc<dyn Encoder>,
        config: AssemblerConfig,
    ) -> Self {
        Self {
            storage,
            encoder,
            config,
            status: None,
        }
    }

    /// Report stage progress to `store` under the blueprint's task id.
    pub fn with_status_store(mut self, store: Arc<dyn TaskStatusStore>) -> Self {
        self.status = Some(store);
        self
    }

    /// Render `blueprint` and upload it to its `output_path`.
    pub async fn assemble(&self, blueprint: &Blueprint) -> Result<AssemblyOutput, VideoAssemblyError> {
        blueprint.validate()?;
        let task_id = blueprint.task_id.as_str();

        let workdir = self.scratch_dir().map_err(VideoAssemblyError::Workdir)?;
        tracing::info!(
            task_id,
            moves = blueprint.moves.len(),
            workdir = %workdir.path().display(),
            "Assembly started",
        );

        // Fetch
        self.report(task_id, AssemblyStage::Fetching).await;
        let locals = fetch_plan(blueprint, workdir.path());
        self.fetch_all(&locals).await?;

        // Trim + concatenate + mux are one filter graph, reported as the
        // plan is assembled.
        self.report(task_id, AssemblyStage::Trimming).await;
        let audio = locals
            .get(&blueprint.audio_path)
            .cloned()
            .ok_or_else(|| VideoAssemblyError::MissingMedia {
                path: blueprint.audio_path.clone(),
            })?;
        let output_file = workdir
            .path()
            .join(format!("output.{}", blueprint.output_config.format));
        let plan = EncodePlan::from_blueprint(blueprint, audio, output_file.clone(), |p| {
            locals.get(p).cloned()
        })
        .map_err(VideoAssemblyError::Encode)?;

        self.report(task_id, AssemblyStage::Concatenating).await;
        self.report(task_id, AssemblyStage::MuxingAudio).await;
        let started = std::time::Instant::now();
        self.encoder
            .encode(&plan)
            .await
            .map_err(VideoAssemblyError::Encode)?;

        let actual = self
            .encoder
            .probe_duration(&output_file)
            .await
            .map_err(VideoAssemblyError::Encode)?;
        if (actual - blueprint.total_duration).abs() > CROSSFADE_SECONDS {
            return Err(VideoAssemblyError::DurationMismatch {
                expected: blueprint.total_duration,
                actual,
            });
        }
        tracing::info!(
            task_id,
            duration_secs = actual,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Encode finished",
        );

        // Upload
        self.report(task_id, AssemblyStage::Uploading).await;
        let output_path = blueprint.output_config.output_path.clone();
        let output_url = self.upload(&output_file, &output_path).await?;

        tracing::info!(task_id, output_url = %output_url, "Assembly finished");
        Ok(AssemblyOutput {
            output_url,
            output_path,
            duration_seconds: actual,
            move_count: blueprint.moves.len(),
        })
    }

    fn scratch_dir(&self) -> std::io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("choreo-assembly-");
        match &self.config.scratch_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
    }

    async fn report(&self, task_id: &str, stage: AssemblyStage) {
        let (Some(store), Some(progress)) = (&self.status, stage.progress()) else {
            return;
        };
        let update = TaskUpdate::progress(TaskStatus::Running, progress, stage.as_str());
        match store.update(task_id, update).await {
            Ok(true) => tracing::debug!(task_id, stage = %stage, progress, "Stage reported"),
            Ok(false) => tracing::warn!(task_id, stage = %stage, "Stage not recorded, task unknown or finished"),
            Err(e) => tracing::warn!(task_id, stage = %stage, error = %e, "Failed to report stage"),
        }
    }

    /// Fetch every input with at most `fetch_concurrency` in flight. The
    /// first fatal failure cancels the rest.
    async fn fetch_all(&self, locals: &HashMap<String, PathBuf>) -> Result<(), VideoAssemblyError> {
        let fetches: Vec<_> = locals.iter().map(|(key, dest)| self.fetch_one(key, dest)).collect();
        futures::stream::iter(fetches)
            .buffer_unordered(self.config.fetch_concurrency.max(1))
            .try_collect::<Vec<()>>()
            .await?;
        Ok(())
    }

    async fn fetch_one(&self, key: &str, dest: &Path) -> Result<(), VideoAssemblyError> {
        let storage = &self.storage;
        let timeout = self.config.fetch_timeout;
        let result = self
            .config
            .fetch_retry
            .run(
                |_attempt| async move {
                    match tokio::time::timeout(timeout, storage.fetch(key, dest)).await {
                        Ok(result) => result,
                        Err(_) => Err(StorageError::Transient {
                            key: key.to_string(),
                            message: format!("fetch timed out after {}s", timeout.as_secs()),
                        }),
                    }
                },
                StorageError::is_transient,
            )
            .await;

        match result {
            Ok(((), attempts)) => {
                tracing::debug!(key, attempts, "Fetched input");
                Ok(())
            }
            Err(exhausted) => Err(match exhausted.last_error {
                StorageError::NotFound { key } => VideoAssemblyError::MissingMedia { path: key },
                source => VideoAssemblyError::Fetch {
                    path: key.to_string(),
                    attempts: exhausted.attempts,
                    source,
                },
            }),
        }
    }

    async fn upload(&self, file: &Path, key: &str) -> Result<String, VideoAssemblyError> {
        let storage = &self.storage;
        let timeout = self.config.upload_timeout;
        self.config
            .fetch_retry
            .run(
                |_attempt| async move {
                    match tokio::time::timeout(timeout, storage.upload(file, key)).await {
                        Ok(result) => result,
                        Err(_) => Err(StorageError::Transient {
                            key: key.to_string(),
                            message: format!("upload timed out after {}s", timeout.as_secs()),
                        }),
                    }
                },
                StorageError::is_transient,
            )
            .await
            .map(|(url, attempts)| {
                tracing::debug!(key, attempts, "Uploaded output");
                url
            })
            .map_err(|exhausted| VideoAssemblyError::Upload {
                path: key.to_string(),
                attempts: exhausted.attempts,
                source: exhausted.last_error,
            })
    }
}

/// Local destination for every distinct input: the audio track plus each
/// unique clip, numbered in first-use order and keeping their extensions.
fn fetch_plan(blueprint: &Blueprint, workdir: &Path) -> HashMap<String, PathBuf> {
    let mut locals = HashMap::new();
    let keys = std::iter::once(blueprint.audio_path.as_str())
        .chain(blueprint.moves.iter().map(|m| m.media_path.as_str()));
    for key in keys {
        if locals.contains_key(key) {
            continue;
        }
        let name = match Path::new(key).extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("input_{:03}.{ext}", locals.len()),
            None => format!("input_{:03}", locals.len()),
        };
        locals.insert(key.to_string(), workdir.join(name));
    }
    locals
}
