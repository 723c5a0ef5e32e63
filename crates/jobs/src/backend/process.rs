//! Subprocess backend: one worker process per job, blueprint passed in the
//! environment.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::{
    finished_overflow, BackendError, BackendKind, ExecutionState, JobBackend, JobSpec,
    BLUEPRINT_ENV, FINISHED_RETENTION,
};

enum ProcessJob {
    Running(Child),
    Finished(ExecutionState),
}

struct Tracked {
    seq: u64,
    job: ProcessJob,
}

#[derive(Default)]
struct Jobs {
    next_seq: u64,
    by_id: HashMap<String, Tracked>,
}

impl Jobs {
    /// Reap exited workers, then drop the oldest finished jobs beyond
    /// `retention`.
    fn prune(&mut self, retention: usize) {
        let mut finished = Vec::new();
        for (id, tracked) in self.by_id.iter_mut() {
            if let ProcessJob::Running(child) = &mut tracked.job {
                match child.try_wait() {
                    Ok(Some(status)) => tracked.job = ProcessJob::Finished(exit_state(status)),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(task_id = %id, error = %e, "Failed to poll worker"),
                }
            }
            if matches!(tracked.job, ProcessJob::Finished(_)) {
                finished.push((tracked.seq, id.clone()));
            }
        }
        for id in finished_overflow(finished, retention) {
            self.by_id.remove(&id);
            tracing::debug!(task_id = %id, "Dropped finished worker process");
        }
    }
}

pub struct ProcessBackend {
    worker_bin: PathBuf,
    jobs: Mutex<Jobs>,
    retention: usize,
}

impl ProcessBackend {
    pub fn new(worker_bin: impl Into<PathBuf>) -> Self {
        Self {
            worker_bin: worker_bin.into(),
            jobs: Mutex::new(Jobs::default()),
            retention: FINISHED_RETENTION,
        }
    }

    /// Keep at most `retention` finished jobs around for polling.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }
}

fn exit_state(status: std::process::ExitStatus) -> ExecutionState {
    if status.success() {
        ExecutionState::Succeeded
    } else {
        ExecutionState::Failed {
            error: match status.code() {
                Some(code) => format!("worker exited with code {code}"),
                None => "worker terminated by signal".to_string(),
            },
        }
    }
}

#[async_trait]
impl JobBackend for ProcessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Process
    }

    async fn submit(&self, job: &JobSpec) -> Result<String, BackendError> {
        let blueprint = job.blueprint_json()?;
        let mut jobs = self.jobs.lock().await;
        if jobs.by_id.contains_key(&job.task_id) {
            return Err(BackendError::Invalid(format!(
                "task '{}' was already submitted",
                job.task_id
            )));
        }

        // The worker inherits the rest of the environment (database,
        // storage settings).
        let child = Command::new(&self.worker_bin)
            .env(BLUEPRINT_ENV, blueprint)
            .env("CHOREO_WORKER_MODE", "single")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::from_io("failed to spawn worker", &e))?;

        tracing::info!(
            task_id = %job.task_id,
            pid = child.id(),
            worker = %self.worker_bin.display(),
            "Worker process started",
        );
        let seq = jobs.next_seq;
        jobs.next_seq += 1;
        jobs.by_id.insert(
            job.task_id.clone(),
            Tracked {
                seq,
                job: ProcessJob::Running(child),
            },
        );
        jobs.prune(self.retention);
        Ok(job.task_id.clone())
    }

    async fn poll(&self, external_id: &str) -> Result<ExecutionState, BackendError> {
        let mut jobs = self.jobs.lock().await;
        let job = &mut jobs
            .by_id
            .get_mut(external_id)
            .ok_or_else(|| BackendError::NotFound(external_id.to_string()))?
            .job;

        match job {
            ProcessJob::Finished(state) => Ok(state.clone()),
            ProcessJob::Running(child) => match child
                .try_wait()
                .map_err(|e| BackendError::from_io("failed to poll worker", &e))?
            {
                None => Ok(ExecutionState::Running),
                Some(status) => {
                    let state = exit_state(status);
                    *job = ProcessJob::Finished(state.clone());
                    Ok(state)
                }
            },
        }
    }

    async fn cancel(&self, external_id: &str) -> Result<bool, BackendError> {
        let mut jobs = self.jobs.lock().await;
        let job = &mut jobs
            .by_id
            .get_mut(external_id)
            .ok_or_else(|| BackendError::NotFound(external_id.to_string()))?
            .job;

        let ProcessJob::Running(child) = job else {
            return Ok(false);
        };
        if let Some(status) = child
            .try_wait()
            .map_err(|e| BackendError::from_io("failed to poll worker", &e))?
        {
            *job = ProcessJob::Finished(exit_state(status));
            return Ok(false);
        }

        child
            .kill()
            .await
            .map_err(|e| BackendError::from_io("failed to kill worker", &e))?;
        tracing::info!(task_id = external_id, "Worker process killed");
        *job = ProcessJob::Finished(ExecutionState::Cancelled);
        Ok(true)
    }
}
