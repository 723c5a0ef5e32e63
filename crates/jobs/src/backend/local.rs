//! In-process backend: each job is a tokio task running the pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use choreo_pipeline::JobRunner;

use super::{
    finished_overflow, BackendError, BackendKind, ExecutionState, JobBackend, JobSpec,
    FINISHED_RETENTION,
};

struct LocalJob {
    seq: u64,
    cancel: CancellationToken,
    state: Arc<Mutex<ExecutionState>>,
}

#[derive(Default)]
struct Jobs {
    next_seq: u64,
    by_id: HashMap<String, LocalJob>,
}

pub struct LocalBackend {
    runner: Arc<JobRunner>,
    jobs: Mutex<Jobs>,
    retention: usize,
}

impl LocalBackend {
    pub fn new(runner: Arc<JobRunner>) -> Self {
        Self {
            runner,
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

impl Jobs {
    /// Drop the oldest finished jobs beyond `retention`. Running jobs stay.
    async fn prune(&mut self, retention: usize) {
        let mut finished = Vec::new();
        for (id, job) in &self.by_id {
            if job.state.lock().await.is_terminal() {
                finished.push((job.seq, id.clone()));
            }
        }
        for id in finished_overflow(finished, retention) {
            self.by_id.remove(&id);
            tracing::debug!(task_id = %id, "Dropped finished local job");
        }
    }
}

#[async_trait]
impl JobBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn submit(&self, job: &JobSpec) -> Result<String, BackendError> {
        let mut jobs = self.jobs.lock().await;
        if jobs.by_id.contains_key(&job.task_id) {
            return Err(BackendError::Invalid(format!(
                "task '{}' was already submitted",
                job.task_id
            )));
        }

        let cancel = CancellationToken::new();
        let state = Arc::new(Mutex::new(ExecutionState::Running));
        let runner = self.runner.clone();
        let blueprint = job.blueprint.clone();
        let task_id = job.task_id.clone();

        tokio::spawn({
            let cancel = cancel.clone();
            let state = state.clone();
            async move {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => ExecutionState::Cancelled,
                    result = runner.run(&blueprint) => match result {
                        Ok(_) => ExecutionState::Succeeded,
                        Err(e) => ExecutionState::Failed { error: e.to_string() },
                    },
                };
                tracing::info!(task_id = %task_id, outcome = ?outcome, "Local job finished");
                let mut state = state.lock().await;
                // A cancel that raced the finish keeps its Cancelled state.
                if !state.is_terminal() {
                    *state = outcome;
                }
            }
        });

        let seq = jobs.next_seq;
        jobs.next_seq += 1;
        jobs.by_id.insert(job.task_id.clone(), LocalJob { seq, cancel, state });
        jobs.prune(self.retention).await;
        Ok(job.task_id.clone())
    }

    async fn poll(&self, external_id: &str) -> Result<ExecutionState, BackendError> {
        let state = {
            let jobs = self.jobs.lock().await;
            let job = jobs
                .by_id
                .get(external_id)
                .ok_or_else(|| BackendError::NotFound(external_id.to_string()))?;
            job.state.clone()
        };
        let current = state.lock().await.clone();
        Ok(current)
    }

    async fn cancel(&self, external_id: &str) -> Result<bool, BackendError> {
        let jobs = self.jobs.lock().await;
        let job = jobs
            .by_id
            .get(external_id)
            .ok_or_else(|| BackendError::NotFound(external_id.to_string()))?;

        let mut state = job.state.lock().await;
        if state.is_terminal() {
            return Ok(false);
        }
        // Mark first so a poll right after cancel never reports Running.
        *state = ExecutionState::Cancelled;
        job.cancel.cancel();
        Ok(true)
    }
}
