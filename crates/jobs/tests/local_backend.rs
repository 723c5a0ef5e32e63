//! The executor driving the in-process backend against the real pipeline,
//! with a stubbed encoder.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use choreo_core::blueprint::{Blueprint, BlueprintMove, OutputConfig, TransitionType};
use choreo_core::paths::MediaRoot;
use choreo_core::retry::RetryPolicy;
use choreo_core::task::{MemoryTaskStore, TaskStatus, TaskStatusStore};
use choreo_jobs::backend::LocalBackend;
use choreo_jobs::executor::CANCELLED_MESSAGE;
use choreo_jobs::{BackendConfig, BackendDeps, BackendError, ExecutionState, JobBackend, JobExecutor, JobSpec};
use choreo_pipeline::assembler::AssemblerConfig;
use choreo_pipeline::ffmpeg::{EncodePlan, Encoder, FfmpegError};
use choreo_pipeline::storage::LocalStorage;
use choreo_pipeline::{JobRunner, VideoAssembler};

struct StubEncoder {
    hang: bool,
}

#[async_trait]
impl Encoder for StubEncoder {
    async fn encode(&self, plan: &EncodePlan) -> Result<(), FfmpegError> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        tokio::fs::write(&plan.output, b"mp4").await?;
        Ok(())
    }

    async fn probe_duration(&self, _: &Path) -> Result<f64, FfmpegError> {
        Ok(7.5)
    }
}

fn blueprint(task_id: &str) -> Blueprint {
    let mv = |clip: &str, start: f64, duration: f64, transition| BlueprintMove {
        clip_id: clip.into(),
        media_path: format!("clips/{clip}.mp4"),
        start_time: start,
        duration,
        transition_type: transition,
    };
    Blueprint {
        task_id: task_id.into(),
        audio_path: "music/song.wav".into(),
        moves: vec![
            mv("a", 0.0, 4.0, TransitionType::Cut),
            mv("b", 3.5, 4.0, TransitionType::Crossfade),
        ],
        total_duration: 7.5,
        generation_parameters: serde_json::json!({"tempo_bpm": 120.0}),
        output_config: OutputConfig::with_path(format!("renders/{task_id}.mp4")),
    }
}

fn media_root() -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    for file in ["music/song.wav", "clips/a.mp4", "clips/b.mp4"] {
        let path = root.path().join(file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, file).unwrap();
    }
    root
}

fn runner(root: &Path, store: Arc<MemoryTaskStore>, hang: bool) -> Arc<JobRunner> {
    let storage = Arc::new(LocalStorage::new(MediaRoot::new(root), None));
    let assembler = VideoAssembler::new(storage, Arc::new(StubEncoder { hang }), AssemblerConfig::default())
        .with_status_store(store.clone());
    Arc::new(JobRunner::new(Arc::new(assembler), store))
}

fn setup(hang: bool) -> (tempfile::TempDir, Arc<MemoryTaskStore>, JobExecutor) {
    let root = media_root();
    let store = Arc::new(MemoryTaskStore::new());
    let runner = runner(root.path(), store.clone(), hang);

    let deps = BackendDeps {
        pool: None,
        runner: Some(runner),
    };
    let backend = BackendConfig::Local.build(&deps).unwrap();
    let executor = JobExecutor::new(backend, store.clone(), RetryPolicy::default(), Duration::from_secs(5));
    (root, store, executor)
}

#[tokio::test]
async fn local_job_runs_to_completion() {
    let (root, store, executor) = setup(false);
    let handle = executor.submit("t-ok", "dancer-1", blueprint("t-ok")).await.unwrap();

    let state = executor
        .wait(&handle, Duration::from_millis(10), Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(state, ExecutionState::Succeeded);

    let record = store.get("t-ok").await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(record.user_id, "dancer-1");
    assert_eq!(record.result.unwrap()["move_count"], 2);
    assert!(root.path().join("renders/t-ok.mp4").exists());

    assert!(!executor.cancel(&handle).await.unwrap(), "finished jobs cannot be cancelled");
}

#[tokio::test]
async fn cancelling_a_running_local_job() {
    let (_root, store, executor) = setup(true);
    let handle = executor.submit("t-stop", "u", blueprint("t-stop")).await.unwrap();

    assert!(executor.cancel(&handle).await.unwrap());
    assert!(!executor.cancel(&handle).await.unwrap());
    assert_eq!(executor.status(&handle).await.unwrap(), ExecutionState::Cancelled);

    let record = store.get("t-stop").await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.error.as_deref(), Some(CANCELLED_MESSAGE));
}

#[tokio::test]
async fn missing_media_fails_the_local_job() {
    let (root, store, executor) = setup(false);
    std::fs::remove_file(root.path().join("clips/b.mp4")).unwrap();

    let handle = executor.submit("t-miss", "u", blueprint("t-miss")).await.unwrap();
    let state = executor
        .wait(&handle, Duration::from_millis(10), Duration::from_secs(10))
        .await
        .unwrap();
    assert!(matches!(state, ExecutionState::Failed { ref error } if error.contains("clips/b.mp4")));

    let record = store.get("t-miss").await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
}

#[tokio::test]
async fn oldest_finished_local_jobs_are_dropped() {
    let root = media_root();
    let store = Arc::new(MemoryTaskStore::new());
    let backend = LocalBackend::new(runner(root.path(), store.clone(), false)).with_retention(1);

    let spec = |task_id: &str| JobSpec {
        task_id: task_id.into(),
        user_id: "u".into(),
        blueprint: blueprint(task_id),
    };
    async fn finish(backend: &LocalBackend, id: &str) {
        for _ in 0..500 {
            if backend.poll(id).await.unwrap().is_terminal() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("local job {id} never finished");
    }

    for id in ["t-1", "t-2"] {
        store.create(id, "u").await.unwrap();
        backend.submit(&spec(id)).await.unwrap();
        finish(&backend, id).await;
    }
    store.create("t-3", "u").await.unwrap();
    backend.submit(&spec("t-3")).await.unwrap();

    assert!(matches!(backend.poll("t-1").await, Err(BackendError::NotFound(_))));
    assert_eq!(backend.poll("t-2").await.unwrap(), ExecutionState::Succeeded);
    assert!(matches!(backend.cancel("t-1").await, Err(BackendError::NotFound(_))));
}
