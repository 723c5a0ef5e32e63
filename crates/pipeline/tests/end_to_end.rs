//! Generate a blueprint for a 180 s track, hand it over as JSON and render
//! it through the job runner, with the analyser and encoder stubbed out.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use choreo_core::blueprint::{Blueprint, TransitionType};
use choreo_core::categories::{Difficulty, EnergyLevel, Style};
use choreo_core::embedding::{AUDIO_DIM, POSE_DIM, TEXT_DIM};
use choreo_core::move_index::{IndexKind, MoveCatalog, MoveEmbedding, MoveIndexHandle};
use choreo_core::music::{MusicFeatures, MusicSection};
use choreo_core::paths::MediaRoot;
use choreo_core::retry::RetryPolicy;
use choreo_core::task::{MemoryTaskStore, TaskStatus, TaskStatusStore};
use choreo_pipeline::assembler::AssemblerConfig;
use choreo_pipeline::ffmpeg::{EncodePlan, Encoder, FfmpegError};
use choreo_pipeline::music::{MusicAnalyzer, MusicError};
use choreo_pipeline::storage::LocalStorage;
use choreo_pipeline::{BlueprintGenerator, JobError, JobRunner, VideoAssembler, VideoAssemblyError};

struct FixedAnalyzer;

#[async_trait]
impl MusicAnalyzer for FixedAnalyzer {
    async fn analyze(&self, _: &Path) -> Result<MusicFeatures, MusicError> {
        let section = |start: f64, end: f64, energy: EnergyLevel, seed: f32| MusicSection {
            start,
            end,
            energy,
            recommended_styles: energy.recommended_styles(),
            audio_vector: vector(AUDIO_DIM, seed),
        };
        Ok(MusicFeatures {
            tempo_bpm: 124.0,
            beat_positions: (0..360).map(|i| i as f64 * 0.5).collect(),
            duration_seconds: 180.0,
            sections: vec![
                section(0.0, 30.0, EnergyLevel::Low, 0.21),
                section(30.0, 90.0, EnergyLevel::Medium, 0.33),
                section(90.0, 150.0, EnergyLevel::High, 0.47),
                section(150.0, 180.0, EnergyLevel::Medium, 0.52),
            ],
            audio_vector: vector(AUDIO_DIM, 0.4),
        })
    }
}

/// Records the plan and writes a placeholder file whose probed length is
/// the planned length plus `drift`.
#[derive(Default)]
struct StubEncoder {
    planned: Mutex<Option<f64>>,
    drift: f64,
    encodes: AtomicU32,
}

impl StubEncoder {
    fn drifting(drift: f64) -> Self {
        Self {
            drift,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Encoder for StubEncoder {
    async fn encode(&self, plan: &EncodePlan) -> Result<(), FfmpegError> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        *self.planned.lock().unwrap() = Some(plan.total_duration);
        tokio::fs::write(&plan.output, b"mp4").await?;
        Ok(())
    }

    async fn probe_duration(&self, _: &Path) -> Result<f64, FfmpegError> {
        self.planned
            .lock()
            .unwrap()
            .map(|planned| planned + self.drift)
            .ok_or_else(|| FfmpegError::ParseError("nothing encoded".into()))
    }
}

fn vector(dim: usize, seed: f32) -> Vec<f32> {
    (0..dim).map(|i| ((i as f32 + 1.0) * seed).sin()).collect()
}

fn library() -> Vec<MoveEmbedding> {
    let mut moves = Vec::new();
    for (ei, energy) in EnergyLevel::ALL.into_iter().enumerate() {
        for (si, style) in Style::ALL.into_iter().enumerate() {
            for n in 0..3 {
                let seed = 0.05 + (ei * 12 + si * 3 + n) as f32 * 0.017;
                moves.push(MoveEmbedding {
                    move_id: format!("{energy}-{style}-{n}"),
                    pose_vector: vector(POSE_DIM, seed),
                    audio_vector: vector(AUDIO_DIM, seed * 1.3),
                    text_vector: vector(TEXT_DIM, seed * 1.9),
                    difficulty: Difficulty::Intermediate,
                    energy,
                    style,
                    duration_seconds: 4.0 + n as f64,
                    media_path: format!("clips/{energy}-{style}-{n}.mp4"),
                });
            }
        }
    }
    moves
}

struct Fixture {
    _root: tempfile::TempDir,
    root: PathBuf,
    store: Arc<MemoryTaskStore>,
    encoder: Arc<StubEncoder>,
    runner: JobRunner,
    blueprint: Blueprint,
}

async fn fixture() -> Fixture {
    fixture_with(StubEncoder::default()).await
}

async fn fixture_with(encoder: StubEncoder) -> Fixture {
    let root_dir = tempfile::tempdir().unwrap();
    let root = root_dir.path().to_path_buf();
    let moves = library();

    std::fs::create_dir_all(root.join("clips")).unwrap();
    std::fs::create_dir_all(root.join("music")).unwrap();
    std::fs::write(root.join("music/song.wav"), b"RIFF").unwrap();
    for m in &moves {
        std::fs::write(root.join(&m.media_path), m.move_id.as_bytes()).unwrap();
    }

    let catalog = MoveCatalog::new(moves).unwrap();
    let index = Arc::new(MoveIndexHandle::new(MoveIndexHandle::build(&catalog, IndexKind::Exact)));
    let generator = BlueprintGenerator::new(index, Arc::new(FixedAnalyzer), MediaRoot::new(&root));
    let blueprint = generator
        .generate("music/song.wav", Difficulty::Intermediate, EnergyLevel::Medium, Style::Energetic)
        .await
        .unwrap();

    let store = Arc::new(MemoryTaskStore::new());
    store.create(&blueprint.task_id, "user-7").await.unwrap();

    let storage = Arc::new(LocalStorage::new(MediaRoot::new(&root), None));
    let config = AssemblerConfig {
        fetch_concurrency: 3,
        fetch_timeout: Duration::from_secs(5),
        fetch_retry: RetryPolicy::no_retry(),
        upload_timeout: Duration::from_secs(5),
        scratch_dir: None,
    };
    let encoder = Arc::new(encoder);
    let assembler = VideoAssembler::new(storage, encoder.clone(), config)
        .with_status_store(store.clone());
    let runner = JobRunner::new(Arc::new(assembler), store.clone());

    Fixture {
        _root: root_dir,
        root,
        store,
        encoder,
        runner,
        blueprint,
    }
}

#[tokio::test]
async fn generated_blueprint_renders_to_completed_task() {
    let f = fixture().await;
    let bp = &f.blueprint;

    assert!((bp.total_duration - 180.0).abs() < 1e-3);
    let crossfades = bp
        .moves
        .iter()
        .filter(|m| m.transition_type == TransitionType::Crossfade)
        .count();
    assert_eq!(crossfades, 3);

    let json = bp.to_json().unwrap();
    let output = f.runner.run_json(&json).await.unwrap();

    assert_eq!(output.move_count, bp.moves.len());
    assert_eq!(output.output_path, format!("renders/{}.mp4", bp.task_id));
    assert!(f.root.join(&output.output_path).exists());

    let record = f.store.get(&bp.task_id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(record.progress, 100);
    let result = record.result.unwrap();
    assert_eq!(result["output_path"], output.output_path.as_str());
    assert_eq!(result["move_count"], bp.moves.len());
    assert!((result["duration_seconds"].as_f64().unwrap() - 180.0).abs() < 1e-3);
    assert!(result["output_url"].as_str().unwrap().starts_with("file://"));
}

#[tokio::test]
async fn missing_clip_fails_the_task_with_its_path() {
    let f = fixture().await;
    let victim = f.blueprint.moves[1].media_path.clone();
    std::fs::remove_file(f.root.join(&victim)).unwrap();

    let err = f.runner.run(&f.blueprint).await.unwrap_err();
    assert!(matches!(
        &err,
        JobError::Assembly(VideoAssemblyError::MissingMedia { path }) if *path == victim
    ));

    let record = f.store.get(&f.blueprint.task_id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert!(record.error.unwrap().contains(&victim));
    assert!(!f.root.join(&f.blueprint.output_config.output_path).exists());
}

#[tokio::test]
async fn finished_task_is_not_rewritten() {
    let f = fixture().await;
    f.runner.run(&f.blueprint).await.unwrap();
    let first = f.store.get(&f.blueprint.task_id).await.unwrap().unwrap();

    // A second run of the same blueprint is refused without rendering.
    let err = f.runner.run(&f.blueprint).await.unwrap_err();
    assert!(matches!(
        &err,
        JobError::AlreadyFinished { task_id, status: TaskStatus::Completed } if *task_id == f.blueprint.task_id
    ));
    assert_eq!(f.encoder.encodes.load(Ordering::SeqCst), 1);

    let second = f.store.get(&f.blueprint.task_id).await.unwrap().unwrap();
    assert_eq!(first.updated_at, second.updated_at);
    assert_eq!(second.status, TaskStatus::Completed);
}

#[tokio::test]
async fn encoder_duration_drift_fails_without_upload() {
    let f = fixture_with(StubEncoder::drifting(0.75)).await;

    let err = f.runner.run(&f.blueprint).await.unwrap_err();
    assert!(matches!(
        &err,
        JobError::Assembly(VideoAssemblyError::DurationMismatch { expected, actual })
            if (*expected - 180.0).abs() < 1e-3 && (*actual - 180.75).abs() < 1e-3
    ));

    let record = f.store.get(&f.blueprint.task_id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert!(record.error.unwrap().contains("expected 180.000s"));
    assert!(!f.root.join(&f.blueprint.output_config.output_path).exists());
}

#[tokio::test]
async fn drift_within_one_crossfade_is_accepted() {
    let f = fixture_with(StubEncoder::drifting(-0.4)).await;
    f.runner.run(&f.blueprint).await.unwrap();

    let record = f.store.get(&f.blueprint.task_id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Completed);
}
