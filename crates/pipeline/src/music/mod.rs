//! Music feature extraction.
//!
//! [`MusicAnalyzer`] is the seam the generator depends on. The
//! production implementation, [`AudioFeatureExtractor`], decodes the file
//! with symphonia and runs the signal analysis in [`features`] on a
//! blocking thread.

mod decode;
pub mod features;

use std::path::Path;

use async_trait::async_trait;
use choreo_core::music::MusicFeatures;

pub use decode::{decode_mono, MonoPcm};

#[derive(Debug, thiserror::Error)]
pub enum MusicError {
    #[error("failed to read audio file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("audio decode failed: {0}")]
    Decode(String),

    #[error("audio file contains no samples")]
    Empty,

    #[error("extracted features are inconsistent: {0}")]
    Inconsistent(String),

    #[error("analysis task panicked or was cancelled: {0}")]
    Join(String),
}

/// Produces [`MusicFeatures`] for a track on local disk.
#[async_trait]
pub trait MusicAnalyzer: Send + Sync {
    async fn analyze(&self, audio_path: &Path) -> Result<MusicFeatures, MusicError>;
}

/// Symphonia-backed analyser.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioFeatureExtractor;

impl AudioFeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous analysis, for callers already on a blocking thread.
    pub fn analyze_blocking(audio_path: &Path) -> Result<MusicFeatures, MusicError> {
        let pcm = decode::decode_mono(audio_path)?;
        let features = features::extract(&pcm)?;
        features
            .validate()
            .map_err(|e| MusicError::Inconsistent(e.to_string()))?;
        Ok(features)
    }
}

#[async_trait]
impl MusicAnalyzer for AudioFeatureExtractor {
    async fn analyze(&self, audio_path: &Path) -> Result<MusicFeatures, MusicError> {
        let path = audio_path.to_path_buf();
        let started = std::time::Instant::now();
        let features = tokio::task::spawn_blocking(move || Self::analyze_blocking(&path))
            .await
            .map_err(|e| MusicError::Join(e.to_string()))??;

        tracing::info!(
            audio = %audio_path.display(),
            tempo_bpm = features.tempo_bpm,
            duration_secs = features.duration_seconds,
            sections = features.sections.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Music features extracted",
        );
        Ok(features)
    }
}
