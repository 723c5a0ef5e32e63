//! Music feature types produced by the extractor and consumed by the
//! blueprint generator.
//!
//! Sections partition `[0, duration_seconds]` into contiguous,
//! non-overlapping segments. [`MusicFeatures::validate`] enforces that
//! invariant so downstream code can rely on it.

use serde::{Deserialize, Serialize};

use crate::categories::{EnergyLevel, Style};
use crate::embedding::AUDIO_DIM;
use crate::error::CoreError;

/// Tolerance (seconds) for section boundary comparisons.
pub const SECTION_TOLERANCE_SECS: f64 = 1e-3;

/// One contiguous stretch of the track with a uniform character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicSection {
    pub start: f64,
    pub end: f64,
    pub energy: EnergyLevel,
    /// Move styles that suit this section, best match first.
    pub recommended_styles: Vec<Style>,
    /// Audio embedding of this section only (128-d).
    pub audio_vector: Vec<f32>,
}

impl MusicSection {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Everything the generator needs to know about a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicFeatures {
    pub tempo_bpm: f64,
    /// Beat onsets in seconds, ascending.
    pub beat_positions: Vec<f64>,
    pub duration_seconds: f64,
    pub sections: Vec<MusicSection>,
    /// Whole-track audio embedding (128-d).
    pub audio_vector: Vec<f32>,
}

impl MusicFeatures {
    /// Check the partition and dimension invariants.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.duration_seconds.is_finite() || self.duration_seconds <= 0.0 {
            return Err(CoreError::Validation(format!(
                "Track duration must be positive, got {}",
                self.duration_seconds
            )));
        }
        if self.audio_vector.len() != AUDIO_DIM {
            return Err(CoreError::DimensionMismatch {
                component: "audio",
                expected: AUDIO_DIM,
                actual: self.audio_vector.len(),
            });
        }
        let Some(first) = self.sections.first() else {
            return Err(CoreError::Validation("Track has no sections".into()));
        };
        if first.start.abs() > SECTION_TOLERANCE_SECS {
            return Err(CoreError::Validation(format!(
                "First section must start at 0, starts at {}",
                first.start
            )));
        }

        let mut cursor = 0.0;
        for (i, section) in self.sections.iter().enumerate() {
            if (section.start - cursor).abs() > SECTION_TOLERANCE_SECS {
                return Err(CoreError::Validation(format!(
                    "Section {i} starts at {} but previous section ended at {cursor}",
                    section.start
                )));
            }
            if section.end <= section.start {
                return Err(CoreError::Validation(format!(
                    "Section {i} has non-positive length ({} .. {})",
                    section.start, section.end
                )));
            }
            if section.audio_vector.len() != AUDIO_DIM {
                return Err(CoreError::DimensionMismatch {
                    component: "audio",
                    expected: AUDIO_DIM,
                    actual: section.audio_vector.len(),
                });
            }
            cursor = section.end;
        }

        if (cursor - self.duration_seconds).abs() > SECTION_TOLERANCE_SECS {
            return Err(CoreError::Validation(format!(
                "Sections end at {cursor} but track lasts {}",
                self.duration_seconds
            )));
        }
        Ok(())
    }
}
