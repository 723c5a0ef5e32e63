//! Move library records and the catalog they are indexed from.
//!
//! The catalog is a JSON document produced offline, either
//! `{"moves": [...]}` or a bare array of move records.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::MoveMeta;
use crate::categories::{Difficulty, EnergyLevel, Style};
use crate::embedding::{self, AUDIO_DIM, COMBINED_DIM, POSE_DIM, TEXT_DIM};
use crate::error::CoreError;
use crate::paths::check_relative_path;

/// One move from the library with its three component embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveEmbedding {
    pub move_id: String,
    pub pose_vector: Vec<f32>,
    pub audio_vector: Vec<f32>,
    pub text_vector: Vec<f32>,
    pub difficulty: Difficulty,
    pub energy: EnergyLevel,
    pub style: Style,
    pub duration_seconds: f64,
    #[serde(alias = "video_path")]
    pub media_path: String,
}

impl MoveEmbedding {
    pub fn meta(&self) -> MoveMeta {
        MoveMeta {
            move_id: self.move_id.clone(),
            difficulty: self.difficulty,
            energy: self.energy,
            style: self.style,
            duration_seconds: self.duration_seconds,
            media_path: self.media_path.clone(),
        }
    }

    /// Concatenated 1024-d vector with unit weights.
    pub fn combined(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(COMBINED_DIM);
        out.extend_from_slice(&self.pose_vector);
        out.extend_from_slice(&self.audio_vector);
        out.extend_from_slice(&self.text_vector);
        out
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.move_id.trim().is_empty() {
            return Err(CoreError::Validation("Move id must not be empty".into()));
        }
        for (component, v, dim) in [
            ("pose", &self.pose_vector, POSE_DIM),
            ("audio", &self.audio_vector, AUDIO_DIM),
            ("text", &self.text_vector, TEXT_DIM),
        ] {
            embedding::check_dimension(component, v, dim)?;
            if v.iter().any(|x| !x.is_finite()) {
                return Err(CoreError::Validation(format!(
                    "Move '{}': {component} vector contains non-finite values",
                    self.move_id
                )));
            }
            if embedding::l2_norm(v) <= f32::EPSILON {
                return Err(CoreError::Validation(format!(
                    "Move '{}': {component} vector is all zeros",
                    self.move_id
                )));
            }
        }
        if !self.duration_seconds.is_finite() || self.duration_seconds <= 0.0 {
            return Err(CoreError::Validation(format!(
                "Move '{}': duration must be > 0, got {}",
                self.move_id, self.duration_seconds
            )));
        }
        check_relative_path(&self.media_path).map_err(|reason| {
            CoreError::Validation(format!("Move '{}': media_path {reason}", self.move_id))
        })
    }

    fn normalised(mut self) -> Self {
        self.pose_vector = embedding::l2_normalize(&self.pose_vector);
        self.audio_vector = embedding::l2_normalize(&self.audio_vector);
        self.text_vector = embedding::l2_normalize(&self.text_vector);
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    Wrapped { moves: Vec<MoveEmbedding> },
    Bare(Vec<MoveEmbedding>),
}

/// Validated, normalised set of moves ready to be indexed.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveCatalog {
    moves: Vec<MoveEmbedding>,
}

impl MoveCatalog {
    /// Validate every move and normalise its components.
    ///
    /// Rejects wrong dimensions, all-zero or non-finite components,
    /// non-positive durations, unsafe media paths and duplicate ids.
    pub fn new(moves: Vec<MoveEmbedding>) -> Result<Self, CoreError> {
        let mut seen = HashSet::with_capacity(moves.len());
        for m in &moves {
            m.validate()?;
            if !seen.insert(m.move_id.as_str()) {
                return Err(CoreError::Conflict(format!(
                    "Duplicate move id '{}' in catalog",
                    m.move_id
                )));
            }
        }
        Ok(Self {
            moves: moves.into_iter().map(MoveEmbedding::normalised).collect(),
        })
    }

    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        let doc: CatalogDocument = serde_json::from_str(text)
            .map_err(|e| CoreError::Validation(format!("Invalid move catalog: {e}")))?;
        let moves = match doc {
            CatalogDocument::Wrapped { moves } | CatalogDocument::Bare(moves) => moves,
        };
        Self::new(moves)
    }

    pub fn moves(&self) -> &[MoveEmbedding] {
        &self.moves
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}
