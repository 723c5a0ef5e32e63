//! Multi-modal embedding combination.
//!
//! A move (or a query) is described by up to three component embeddings:
//! pose (512-d), audio (128-d) and text (384-d). [`combine`] normalises
//! each present component, scales it by its weight and concatenates the
//! blocks into one fixed 1024-d vector. Absent components become zero
//! blocks so partial queries (e.g. audio only) stay comparable with fully
//! populated index vectors.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Dimensionality of the pose component.
pub const POSE_DIM: usize = 512;

/// Dimensionality of the audio component.
pub const AUDIO_DIM: usize = 128;

/// Dimensionality of the text component.
pub const TEXT_DIM: usize = 384;

/// Dimensionality of a combined vector (`512 + 128 + 384`).
pub const COMBINED_DIM: usize = POSE_DIM + AUDIO_DIM + TEXT_DIM;

/// Tolerance used when checking that a vector is unit-length.
pub const NORM_TOLERANCE: f32 = 1e-3;

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

/// Per-component scale factors applied after normalisation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentWeights {
    pub pose: f32,
    pub audio: f32,
    pub text: f32,
}

impl Default for ComponentWeights {
    fn default() -> Self {
        Self {
            pose: 1.0,
            audio: 1.0,
            text: 1.0,
        }
    }
}

impl ComponentWeights {
    /// Validate that every weight is finite and non-negative.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, w) in [("pose", self.pose), ("audio", self.audio), ("text", self.text)] {
            if !w.is_finite() || w < 0.0 {
                return Err(CoreError::Validation(format!(
                    "{name} weight must be finite and >= 0, got {w}"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Vector helpers
// ---------------------------------------------------------------------------

/// Euclidean length of `v`.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Return a unit-length copy of `v`. A zero vector stays zero.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v);
    if norm <= f32::EPSILON {
        return vec![0.0; v.len()];
    }
    v.iter().map(|x| x / norm).collect()
}

/// Whether `v` has unit length within [`NORM_TOLERANCE`].
pub fn is_unit_length(v: &[f32]) -> bool {
    (l2_norm(v) - 1.0).abs() <= NORM_TOLERANCE
}

/// Inner product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity of two vectors, `0.0` if either is a zero vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let denom = l2_norm(a) * l2_norm(b);
    if denom <= f32::EPSILON {
        return 0.0;
    }
    dot(a, b) / denom
}

/// Check that a component has its declared dimensionality.
pub fn check_dimension(
    component: &'static str,
    v: &[f32],
    expected: usize,
) -> Result<(), CoreError> {
    if v.len() != expected {
        return Err(CoreError::DimensionMismatch {
            component,
            expected,
            actual: v.len(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Combination
// ---------------------------------------------------------------------------

/// Combine optional pose/audio/text components into one 1024-d vector.
///
/// Each supplied component is L2-normalised and multiplied by its weight;
/// missing components are zero-filled. The output length is always
/// [`COMBINED_DIM`]. Fails only when a supplied component has the wrong
/// dimensionality.
pub fn combine(
    pose: Option<&[f32]>,
    audio: Option<&[f32]>,
    text: Option<&[f32]>,
    weights: &ComponentWeights,
) -> Result<Vec<f32>, CoreError> {
    let mut out = Vec::with_capacity(COMBINED_DIM);
    append_block(&mut out, "pose", pose, POSE_DIM, weights.pose)?;
    append_block(&mut out, "audio", audio, AUDIO_DIM, weights.audio)?;
    append_block(&mut out, "text", text, TEXT_DIM, weights.text)?;
    debug_assert_eq!(out.len(), COMBINED_DIM);
    Ok(out)
}

fn append_block(
    out: &mut Vec<f32>,
    component: &'static str,
    v: Option<&[f32]>,
    dim: usize,
    weight: f32,
) -> Result<(), CoreError> {
    match v {
        Some(v) => {
            check_dimension(component, v, dim)?;
            out.extend(l2_normalize(v).into_iter().map(|x| x * weight));
        }
        None => out.extend(std::iter::repeat(0.0).take(dim)),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
