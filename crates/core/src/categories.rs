//! Categorical move metadata: difficulty, energy level and style.
//!
//! These are the filterable dimensions of the move index and the
//! user-facing generation parameters. Their serialized form is the
//! lowercase name (`"beginner"`, `"high"`, `"playful"`, ...).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Difficulty
// ---------------------------------------------------------------------------

/// How demanding a move is to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Self::Beginner, Self::Intermediate, Self::Advanced];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }
}

impl FromStr for Difficulty {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "beginner" => Ok(Self::Beginner),
            "intermediate" => Ok(Self::Intermediate),
            "advanced" => Ok(Self::Advanced),
            other => Err(CoreError::Validation(format!(
                "Unknown difficulty '{other}'. Valid: beginner, intermediate, advanced"
            ))),
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EnergyLevel
// ---------------------------------------------------------------------------

/// Energy of a move or of a music section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyLevel {
    Low,
    Medium,
    High,
}

impl EnergyLevel {
    pub const ALL: [EnergyLevel; 3] = [Self::Low, Self::Medium, Self::High];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Shift a section's energy by the user's requested energy level.
    ///
    /// `Medium` leaves the section untouched, `High` raises it one step and
    /// `Low` lowers it one step, saturating at both ends.
    pub fn shifted_by(self, requested: EnergyLevel) -> EnergyLevel {
        match (requested, self) {
            (EnergyLevel::Medium, level) => level,
            (EnergyLevel::High, EnergyLevel::Low) => EnergyLevel::Medium,
            (EnergyLevel::High, _) => EnergyLevel::High,
            (EnergyLevel::Low, EnergyLevel::High) => EnergyLevel::Medium,
            (EnergyLevel::Low, _) => EnergyLevel::Low,
        }
    }

    /// Styles that suit a section of this energy, best match first.
    pub fn recommended_styles(self) -> Vec<Style> {
        match self {
            Self::Low => vec![Style::Romantic, Style::Sensual],
            Self::Medium => vec![Style::Playful, Style::Romantic, Style::Sensual],
            Self::High => vec![Style::Energetic, Style::Playful],
        }
    }
}

impl FromStr for EnergyLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(CoreError::Validation(format!(
                "Unknown energy level '{other}'. Valid: low, medium, high"
            ))),
        }
    }
}

impl fmt::Display for EnergyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Style
// ---------------------------------------------------------------------------

/// Aesthetic style of a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    Romantic,
    Energetic,
    Sensual,
    Playful,
}

impl Style {
    pub const ALL: [Style; 4] = [Self::Romantic, Self::Energetic, Self::Sensual, Self::Playful];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Romantic => "romantic",
            Self::Energetic => "energetic",
            Self::Sensual => "sensual",
            Self::Playful => "playful",
        }
    }
}

impl FromStr for Style {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "romantic" => Ok(Self::Romantic),
            "energetic" => Ok(Self::Energetic),
            "sensual" => Ok(Self::Sensual),
            "playful" => Ok(Self::Playful),
            other => Err(CoreError::Validation(format!(
                "Unknown style '{other}'. Valid: romantic, energetic, sensual, playful"
            ))),
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
