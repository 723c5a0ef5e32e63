//! Blueprint generation: music features + move index -> timeline.
//!
//! For every music section the generator queries the index with the
//! section's audio embedding and the requested categories, then lays
//! moves back to back until the section is covered, trimming the last
//! one. Sections after the first open with a cross-fade; moves inside a
//! section are joined with cuts.
//!
//! Filter relaxation when a section has no candidates: drop the style
//! filter, then the difficulty filter, then give up.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use choreo_core::blueprint::{
    Blueprint, BlueprintMove, OutputConfig, TransitionType, ValidationError, CROSSFADE_SECONDS,
    TIMELINE_TOLERANCE_SECS,
};
use choreo_core::categories::{Difficulty, EnergyLevel, Style};
use choreo_core::embedding::{combine, ComponentWeights};
use choreo_core::error::CoreError;
use choreo_core::move_index::{MoveFilters, MoveIndexHandle, MoveMeta, MoveSearch};
use choreo_core::music::{MusicFeatures, MusicSection};
use choreo_core::paths::{check_relative_path, MediaRoot};

use crate::music::{MusicAnalyzer, MusicError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Candidates fetched per section query.
pub const DEFAULT_TOP_K: usize = 8;

/// Shortest clip the generator places, except to close a section.
pub const MIN_CLIP_SECS: f64 = 1.0;

pub const DEFAULT_OUTPUT_DIR: &str = "renders";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("invalid generation input: {0}")]
    InvalidInput(String),

    #[error("music analysis failed: {0}")]
    Analysis(#[from] MusicError),

    #[error("move index query failed: {0}")]
    Index(#[from] CoreError),

    #[error("no moves match section {section} ({start:.2}s..{end:.2}s) even after relaxing style and difficulty")]
    NoMatchingMoves { section: usize, start: f64, end: f64 },

    #[error("section {section} needs another move but the only candidate repeats the previous one")]
    InsufficientVariety { section: usize },

    #[error("generated blueprint is inconsistent: {0}")]
    Inconsistent(#[from] ValidationError),
}

/// Which filters had to be dropped to find candidates for a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relaxation {
    None,
    Style,
    StyleAndDifficulty,
}

impl Relaxation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Style => "style",
            Self::StyleAndDifficulty => "style_and_difficulty",
        }
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

pub struct BlueprintGenerator {
    index: Arc<MoveIndexHandle>,
    analyzer: Arc<dyn MusicAnalyzer>,
    media_root: MediaRoot,
    top_k: usize,
    output_dir: String,
}

impl BlueprintGenerator {
    pub fn new(index: Arc<MoveIndexHandle>, analyzer: Arc<dyn MusicAnalyzer>, media_root: MediaRoot) -> Self {
        Self {
            index,
            analyzer,
            media_root,
            top_k: DEFAULT_TOP_K,
            output_dir: DEFAULT_OUTPUT_DIR.to_string(),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<String>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    /// Analyse `audio_path` (relative to the media root) and build a
    /// blueprint for it.
    pub async fn generate(
        &self,
        audio_path: &str,
        difficulty: Difficulty,
        energy: EnergyLevel,
        style: Style,
    ) -> Result<Blueprint, GenerationError> {
        let local = self
            .media_root
            .resolve(audio_path)
            .map_err(|e| GenerationError::InvalidInput(format!("audio_path: {e}")))?;
        if !tokio::fs::try_exists(&local).await.unwrap_or(false) {
            return Err(GenerationError::InvalidInput(format!(
                "audio file '{audio_path}' does not exist under the media root"
            )));
        }
        let features = self.analyzer.analyze(&local).await?;
        self.generate_from_features(audio_path, &features, difficulty, energy, style)
    }

    /// Build a blueprint from already extracted features.
    pub fn generate_from_features(
        &self,
        audio_path: &str,
        features: &MusicFeatures,
        difficulty: Difficulty,
        energy: EnergyLevel,
        style: Style,
    ) -> Result<Blueprint, GenerationError> {
        check_relative_path(audio_path)
            .map_err(|reason| GenerationError::InvalidInput(format!("audio_path: {reason}")))?;
        features
            .validate()
            .map_err(|e| GenerationError::InvalidInput(format!("music features: {e}")))?;

        let index = self.index.current();
        let task_id = uuid::Uuid::new_v4().to_string();
        let mut timeline = Timeline::default();
        let mut cursors: HashMap<MoveFilters, usize> = HashMap::new();
        let mut section_log = Vec::with_capacity(features.sections.len());

        for (section_no, section) in features.sections.iter().enumerate() {
            let query = combine(None, Some(&section.audio_vector), None, &ComponentWeights::default())?;
            let preferred = MoveFilters {
                difficulty: Some(difficulty),
                energy: Some(section.energy.shifted_by(energy)),
                style: section.recommended_styles.contains(&style).then_some(style),
            };

            // A section opened by a cross-fade starts one overlap early.
            let needed = section.end - timeline.end()
                + if timeline.moves.is_empty() { 0.0 } else { CROSSFADE_SECONDS };
            let (filters, relaxation, candidates) = self.find_candidates(
                index.as_ref(),
                &query,
                preferred,
                timeline.last_move_id(),
                needed,
            )?;
            if candidates.is_empty() {
                return Err(GenerationError::NoMatchingMoves {
                    section: section_no,
                    start: section.start,
                    end: section.end,
                });
            }

            let cursor = cursors.entry(filters).or_insert(0);
            let offset = *cursor % candidates.len();
            *cursor += 1;

            let placed = timeline.fill_section(section_no, section, &candidates, offset)?;
            tracing::debug!(
                section = section_no,
                energy = %section.energy,
                relaxation = relaxation.as_str(),
                candidates = candidates.len(),
                moves = placed,
                "Section filled",
            );

            section_log.push(json!({
                "start": section.start,
                "end": section.end,
                "energy": section.energy,
                "filters": filters,
                "relaxation": relaxation.as_str(),
                "moves": placed,
            }));
        }

        let total_duration = timeline.end();
        let blueprint = Blueprint {
            task_id: task_id.clone(),
            audio_path: audio_path.to_string(),
            moves: timeline.moves,
            total_duration,
            generation_parameters: json!({
                "difficulty": difficulty,
                "energy_level": energy,
                "style": style,
                "tempo_bpm": features.tempo_bpm,
                "section_count": features.sections.len(),
                "sections": section_log,
            }),
            output_config: OutputConfig::with_path(format!("{}/{task_id}.mp4", self.output_dir)),
        };
        blueprint.validate()?;

        tracing::info!(
            task_id = %blueprint.task_id,
            moves = blueprint.moves.len(),
            total_duration,
            "Blueprint generated",
        );
        Ok(blueprint)
    }

    /// Query with `preferred`, relaxing style then difficulty until the
    /// candidate list can fill `needed` seconds: at least two distinct
    /// moves, or a single move other than `previous` long enough on its own.
    fn find_candidates(
        &self,
        index: &dyn MoveSearch,
        query: &[f32],
        preferred: MoveFilters,
        previous: Option<&str>,
        needed: f64,
    ) -> Result<(MoveFilters, Relaxation, Vec<MoveMeta>), GenerationError> {
        let attempts = [
            (preferred, Relaxation::None),
            (
                MoveFilters {
                    style: None,
                    ..preferred
                },
                Relaxation::Style,
            ),
            (
                MoveFilters {
                    style: None,
                    difficulty: None,
                    ..preferred
                },
                Relaxation::StyleAndDifficulty,
            ),
        ];

        let mut last = (preferred, Relaxation::None, Vec::new());
        for (filters, relaxation) in attempts {
            let candidates: Vec<MoveMeta> = index
                .query(query, &filters, self.top_k)?
                .into_iter()
                .filter_map(|hit| index.get(&hit.move_id).cloned())
                .collect();
            let usable = candidates.len() >= 2
                || candidates.first().is_some_and(|c| {
                    Some(c.move_id.as_str()) != previous
                        && c.duration_seconds + TIMELINE_TOLERANCE_SECS >= needed
                });
            if usable {
                return Ok((filters, relaxation, candidates));
            }
            if !candidates.is_empty() {
                last = (filters, relaxation, candidates);
            }
        }
        Ok(last)
    }
}

// ---------------------------------------------------------------------------
// Timeline builder
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Timeline {
    moves: Vec<BlueprintMove>,
}

impl Timeline {
    fn end(&self) -> f64 {
        self.moves.last().map(BlueprintMove::end_time).unwrap_or(0.0)
    }

    fn last_move_id(&self) -> Option<&str> {
        self.moves.last().map(|m| m.clip_id.as_str())
    }

    /// Place moves from `candidates` (cycling from `offset`) until the
    /// timeline reaches `section.end`. Returns the number placed.
    fn fill_section(
        &mut self,
        section_no: usize,
        section: &MusicSection,
        candidates: &[MoveMeta],
        offset: usize,
    ) -> Result<usize, GenerationError> {
        let mut placed = 0usize;
        let mut next = offset;

        while section.end - self.end() > TIMELINE_TOLERANCE_SECS {
            let pick = self.next_candidate(candidates, &mut next).ok_or(
                GenerationError::InsufficientVariety {
                    section: section_no,
                },
            )?;

            let crossfade_ok = section_no > 0
                && placed == 0
                && self
                    .moves
                    .last()
                    .is_some_and(|prev| prev.duration > CROSSFADE_SECONDS + TIMELINE_TOLERANCE_SECS)
                && section.end - self.end() >= MIN_CLIP_SECS + CROSSFADE_SECONDS;

            let mut transition = if crossfade_ok {
                TransitionType::Crossfade
            } else {
                TransitionType::Cut
            };
            let mut duration = self.clip_duration(section.end, transition, pick.duration_seconds);
            if transition == TransitionType::Crossfade
                && duration <= CROSSFADE_SECONDS + TIMELINE_TOLERANCE_SECS
            {
                transition = TransitionType::Cut;
                duration = self.clip_duration(section.end, transition, pick.duration_seconds);
            }

            let start = match self.moves.last() {
                Some(prev) => prev.end_time() - transition.overlap_secs(),
                None => 0.0,
            };
            self.moves.push(BlueprintMove {
                clip_id: pick.move_id.clone(),
                media_path: pick.media_path.clone(),
                start_time: start,
                duration,
                transition_type: transition,
            });
            placed += 1;
        }
        Ok(placed)
    }

    /// Next candidate in rotation that differs from the previous move.
    fn next_candidate<'a>(&self, candidates: &'a [MoveMeta], next: &mut usize) -> Option<&'a MoveMeta> {
        let previous = self.last_move_id();
        for _ in 0..candidates.len() {
            let c = &candidates[*next % candidates.len()];
            *next += 1;
            if Some(c.move_id.as_str()) != previous {
                return Some(c);
            }
        }
        None
    }

    /// Duration to use for a clip of `full` seconds starting after the
    /// current end with `transition`, so the section closes exactly at
    /// `section_end` without leaving a sliver shorter than
    /// [`MIN_CLIP_SECS`].
    fn clip_duration(&self, section_end: f64, transition: TransitionType, full: f64) -> f64 {
        let start = match self.moves.last() {
            Some(prev) => prev.end_time() - transition.overlap_secs(),
            None => 0.0,
        };
        let remaining_after = section_end - (start + full);
        if remaining_after <= TIMELINE_TOLERANCE_SECS {
            return section_end - start;
        }
        if remaining_after < MIN_CLIP_SECS {
            let shortened = section_end - MIN_CLIP_SECS - start;
            if shortened >= MIN_CLIP_SECS {
                return shortened;
            }
        }
        full
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use async_trait::async_trait;
    use choreo_core::embedding::{AUDIO_DIM, POSE_DIM, TEXT_DIM};
    use choreo_core::move_index::{IndexKind, MoveCatalog, MoveEmbedding};

    struct NoAnalyzer;

    #[async_trait]
    impl MusicAnalyzer for NoAnalyzer {
        async fn analyze(&self, _: &Path) -> Result<MusicFeatures, MusicError> {
            Err(MusicError::Empty)
        }
    }

    fn component(dim: usize, seed: f32) -> Vec<f32> {
        (0..dim).map(|i| ((i as f32 + 1.0) * seed).sin()).collect()
    }

    fn mv(id: &str, d: Difficulty, e: EnergyLevel, s: Style, secs: f64) -> MoveEmbedding {
        let seed = id.bytes().map(|b| b as f32).sum::<f32>() * 0.013 + 0.1;
        MoveEmbedding {
            move_id: id.to_string(),
            pose_vector: component(POSE_DIM, seed),
            audio_vector: component(AUDIO_DIM, seed * 1.7),
            text_vector: component(TEXT_DIM, seed * 2.3),
            difficulty: d,
            energy: e,
            style: s,
            duration_seconds: secs,
            media_path: format!("clips/{id}.mp4"),
        }
    }

    fn library() -> Vec<MoveEmbedding> {
        let mut moves = Vec::new();
        for e in EnergyLevel::ALL {
            for (i, s) in Style::ALL.into_iter().enumerate() {
                for n in 0..2 {
                    moves.push(mv(
                        &format!("{e}-{s}-{n}"),
                        Difficulty::Beginner,
                        e,
                        s,
                        3.0 + i as f64 + n as f64 * 0.5,
                    ));
                }
            }
        }
        moves
    }

    fn generator(moves: Vec<MoveEmbedding>) -> BlueprintGenerator {
        let catalog = MoveCatalog::new(moves).unwrap();
        let handle = Arc::new(MoveIndexHandle::new(MoveIndexHandle::build(&catalog, IndexKind::Exact)));
        BlueprintGenerator::new(handle, Arc::new(NoAnalyzer), MediaRoot::new("/srv/media"))
    }

    fn section(start: f64, end: f64, energy: EnergyLevel, seed: f32) -> MusicSection {
        MusicSection {
            start,
            end,
            energy,
            recommended_styles: energy.recommended_styles(),
            audio_vector: component(AUDIO_DIM, seed),
        }
    }

    fn features(sections: Vec<MusicSection>) -> MusicFeatures {
        let duration = sections.last().map(|s| s.end).unwrap_or(0.0);
        MusicFeatures {
            tempo_bpm: 118.0,
            beat_positions: vec![],
            duration_seconds: duration,
            sections,
            audio_vector: component(AUDIO_DIM, 0.5),
        }
    }

    fn four_sections() -> MusicFeatures {
        features(vec![
            section(0.0, 30.0, EnergyLevel::Low, 0.2),
            section(30.0, 90.0, EnergyLevel::Medium, 0.3),
            section(90.0, 150.0, EnergyLevel::High, 0.4),
            section(150.0, 180.0, EnergyLevel::Medium, 0.5),
        ])
    }

    // -- Timeline shape --

    #[test]
    fn covers_track_with_valid_timeline() {
        let g = generator(library());
        let bp = g
            .generate_from_features(
                "music/song.mp3",
                &four_sections(),
                Difficulty::Beginner,
                EnergyLevel::Medium,
                Style::Playful,
            )
            .unwrap();

        assert!(bp.validate().is_ok());
        assert!((bp.total_duration - 180.0).abs() < TIMELINE_TOLERANCE_SECS);
        assert_eq!(bp.moves[0].transition_type, TransitionType::Cut);
        assert!(bp.moves.windows(2).all(|w| w[0].clip_id != w[1].clip_id));
        assert_eq!(bp.output_config.output_path, format!("renders/{}.mp4", bp.task_id));
        assert_eq!(bp.generation_parameters["section_count"], 4);
    }

    #[test]
    fn builder_overrides_output_dir_and_top_k() {
        let g = generator(library()).with_output_dir("exports/2024").with_top_k(3);
        let bp = g
            .generate_from_features(
                "music/song.mp3",
                &four_sections(),
                Difficulty::Beginner,
                EnergyLevel::Medium,
                Style::Playful,
            )
            .unwrap();
        assert_eq!(bp.output_config.output_path, format!("exports/2024/{}.mp4", bp.task_id));
        assert!(bp.validate().is_ok());
    }

    #[test]
    fn lone_style_match_relaxes_style() {
        let g = generator(vec![
            mv("p", Difficulty::Beginner, EnergyLevel::Medium, Style::Playful, 3.0),
            mv("r1", Difficulty::Beginner, EnergyLevel::Medium, Style::Romantic, 3.0),
            mv("r2", Difficulty::Beginner, EnergyLevel::Medium, Style::Romantic, 3.5),
            mv("r3", Difficulty::Beginner, EnergyLevel::Medium, Style::Romantic, 4.0),
        ]);
        let bp = g
            .generate_from_features(
                "music/song.mp3",
                &features(vec![section(0.0, 12.0, EnergyLevel::Medium, 0.3)]),
                Difficulty::Beginner,
                EnergyLevel::Medium,
                Style::Playful,
            )
            .unwrap();

        assert!(bp.validate().is_ok());
        assert!((bp.total_duration - 12.0).abs() < TIMELINE_TOLERANCE_SECS);
        assert!(bp.moves.len() >= 3);
        assert_eq!(bp.generation_parameters["sections"][0]["relaxation"], "style");
    }

    #[test]
    fn lone_move_covering_the_section_is_kept() {
        let g = generator(vec![
            mv("long", Difficulty::Beginner, EnergyLevel::Medium, Style::Playful, 20.0),
            mv("r1", Difficulty::Beginner, EnergyLevel::Medium, Style::Romantic, 3.0),
        ]);
        let bp = g
            .generate_from_features(
                "music/song.mp3",
                &features(vec![section(0.0, 12.0, EnergyLevel::Medium, 0.3)]),
                Difficulty::Beginner,
                EnergyLevel::Medium,
                Style::Playful,
            )
            .unwrap();

        assert_eq!(bp.moves.len(), 1);
        assert_eq!(bp.moves[0].clip_id, "long");
        assert_eq!(bp.generation_parameters["sections"][0]["relaxation"], "none");
    }

    #[test]
    fn crossfades_only_open_sections() {
        let g = generator(library());
        let bp = g
            .generate_from_features(
                "music/song.mp3",
                &four_sections(),
                Difficulty::Beginner,
                EnergyLevel::Medium,
                Style::Romantic,
            )
            .unwrap();
        let crossfades: Vec<_> = bp
            .moves
            .iter()
            .filter(|m| m.transition_type == TransitionType::Crossfade)
            .collect();
        assert_eq!(crossfades.len(), 3);
        for (cf, boundary) in crossfades.iter().zip([30.0, 90.0, 150.0]) {
            assert!((cf.start_time + CROSSFADE_SECONDS - boundary).abs() < 1e-6);
        }
    }

    #[test]
    fn moves_follow_shifted_section_energy() {
        let g = generator(library());
        let bp = g
            .generate_from_features(
                "music/song.mp3",
                &features(vec![section(0.0, 20.0, EnergyLevel::Low, 0.2)]),
                Difficulty::Beginner,
                EnergyLevel::High,
                Style::Energetic,
            )
            .unwrap();
        // Low section shifted up one step by a high-energy request.
        assert!(bp.moves.iter().all(|m| m.clip_id.starts_with("medium-")));
    }

    #[test]
    fn task_ids_are_unique() {
        let g = generator(library());
        let f = features(vec![section(0.0, 10.0, EnergyLevel::Medium, 0.2)]);
        let a = g
            .generate_from_features("a.mp3", &f, Difficulty::Beginner, EnergyLevel::Medium, Style::Playful)
            .unwrap();
        let b = g
            .generate_from_features("a.mp3", &f, Difficulty::Beginner, EnergyLevel::Medium, Style::Playful)
            .unwrap();
        assert_ne!(a.task_id, b.task_id);
    }

    // -- Relaxation --

    #[test]
    fn style_is_relaxed_before_difficulty() {
        let moves = vec![
            mv("a", Difficulty::Beginner, EnergyLevel::Medium, Style::Romantic, 4.0),
            mv("b", Difficulty::Beginner, EnergyLevel::Medium, Style::Sensual, 4.0),
            mv("c", Difficulty::Advanced, EnergyLevel::Medium, Style::Playful, 4.0),
        ];
        let g = generator(moves);
        let bp = g
            .generate_from_features(
                "a.mp3",
                &features(vec![section(0.0, 16.0, EnergyLevel::Medium, 0.2)]),
                Difficulty::Beginner,
                EnergyLevel::Medium,
                Style::Playful,
            )
            .unwrap();
        assert!(bp.moves.iter().all(|m| m.clip_id == "a" || m.clip_id == "b"));
        assert_eq!(bp.generation_parameters["sections"][0]["relaxation"], "style");
    }

    #[test]
    fn difficulty_is_relaxed_last() {
        let moves = vec![
            mv("x", Difficulty::Advanced, EnergyLevel::Medium, Style::Playful, 4.0),
            mv("y", Difficulty::Intermediate, EnergyLevel::Medium, Style::Romantic, 4.0),
        ];
        let g = generator(moves);
        let bp = g
            .generate_from_features(
                "a.mp3",
                &features(vec![section(0.0, 12.0, EnergyLevel::Medium, 0.2)]),
                Difficulty::Beginner,
                EnergyLevel::Medium,
                Style::Playful,
            )
            .unwrap();
        assert_eq!(
            bp.generation_parameters["sections"][0]["relaxation"],
            "style_and_difficulty"
        );
    }

    #[test]
    fn no_energy_match_is_a_generation_error() {
        let moves = vec![mv("a", Difficulty::Beginner, EnergyLevel::High, Style::Playful, 4.0)];
        let g = generator(moves);
        let err = g
            .generate_from_features(
                "a.mp3",
                &features(vec![section(0.0, 12.0, EnergyLevel::Low, 0.2)]),
                Difficulty::Beginner,
                EnergyLevel::Medium,
                Style::Playful,
            )
            .unwrap_err();
        assert!(matches!(err, GenerationError::NoMatchingMoves { section: 0, .. }));
    }

    #[test]
    fn single_candidate_cannot_fill_long_section() {
        let moves = vec![mv("only", Difficulty::Beginner, EnergyLevel::Medium, Style::Playful, 4.0)];
        let g = generator(moves);
        let err = g
            .generate_from_features(
                "a.mp3",
                &features(vec![section(0.0, 12.0, EnergyLevel::Medium, 0.2)]),
                Difficulty::Beginner,
                EnergyLevel::Medium,
                Style::Playful,
            )
            .unwrap_err();
        assert!(matches!(err, GenerationError::InsufficientVariety { section: 0 }));
    }

    // -- Rotation --

    #[test]
    fn repeated_filters_rotate_starting_move() {
        let g = generator(library());
        let bp = g
            .generate_from_features(
                "a.mp3",
                &features(vec![
                    section(0.0, 10.0, EnergyLevel::Medium, 0.2),
                    section(10.0, 20.0, EnergyLevel::High, 0.3),
                    section(20.0, 30.0, EnergyLevel::Medium, 0.2),
                ]),
                Difficulty::Beginner,
                EnergyLevel::Medium,
                Style::Playful,
            )
            .unwrap();
        let first_of = |t: f64| {
            bp.moves
                .iter()
                .find(|m| m.end_time() > t + CROSSFADE_SECONDS + 1e-6)
                .map(|m| m.clip_id.clone())
                .unwrap()
        };
        assert_ne!(first_of(0.0), first_of(20.0));
    }

    // -- Input checks --

    #[test]
    fn rejects_escaping_audio_path() {
        let g = generator(library());
        let err = g
            .generate_from_features(
                "../song.mp3",
                &four_sections(),
                Difficulty::Beginner,
                EnergyLevel::Medium,
                Style::Playful,
            )
            .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn generate_rejects_missing_audio_file() {
        let g = generator(library());
        let err = g
            .generate("music/missing.mp3", Difficulty::Beginner, EnergyLevel::Medium, Style::Playful)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidInput(_)));
    }
}
