//! Blueprint contract: the typed job descriptor handed from the generator
//! to the assembly job, and the single parse-and-validate boundary where
//! untyped JSON is accepted.
//!
//! Timeline rule: for consecutive moves `i-1, i`,
//! `start[i] == start[i-1] + duration[i-1] - overlap(transition[i])`, where
//! `overlap` is `0` for a cut and [`CROSSFADE_SECONDS`] for a cross-fade.
//! `total_duration` equals the end of the last move.
//!
//! [`parse_and_validate`] never fails fast: every violation found in the
//! document is collected into one [`ValidationError`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::paths::check_relative_path;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Fixed overlap of a cross-fade transition, in seconds.
pub const CROSSFADE_SECONDS: f64 = 0.5;

/// Tolerance for timeline arithmetic (1 ms).
pub const TIMELINE_TOLERANCE_SECS: f64 = 1e-3;

/// Environment variable carrying a blueprint document into a job process.
pub const BLUEPRINT_ENV: &str = "CHOREO_BLUEPRINT";

pub const DEFAULT_FORMAT: &str = "mp4";
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
pub const DEFAULT_VIDEO_BITRATE: &str = "4M";
pub const DEFAULT_AUDIO_BITRATE: &str = "192k";

pub const VALID_FORMATS: &[&str] = &["mp4", "mov", "mkv", "webm"];
pub const VALID_VIDEO_CODECS: &[&str] = &["libx264", "libx265", "libvpx-vp9", "libaom-av1", "prores_ks"];
pub const VALID_AUDIO_CODECS: &[&str] = &["aac", "libopus", "libmp3lame", "flac"];

// ---------------------------------------------------------------------------
// TransitionType
// ---------------------------------------------------------------------------

/// How a move is joined to the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionType {
    /// Hard cut, no overlap.
    #[default]
    Cut,
    /// Cross-fade overlapping the shared boundary by [`CROSSFADE_SECONDS`].
    Crossfade,
}

impl TransitionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cut => "cut",
            Self::Crossfade => "crossfade",
        }
    }

    /// Seconds by which this transition overlaps the previous move.
    pub fn overlap_secs(self) -> f64 {
        match self {
            Self::Cut => 0.0,
            Self::Crossfade => CROSSFADE_SECONDS,
        }
    }
}

impl FromStr for TransitionType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cut" => Ok(Self::Cut),
            "crossfade" => Ok(Self::Crossfade),
            other => Err(CoreError::Validation(format!(
                "Unknown transition type '{other}'. Valid: cut, crossfade"
            ))),
        }
    }
}

impl fmt::Display for TransitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Blueprint types
// ---------------------------------------------------------------------------

/// One clip placed on the output timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintMove {
    pub clip_id: String,
    /// Storage key of the clip, relative to the media root.
    #[serde(rename = "video_path", alias = "media_path")]
    pub media_path: String,
    /// Timeline position in seconds.
    pub start_time: f64,
    /// Seconds of the clip to use, starting at clip-local `0`.
    pub duration: f64,
    #[serde(default)]
    pub transition_type: TransitionType,
}

impl BlueprintMove {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Encoding and destination settings for the rendered video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Storage key of the rendered video, relative to the media root.
    pub output_path: String,
    pub format: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub video_bitrate: String,
    pub audio_bitrate: String,
}

impl OutputConfig {
    /// Output config with default encoding settings.
    pub fn with_path(output_path: impl Into<String>) -> Self {
        Self {
            output_path: output_path.into(),
            format: DEFAULT_FORMAT.to_string(),
            video_codec: DEFAULT_VIDEO_CODEC.to_string(),
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            video_bitrate: DEFAULT_VIDEO_BITRATE.to_string(),
            audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
        }
    }
}

/// Immutable, validated job descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub task_id: String,
    /// Storage key of the music track.
    pub audio_path: String,
    pub moves: Vec<BlueprintMove>,
    pub total_duration: f64,
    #[serde(default)]
    pub generation_parameters: Value,
    pub output_config: OutputConfig,
}

impl Blueprint {
    /// End of the last move on the timeline (`0.0` for an empty list).
    pub fn timeline_end(&self) -> f64 {
        self.moves.last().map(BlueprintMove::end_time).unwrap_or(0.0)
    }

    /// Serialise for delivery to the job process.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Re-check every invariant on an already-typed blueprint.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        if self.task_id.trim().is_empty() {
            errors.push("task_id: must not be empty".to_string());
        }
        push_path_error(&mut errors, "audio_path", &self.audio_path);
        push_path_error(
            &mut errors,
            "output_config.output_path",
            &self.output_config.output_path,
        );
        errors.extend(output_settings_violations(&self.output_config));
        if self.moves.is_empty() {
            errors.push("moves: must contain at least one move".to_string());
        }
        for (i, m) in self.moves.iter().enumerate() {
            if m.clip_id.trim().is_empty() {
                errors.push(format!("moves[{i}].clip_id: must not be empty"));
            }
            push_path_error(&mut errors, &format!("moves[{i}].video_path"), &m.media_path);
        }
        errors.extend(timeline_violations(&self.moves, Some(self.total_duration)));
        ValidationError::check(Some(self.task_id.clone()), errors)
    }
}

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// Every problem found in a blueprint, collected in one pass.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Blueprint validation failed: {}", .errors.join("; "))]
pub struct ValidationError {
    /// Task id, when the document carried a usable one.
    pub task_id: Option<String>,
    pub errors: Vec<String>,
}

impl ValidationError {
    fn check(task_id: Option<String>, errors: Vec<String>) -> Result<(), Self> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self { task_id, errors })
        }
    }
}

// ---------------------------------------------------------------------------
// Timeline checks
// ---------------------------------------------------------------------------

/// Lay out moves back to back, honouring each move's transition overlap.
///
/// Input pairs are `(duration, transition)`; the result holds the start
/// time of each move. The first move starts at `0`.
pub fn layout_start_times(moves: &[(f64, TransitionType)]) -> Vec<f64> {
    let mut starts = Vec::with_capacity(moves.len());
    let mut cursor = 0.0;
    for (i, (duration, transition)) in moves.iter().enumerate() {
        let start = if i == 0 {
            0.0
        } else {
            cursor - transition.overlap_secs()
        };
        starts.push(start);
        cursor = start + duration;
    }
    starts
}

/// Collect timeline violations for `moves`; `total_duration` is checked
/// against the last move's end when supplied.
pub fn timeline_violations(moves: &[BlueprintMove], total_duration: Option<f64>) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(first) = moves.first() else {
        return errors;
    };

    if first.start_time.abs() > TIMELINE_TOLERANCE_SECS {
        errors.push(format!(
            "moves[0].start_time: timeline must start at 0, got {}",
            first.start_time
        ));
    }
    if first.transition_type != TransitionType::Cut {
        errors.push(format!(
            "moves[0].transition_type: first move cannot use '{}'",
            first.transition_type
        ));
    }

    for (i, m) in moves.iter().enumerate() {
        if !m.duration.is_finite() || m.duration <= 0.0 {
            errors.push(format!("moves[{i}].duration: must be > 0, got {}", m.duration));
        }
        if i == 0 {
            continue;
        }
        let prev = &moves[i - 1];
        let overlap = m.transition_type.overlap_secs();
        if overlap > 0.0 && (m.duration <= overlap || prev.duration <= overlap) {
            errors.push(format!(
                "moves[{i}].transition_type: {} needs both adjacent moves longer than {overlap}s",
                m.transition_type
            ));
        }
        let expected = prev.end_time() - overlap;
        if (m.start_time - expected).abs() > TIMELINE_TOLERANCE_SECS {
            errors.push(format!(
                "moves[{i}].start_time: expected {expected:.3} after moves[{}], got {:.3}",
                i - 1,
                m.start_time
            ));
        }
    }

    if let (Some(total), Some(last)) = (total_duration, moves.last()) {
        if (total - last.end_time()).abs() > TIMELINE_TOLERANCE_SECS {
            errors.push(format!(
                "total_duration: {total:.3} does not match timeline end {:.3}",
                last.end_time()
            ));
        }
    }
    errors
}

fn output_settings_violations(cfg: &OutputConfig) -> Vec<String> {
    let mut errors = Vec::new();
    if !VALID_FORMATS.contains(&cfg.format.as_str()) {
        errors.push(format!(
            "output_config.format: unknown format '{}'. Valid: {VALID_FORMATS:?}",
            cfg.format
        ));
    }
    if !VALID_VIDEO_CODECS.contains(&cfg.video_codec.as_str()) {
        errors.push(format!(
            "output_config.video_codec: unknown codec '{}'. Valid: {VALID_VIDEO_CODECS:?}",
            cfg.video_codec
        ));
    }
    if !VALID_AUDIO_CODECS.contains(&cfg.audio_codec.as_str()) {
        errors.push(format!(
            "output_config.audio_codec: unknown codec '{}'. Valid: {VALID_AUDIO_CODECS:?}",
            cfg.audio_codec
        ));
    }
    for (field, value) in [
        ("video_bitrate", &cfg.video_bitrate),
        ("audio_bitrate", &cfg.audio_bitrate),
    ] {
        if !is_valid_bitrate(value) {
            errors.push(format!(
                "output_config.{field}: '{value}' is not a bitrate like '192k' or '4M'"
            ));
        }
    }
    errors
}

/// Bitrates are a positive integer with an optional `k`/`K`/`M` suffix.
fn is_valid_bitrate(s: &str) -> bool {
    let digits = s.strip_suffix(['k', 'K', 'M']).unwrap_or(s);
    !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
        && digits.bytes().any(|b| b != b'0')
}

fn push_path_error(errors: &mut Vec<String>, field: &str, path: &str) {
    if let Err(reason) = check_relative_path(path) {
        errors.push(format!("{field}: {reason}"));
    }
}

// ---------------------------------------------------------------------------
// Parse boundary
// ---------------------------------------------------------------------------

/// Parse a blueprint JSON document and validate every field.
///
/// Unknown fields are ignored. Returns the typed [`Blueprint`] or a
/// [`ValidationError`] listing every violation.
pub fn parse_and_validate(json_text: &str) -> Result<Blueprint, ValidationError> {
    let value: Value = serde_json::from_str(json_text).map_err(|e| ValidationError {
        task_id: None,
        errors: vec![format!("document: invalid JSON: {e}")],
    })?;
    let Some(obj) = value.as_object() else {
        return Err(ValidationError {
            task_id: None,
            errors: vec!["document: must be a JSON object".to_string()],
        });
    };

    let mut errors = Vec::new();

    let task_id = required_str(obj, "task_id", "task_id", &mut errors);
    let audio_path = required_str(obj, "audio_path", "audio_path", &mut errors);
    if let Some(p) = &audio_path {
        push_path_error(&mut errors, "audio_path", p);
    }

    let parsed = parse_moves(obj, &mut errors);
    let output_config = parse_output_config(obj, &mut errors);

    let total_duration = match obj.get("total_duration") {
        None | Some(Value::Null) => None,
        Some(v) => match v.as_f64() {
            Some(t) if t.is_finite() && t > 0.0 => Some(t),
            _ => {
                errors.push(format!("total_duration: must be a positive number, got {v}"));
                None
            }
        },
    };

    let generation_parameters = obj
        .get("generation_parameters")
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));

    // Timing is checked even when other move fields are broken.
    let total_check = if parsed.timeline_complete { total_duration } else { None };
    errors.extend(timeline_violations(&parsed.timeline, total_check));
    let moves = parsed.moves;

    match (task_id, audio_path, moves, output_config) {
        (Some(task_id), Some(audio_path), Some(moves), Some(output_config)) if errors.is_empty() => {
            let total_duration = total_duration.unwrap_or_else(|| {
                moves.last().map(BlueprintMove::end_time).unwrap_or(0.0)
            });
            Ok(Blueprint {
                task_id,
                audio_path,
                moves,
                total_duration,
                generation_parameters,
                output_config,
            })
        }
        (task_id, ..) => {
            if errors.is_empty() {
                errors.push("document: blueprint is incomplete".to_string());
            }
            Err(ValidationError { task_id, errors })
        }
    }
}

/// Result of reading the `moves` array.
#[derive(Default)]
struct ParsedMoves {
    /// Every move, present only when each entry is valid.
    moves: Option<Vec<BlueprintMove>>,
    /// Leading run of moves whose timing fields parsed, for the timeline
    /// check. Unparsed identity fields are left empty.
    timeline: Vec<BlueprintMove>,
    /// `timeline` covers every entry.
    timeline_complete: bool,
}

/// Parse the `moves` array.
fn parse_moves(obj: &Map<String, Value>, errors: &mut Vec<String>) -> ParsedMoves {
    let raw = match obj.get("moves") {
        None | Some(Value::Null) => {
            errors.push("moves: required field is missing".to_string());
            return ParsedMoves::default();
        }
        Some(Value::Array(items)) => items,
        Some(other) => {
            errors.push(format!("moves: must be an array, got {}", type_name(other)));
            return ParsedMoves::default();
        }
    };
    if raw.is_empty() {
        errors.push("moves: must contain at least one move".to_string());
        return ParsedMoves::default();
    }

    let before = errors.len();
    let mut moves = Vec::with_capacity(raw.len());
    let mut timeline = Vec::with_capacity(raw.len());
    let mut timing_broken = false;
    for (i, item) in raw.iter().enumerate() {
        let Some(m) = item.as_object() else {
            errors.push(format!("moves[{i}]: must be an object, got {}", type_name(item)));
            timing_broken = true;
            continue;
        };
        let clip_id = required_str(m, "clip_id", &format!("moves[{i}].clip_id"), errors);
        let media_path = match m.get("video_path").or_else(|| m.get("media_path")) {
            Some(Value::String(s)) => {
                push_path_error(errors, &format!("moves[{i}].video_path"), s);
                Some(s.clone())
            }
            Some(other) => {
                errors.push(format!(
                    "moves[{i}].video_path: must be a string, got {}",
                    type_name(other)
                ));
                None
            }
            None => {
                errors.push(format!("moves[{i}].video_path: required field is missing"));
                None
            }
        };
        let start_time = required_number(m, "start_time", &format!("moves[{i}].start_time"), errors);
        if let Some(t) = start_time {
            if t < 0.0 {
                errors.push(format!("moves[{i}].start_time: must be >= 0, got {t}"));
            }
        }
        let duration = required_number(m, "duration", &format!("moves[{i}].duration"), errors);
        let transition_type = match m.get("transition_type") {
            None | Some(Value::Null) => Some(TransitionType::Cut),
            Some(Value::String(s)) => match s.parse::<TransitionType>() {
                Ok(t) => Some(t),
                Err(e) => {
                    errors.push(format!("moves[{i}].transition_type: {e}"));
                    None
                }
            },
            Some(other) => {
                errors.push(format!(
                    "moves[{i}].transition_type: must be a string, got {}",
                    type_name(other)
                ));
                None
            }
        };

        match (start_time, duration, transition_type) {
            (Some(start_time), Some(duration), Some(transition_type)) if !timing_broken => {
                timeline.push(BlueprintMove {
                    clip_id: clip_id.clone().unwrap_or_default(),
                    media_path: media_path.clone().unwrap_or_default(),
                    start_time,
                    duration,
                    transition_type,
                });
            }
            _ => timing_broken = true,
        }

        if let (Some(clip_id), Some(media_path), Some(start_time), Some(duration), Some(transition_type)) =
            (clip_id, media_path, start_time, duration, transition_type)
        {
            moves.push(BlueprintMove {
                clip_id,
                media_path,
                start_time,
                duration,
                transition_type,
            });
        }
    }

    let complete = errors.len() == before && moves.len() == raw.len();
    ParsedMoves {
        moves: complete.then_some(moves),
        timeline_complete: !timing_broken,
        timeline,
    }
}

fn parse_output_config(obj: &Map<String, Value>, errors: &mut Vec<String>) -> Option<OutputConfig> {
    let cfg = match obj.get("output_config") {
        Some(Value::Object(cfg)) => cfg,
        None | Some(Value::Null) => {
            errors.push("output_config: required field is missing".to_string());
            errors.push("output_config.output_path: required field is missing".to_string());
            return None;
        }
        Some(other) => {
            errors.push(format!("output_config: must be an object, got {}", type_name(other)));
            return None;
        }
    };

    let output_path = required_str(cfg, "output_path", "output_config.output_path", errors);
    if let Some(p) = &output_path {
        push_path_error(errors, "output_config.output_path", p);
    }

    let mut out = OutputConfig::with_path(output_path.clone().unwrap_or_default());
    let before = errors.len();
    for (key, slot) in [
        ("format", &mut out.format),
        ("video_codec", &mut out.video_codec),
        ("audio_codec", &mut out.audio_codec),
        ("video_bitrate", &mut out.video_bitrate),
        ("audio_bitrate", &mut out.audio_bitrate),
    ] {
        match cfg.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) => *slot = s.clone(),
            Some(other) => errors.push(format!(
                "output_config.{key}: must be a string, got {}",
                type_name(other)
            )),
        }
    }
    errors.extend(output_settings_violations(&out));

    if output_path.is_some() && errors.len() == before {
        Some(out)
    } else {
        None
    }
}

fn required_str(
    obj: &Map<String, Value>,
    key: &str,
    field: &str,
    errors: &mut Vec<String>,
) -> Option<String> {
    match obj.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::String(_)) => {
            errors.push(format!("{field}: must not be empty"));
            None
        }
        None | Some(Value::Null) => {
            errors.push(format!("{field}: required field is missing"));
            None
        }
        Some(other) => {
            errors.push(format!("{field}: must be a string, got {}", type_name(other)));
            None
        }
    }
}

fn required_number(
    obj: &Map<String, Value>,
    key: &str,
    field: &str,
    errors: &mut Vec<String>,
) -> Option<f64> {
    match obj.get(key) {
        Some(Value::Number(n)) => match n.as_f64() {
            Some(v) if v.is_finite() => Some(v),
            _ => {
                errors.push(format!("{field}: must be a finite number"));
                None
            }
        },
        None | Some(Value::Null) => {
            errors.push(format!("{field}: required field is missing"));
            None
        }
        Some(other) => {
            errors.push(format!("{field}: must be a number, got {}", type_name(other)));
            None
        }
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_doc() -> Value {
        json!({
            "task_id": "task-1",
            "audio_path": "music/track.mp3",
            "moves": [
                { "clip_id": "m1", "video_path": "clips/m1.mp4", "start_time": 0.0, "duration": 4.0 },
                { "clip_id": "m2", "video_path": "clips/m2.mp4", "start_time": 4.0, "duration": 3.0,
                  "transition_type": "cut" },
                { "clip_id": "m3", "video_path": "clips/m3.mp4", "start_time": 6.5, "duration": 2.0,
                  "transition_type": "crossfade" }
            ],
            "total_duration": 8.5,
            "output_config": { "output_path": "renders/task-1.mp4" }
        })
    }

    fn parse(doc: &Value) -> Result<Blueprint, ValidationError> {
        parse_and_validate(&doc.to_string())
    }

    // -- Happy path --

    #[test]
    fn parses_valid_document_with_defaults() {
        let bp = parse(&valid_doc()).unwrap();
        assert_eq!(bp.task_id, "task-1");
        assert_eq!(bp.moves.len(), 3);
        assert_eq!(bp.moves[0].transition_type, TransitionType::Cut);
        assert_eq!(bp.moves[2].transition_type, TransitionType::Crossfade);
        assert_eq!(bp.output_config.format, DEFAULT_FORMAT);
        assert_eq!(bp.output_config.video_codec, DEFAULT_VIDEO_CODEC);
        assert!((bp.total_duration - 8.5).abs() < 1e-9);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let mut doc = valid_doc();
        doc["future_field"] = json!({"anything": true});
        doc["moves"][0]["mirror"] = json!(true);
        assert!(parse(&doc).is_ok());
    }

    #[test]
    fn missing_total_duration_is_derived() {
        let mut doc = valid_doc();
        doc.as_object_mut().unwrap().remove("total_duration");
        let bp = parse(&doc).unwrap();
        assert!((bp.total_duration - 8.5).abs() < 1e-9);
    }

    #[test]
    fn media_path_alias_is_accepted() {
        let mut doc = valid_doc();
        let m = doc["moves"][0].as_object_mut().unwrap();
        let path = m.remove("video_path").unwrap();
        m.insert("media_path".into(), path);
        assert!(parse(&doc).is_ok());
    }

    #[test]
    fn serialised_blueprint_parses_back() {
        let bp = parse(&valid_doc()).unwrap();
        let again = parse_and_validate(&bp.to_json().unwrap()).unwrap();
        assert_eq!(bp, again);
    }

    // -- Path safety --

    #[test]
    fn rejects_output_path_with_parent_segment() {
        let mut doc = valid_doc();
        doc["output_config"]["output_path"] = json!("../outside.mp4");
        let err = parse(&doc).unwrap_err();
        assert!(err.errors.iter().any(|e| e.starts_with("output_config.output_path")));
    }

    #[test]
    fn rejects_absolute_output_path() {
        let mut doc = valid_doc();
        doc["output_config"]["output_path"] = json!("/var/www/out.mp4");
        let err = parse(&doc).unwrap_err();
        assert!(err.errors.iter().any(|e| e.starts_with("output_config.output_path")));
    }

    #[test]
    fn rejects_unsafe_media_and_audio_paths() {
        let mut doc = valid_doc();
        doc["audio_path"] = json!("/etc/passwd");
        doc["moves"][1]["video_path"] = json!("clips/../../secret.mp4");
        let err = parse(&doc).unwrap_err();
        assert!(err.errors.iter().any(|e| e.starts_with("audio_path")));
        assert!(err.errors.iter().any(|e| e.starts_with("moves[1].video_path")));
    }

    // -- Collect-all behaviour --

    #[test]
    fn reports_every_missing_required_field_at_once() {
        let doc = json!({ "generation_parameters": {} });
        let err = parse(&doc).unwrap_err();
        let joined = err.errors.join("\n");
        assert!(joined.contains("task_id"));
        assert!(joined.contains("audio_path"));
        assert!(joined.contains("moves"));
        assert!(joined.contains("output_config.output_path"));
        assert!(err.errors.len() >= 4);
    }

    #[test]
    fn reports_missing_per_move_fields_and_bad_path_together() {
        let mut doc = valid_doc();
        doc["moves"][0] = json!({ "video_path": "clips/a.mp4" });
        doc["output_config"]["output_path"] = json!("/abs.mp4");
        let err = parse(&doc).unwrap_err();
        let joined = err.errors.join("\n");
        assert!(joined.contains("moves[0].clip_id"));
        assert!(joined.contains("moves[0].start_time"));
        assert!(joined.contains("moves[0].duration"));
        assert!(joined.contains("output_config.output_path"));
        assert_eq!(err.task_id.as_deref(), Some("task-1"));
    }

    #[test]
    fn path_error_and_timeline_gap_are_reported_together() {
        let mut doc = valid_doc();
        doc["moves"][0]["video_path"] = json!("../a.mp4");
        doc["moves"][1]["start_time"] = json!(5.0);
        let err = parse(&doc).unwrap_err();
        assert!(err.errors.iter().any(|e| e.starts_with("moves[0].video_path")));
        assert!(err.errors.iter().any(|e| e.starts_with("moves[1].start_time")));
    }

    #[test]
    fn timeline_stops_at_first_move_without_timing() {
        let mut doc = valid_doc();
        doc["moves"][1] = json!({ "clip_id": "m2", "video_path": "clips/m2.mp4" });
        doc["moves"][2]["start_time"] = json!(9.0);
        let err = parse(&doc).unwrap_err();
        assert!(err.errors.iter().any(|e| e.starts_with("moves[1].start_time")));
        assert!(!err.errors.iter().any(|e| e.starts_with("moves[2].start_time")));
        assert!(!err.errors.iter().any(|e| e.starts_with("total_duration")));
    }

    #[test]
    fn empty_moves_are_rejected() {
        let mut doc = valid_doc();
        doc["moves"] = json!([]);
        let err = parse(&doc).unwrap_err();
        assert!(err.errors.iter().any(|e| e.starts_with("moves:")));
    }

    #[test]
    fn invalid_json_is_a_validation_error() {
        let err = parse_and_validate("{not json").unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert!(err.task_id.is_none());
    }

    #[test]
    fn non_object_document_is_rejected() {
        assert!(parse_and_validate("[1, 2, 3]").is_err());
    }

    // -- Timeline --

    #[test]
    fn timeline_gap_is_rejected() {
        let mut doc = valid_doc();
        doc["moves"][1]["start_time"] = json!(4.5);
        let err = parse(&doc).unwrap_err();
        assert!(err.errors.iter().any(|e| e.starts_with("moves[1].start_time")));
    }

    #[test]
    fn total_duration_mismatch_is_rejected() {
        let mut doc = valid_doc();
        doc["total_duration"] = json!(12.0);
        let err = parse(&doc).unwrap_err();
        assert!(err.errors.iter().any(|e| e.starts_with("total_duration")));
    }

    #[test]
    fn first_move_cannot_crossfade() {
        let mut doc = valid_doc();
        doc["moves"][0]["transition_type"] = json!("crossfade");
        let err = parse(&doc).unwrap_err();
        assert!(err.errors.iter().any(|e| e.starts_with("moves[0].transition_type")));
    }

    #[test]
    fn unknown_transition_is_rejected() {
        let mut doc = valid_doc();
        doc["moves"][1]["transition_type"] = json!("wipe");
        let err = parse(&doc).unwrap_err();
        assert!(err.errors.iter().any(|e| e.starts_with("moves[1].transition_type")));
    }

    #[test]
    fn layout_start_times_applies_overlap() {
        let starts = layout_start_times(&[
            (4.0, TransitionType::Cut),
            (3.0, TransitionType::Cut),
            (2.0, TransitionType::Crossfade),
        ]);
        assert_eq!(starts, vec![0.0, 4.0, 6.5]);
    }

    // -- Output settings --

    #[test]
    fn output_settings_are_checked() {
        let mut doc = valid_doc();
        doc["output_config"]["format"] = json!("avi");
        doc["output_config"]["video_bitrate"] = json!("fast");
        let err = parse(&doc).unwrap_err();
        assert!(err.errors.iter().any(|e| e.starts_with("output_config.format")));
        assert!(err.errors.iter().any(|e| e.starts_with("output_config.video_bitrate")));
    }

    #[test]
    fn bitrate_format() {
        assert!(is_valid_bitrate("192k"));
        assert!(is_valid_bitrate("4M"));
        assert!(is_valid_bitrate("800000"));
        assert!(!is_valid_bitrate("0k"));
        assert!(!is_valid_bitrate("k"));
        assert!(!is_valid_bitrate("4.5M"));
    }

    // -- Typed validation --

    #[test]
    fn typed_validate_matches_parser() {
        let mut bp = parse(&valid_doc()).unwrap();
        assert!(bp.validate().is_ok());
        bp.output_config.output_path = "../x.mp4".into();
        bp.moves[1].start_time = 5.0;
        let err = bp.validate().unwrap_err();
        assert!(err.errors.len() >= 2);
    }
}
