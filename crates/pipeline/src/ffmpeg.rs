//! FFmpeg/FFprobe command utilities for rendering a blueprint.
//!
//! The whole render (trim every clip, join them with cuts or cross-fades,
//! trim and mux the music, encode) is a single ffmpeg invocation whose
//! `-filter_complex` graph is derived from a typed [`EncodePlan`].

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use choreo_core::blueprint::{Blueprint, TransitionType, CROSSFADE_SECONDS};
use choreo_core::config::{self, ConfigError};

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("ffmpeg did not finish within {secs}s")]
    Timeout { secs: u64 },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("video file not found: {0}")]
    VideoNotFound(String),

    #[error("invalid encode plan: {0}")]
    InvalidPlan(String),
}

// ---------------------------------------------------------------------------
// Encode plan
// ---------------------------------------------------------------------------

/// One clip of the output, already fetched to local disk.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeClip {
    pub input: PathBuf,
    /// Seconds taken from the start of the clip.
    pub duration: f64,
    /// Timeline start, used as the cross-fade offset.
    pub start_time: f64,
    pub transition: TransitionType,
}

/// Output frame geometry. Clips are scaled and padded to it so the
/// concat and xfade filters see identical streams.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

/// Everything ffmpeg needs to render one blueprint.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodePlan {
    pub clips: Vec<EncodeClip>,
    pub audio: PathBuf,
    pub total_duration: f64,
    pub output: PathBuf,
    pub format: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub video_bitrate: String,
    pub audio_bitrate: String,
    pub frame: FrameFormat,
}

impl EncodePlan {
    /// Build a plan from a validated blueprint. `local_path` maps each
    /// media path in the blueprint to its fetched copy.
    pub fn from_blueprint<F>(
        blueprint: &Blueprint,
        audio: PathBuf,
        output: PathBuf,
        local_path: F,
    ) -> Result<Self, FfmpegError>
    where
        F: Fn(&str) -> Option<PathBuf>,
    {
        if blueprint.moves.is_empty() {
            return Err(FfmpegError::InvalidPlan("blueprint has no moves".into()));
        }
        let clips = blueprint
            .moves
            .iter()
            .map(|m| {
                let input = local_path(&m.media_path).ok_or_else(|| {
                    FfmpegError::InvalidPlan(format!("no local copy of {}", m.media_path))
                })?;
                Ok(EncodeClip {
                    input,
                    duration: m.duration,
                    start_time: m.start_time,
                    transition: m.transition_type,
                })
            })
            .collect::<Result<Vec<_>, FfmpegError>>()?;

        let cfg = &blueprint.output_config;
        Ok(Self {
            clips,
            audio,
            total_duration: blueprint.total_duration,
            output,
            format: cfg.format.clone(),
            video_codec: cfg.video_codec.clone(),
            audio_codec: cfg.audio_codec.clone(),
            video_bitrate: cfg.video_bitrate.clone(),
            audio_bitrate: cfg.audio_bitrate.clone(),
            frame: FrameFormat::default(),
        })
    }

    fn has_crossfades(&self) -> bool {
        self.clips
            .iter()
            .skip(1)
            .any(|c| c.transition == TransitionType::Crossfade)
    }
}

/// ffmpeg muxer name for an output format.
fn muxer_for(format: &str) -> &str {
    match format {
        "mkv" => "matroska",
        other => other,
    }
}

/// Seconds with millisecond precision, the resolution of the timeline.
fn secs(value: f64) -> String {
    format!("{value:.3}")
}

/// The `-filter_complex` graph for a plan.
///
/// Inputs `0..n` are the clips in timeline order and input `n` is the
/// music. The graph exposes `[vout]` and `[aout]`.
pub fn filter_graph(plan: &EncodePlan) -> String {
    let n = plan.clips.len();
    let FrameFormat { width, height, fps } = plan.frame;
    let mut graph = String::new();

    for (i, clip) in plan.clips.iter().enumerate() {
        let _ = write!(
            graph,
            "[{i}:v]trim=start=0:duration={d},setpts=PTS-STARTPTS,\
             scale={width}:{height}:force_original_aspect_ratio=decrease,\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps},format=yuv420p[v{i}];",
            d = secs(clip.duration),
        );
    }

    if !plan.has_crossfades() {
        for i in 0..n {
            let _ = write!(graph, "[v{i}]");
        }
        let _ = write!(graph, "concat=n={n}:v=1:a=0[vout];");
    } else {
        // Fold left: `[j{i}]` is the timeline up to and including clip i.
        let mut acc = "v0".to_string();
        for (i, clip) in plan.clips.iter().enumerate().skip(1) {
            let out = if i + 1 == n { "vout".to_string() } else { format!("j{i}") };
            match clip.transition {
                TransitionType::Cut => {
                    let _ = write!(graph, "[{acc}][v{i}]concat=n=2:v=1:a=0[{out}];");
                }
                TransitionType::Crossfade => {
                    let _ = write!(
                        graph,
                        "[{acc}][v{i}]xfade=transition=fade:duration={d}:offset={o}[{out}];",
                        d = secs(CROSSFADE_SECONDS),
                        o = secs(clip.start_time),
                    );
                }
            }
            acc = out;
        }
    }

    let _ = write!(
        graph,
        "[{n}:a]atrim=start=0:duration={d},asetpts=PTS-STARTPTS[aout]",
        d = secs(plan.total_duration),
    );
    graph
}

/// Full ffmpeg argument list for a plan.
pub fn build_ffmpeg_args(plan: &EncodePlan) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-hide_banner", "-loglevel", "error", "-nostdin"]
        .into_iter()
        .map(String::from)
        .collect();

    for clip in &plan.clips {
        args.push("-i".into());
        args.push(clip.input.to_string_lossy().into_owned());
    }
    args.push("-i".into());
    args.push(plan.audio.to_string_lossy().into_owned());

    args.extend([
        "-filter_complex".to_string(),
        filter_graph(plan),
        "-map".into(),
        "[vout]".into(),
        "-map".into(),
        "[aout]".into(),
        "-c:v".into(),
        plan.video_codec.clone(),
        "-b:v".into(),
        plan.video_bitrate.clone(),
        "-c:a".into(),
        plan.audio_codec.clone(),
        "-b:a".into(),
        plan.audio_bitrate.clone(),
        "-t".into(),
        secs(plan.total_duration),
    ]);
    if matches!(plan.format.as_str(), "mp4" | "mov") {
        args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    }
    args.extend([
        "-f".to_string(),
        muxer_for(&plan.format).to_string(),
        plan.output.to_string_lossy().into_owned(),
    ]);
    args
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub duration: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
}

/// Parse the media duration in seconds from ffprobe output.
pub fn parse_duration(probe: &FfprobeOutput) -> Option<f64> {
    if let Some(secs) = probe.format.duration.as_deref().and_then(|d| d.parse().ok()) {
        return Some(secs);
    }
    // Fall back to the first video stream's duration.
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .and_then(|s| s.duration.as_deref())
        .and_then(|d| d.parse().ok())
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Renders an [`EncodePlan`] and inspects the result.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(&self, plan: &EncodePlan) -> Result<(), FfmpegError>;

    /// Duration of a rendered file in seconds.
    async fn probe_duration(&self, path: &Path) -> Result<f64, FfmpegError>;
}

/// Encoder settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub encode_timeout: Duration,
    /// Bound on one ffprobe run; the child is killed when it fires.
    pub probe_timeout: Duration,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            encode_timeout: Duration::from_secs(1800),
            probe_timeout: Duration::from_secs(60),
        }
    }
}

impl FfmpegConfig {
    /// | Env Var                      | Default   |
    /// |------------------------------|-----------|
    /// | `CHOREO_FFMPEG_PATH`         | `ffmpeg`  |
    /// | `CHOREO_FFPROBE_PATH`        | `ffprobe` |
    /// | `CHOREO_ENCODE_TIMEOUT_SECS` | `1800`    |
    /// | `CHOREO_PROBE_TIMEOUT_SECS`  | `60`      |
    pub fn from_lookup<L>(lookup: &L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let timeout = config::parse_or(lookup, "CHOREO_ENCODE_TIMEOUT_SECS", 1800u64)?;
        let probe_timeout = config::parse_or(lookup, "CHOREO_PROBE_TIMEOUT_SECS", 60u64)?;
        Ok(Self {
            ffmpeg_path: config::string_or(lookup, "CHOREO_FFMPEG_PATH", "ffmpeg").into(),
            ffprobe_path: config::string_or(lookup, "CHOREO_FFPROBE_PATH", "ffprobe").into(),
            encode_timeout: Duration::from_secs(config::require_positive(
                "CHOREO_ENCODE_TIMEOUT_SECS",
                timeout,
            )?),
            probe_timeout: Duration::from_secs(config::require_positive(
                "CHOREO_PROBE_TIMEOUT_SECS",
                probe_timeout,
            )?),
        })
    }
}

/// Encoder backed by the ffmpeg and ffprobe binaries.
#[derive(Debug, Clone, Default)]
pub struct FfmpegEncoder {
    config: FfmpegConfig,
}

impl FfmpegEncoder {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(&self, plan: &EncodePlan) -> Result<(), FfmpegError> {
        for clip in &plan.clips {
            if !clip.input.exists() {
                return Err(FfmpegError::VideoNotFound(clip.input.display().to_string()));
            }
        }

        let args = build_ffmpeg_args(plan);
        tracing::debug!(ffmpeg = %self.config.ffmpeg_path.display(), args = ?args, "Starting encode");

        // kill_on_drop: if the timeout fires the child is dropped and killed.
        let child = tokio::process::Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(FfmpegError::NotFound)?;

        let output = tokio::time::timeout(self.config.encode_timeout, child.wait_with_output())
            .await
            .map_err(|_| FfmpegError::Timeout {
                secs: self.config.encode_timeout.as_secs(),
            })??;

        if !output.status.success() {
            return Err(FfmpegError::ExecutionFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(())
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64, FfmpegError> {
        if !path.exists() {
            return Err(FfmpegError::VideoNotFound(path.to_string_lossy().to_string()));
        }

        let mut command = tokio::process::Command::new(&self.config.ffprobe_path);
        command
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        let output = tokio::time::timeout(self.config.probe_timeout, command.output())
            .await
            .map_err(|_| FfmpegError::Timeout {
                secs: self.config.probe_timeout.as_secs(),
            })?
            .map_err(FfmpegError::NotFound)?;

        if !output.status.success() {
            return Err(FfmpegError::ExecutionFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let probe = serde_json::from_str::<FfprobeOutput>(&stdout)
            .map_err(|e| FfmpegError::ParseError(format!("{e}: {stdout}")))?;
        parse_duration(&probe).ok_or_else(|| FfmpegError::ParseError("no duration reported".into()))
    }
}
