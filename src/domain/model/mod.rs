// Domain models - Core types and data structures

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;

/// Time specification with precision - represents time in seconds with fractional precision
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct TimeSpec {
    pub seconds: f64,
}

impl TimeSpec {
    /// Create a new TimeSpec from seconds
    pub fn from_seconds(seconds: f64) -> Self {
        Self { seconds }
    }

    /// Create a new TimeSpec from milliseconds
    pub fn from_millis(millis: u64) -> Self {
        Self {
            seconds: millis as f64 / 1000.0,
        }
    }

    pub fn as_seconds(&self) -> f64 {
        self.seconds
    }

    /// Whole milliseconds, rounded to the nearest
    pub fn as_millis(&self) -> i64 {
        (self.seconds * 1000.0).round() as i64
    }

    /// Parse time string in various formats
    pub fn parse(time_str: &str) -> Result<Self, DomainError> {
        let trimmed = time_str.trim();

        // Try parsing as seconds (float)
        if let Ok(seconds) = trimmed.parse::<f64>() {
            if !seconds.is_finite() {
                return Err(DomainError::BadArgs("Time must be a finite number".to_string()));
            }
            if seconds < 0.0 {
                return Err(DomainError::BadArgs("Time cannot be negative".to_string()));
            }
            return Ok(Self::from_seconds(seconds));
        }

        let parts: Vec<&str> = trimmed.split(':').collect();
        let (hours, minutes, seconds_part) = match parts.as_slice() {
            [minutes, seconds] => (0, parse_component(minutes, "minutes")?, *seconds),
            [hours, minutes, seconds] => {
                let minutes = parse_component(minutes, "minutes")?;
                if minutes >= 60 {
                    return Err(DomainError::BadArgs("Minutes must be less than 60".to_string()));
                }
                (parse_component(hours, "hours")?, minutes, *seconds)
            }
            _ => {
                return Err(DomainError::BadArgs(
                    "Invalid time format. Supported formats: seconds (e.g., 123.45), MM:SS.ms (e.g., 2:30.5), HH:MM:SS.ms (e.g., 1:02:30.5)".to_string()
                ))
            }
        };

        let seconds = seconds_part
            .parse::<f64>()
            .map_err(|_| DomainError::BadArgs("Invalid seconds format".to_string()))?;
        if !(0.0..60.0).contains(&seconds) {
            return Err(DomainError::BadArgs("Seconds must be less than 60".to_string()));
        }

        Ok(Self::from_seconds(
            hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds,
        ))
    }

    /// Format as HH:MM:SS.ms
    pub fn format_hms(&self) -> String {
        let total_ms = self.as_millis().max(0) as u64;
        let hours = total_ms / 3_600_000;
        let minutes = (total_ms % 3_600_000) / 60_000;
        let seconds = (total_ms % 60_000) / 1000;
        let milliseconds = total_ms % 1000;

        if hours > 0 {
            format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, milliseconds)
        } else {
            format!("{:02}:{:02}.{:03}", minutes, seconds, milliseconds)
        }
    }
}

fn parse_component(value: &str, name: &str) -> Result<u32, DomainError> {
    value
        .parse::<u32>()
        .map_err(|_| DomainError::BadArgs(format!("Invalid {} format", name)))
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_hms())
    }
}

/// Clockwise display rotation of a video stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Snap an arbitrary angle to the nearest quarter turn
    pub fn from_degrees(degrees: f64) -> Option<Self> {
        if !degrees.is_finite() {
            return None;
        }
        let quarter = ((degrees / 90.0).round() as i64).rem_euclid(4);
        Some(match quarter {
            0 => Rotation::None,
            1 => Rotation::Cw90,
            2 => Rotation::Cw180,
            _ => Rotation::Cw270,
        })
    }

    pub fn degrees(&self) -> u16 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }

    /// Whether the rotation exchanges the width and height axes
    pub fn swaps_axes(&self) -> bool {
        matches!(self, Rotation::Cw90 | Rotation::Cw270)
    }
}

/// Metadata probed from a source file
///
/// Unknown dimensions are reported as 0. A probe is never cached across jobs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceProbe {
    pub duration_ms: u64,
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    pub audio_supported: bool,
}

impl SourceProbe {
    pub fn height_known(&self) -> bool {
        self.height > 0
    }

    /// Natural (un-rotated) frame is taller than it is wide
    pub fn is_portrait(&self) -> bool {
        self.width > 0 && self.width < self.height
    }
}

/// Validated [start, end) millisecond window of the source to retain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipRange {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl ClipRange {
    pub fn span_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }

    pub fn start(&self) -> TimeSpec {
        TimeSpec::from_millis(self.start_ms)
    }

    pub fn span(&self) -> TimeSpec {
        TimeSpec::from_millis(self.span_ms())
    }
}

/// Aspect-preserving scale-to-fit; exactly one axis carries a bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleEffect {
    pub target_width: Option<u32>,
    pub target_height: Option<u32>,
}

impl ScaleEffect {
    pub fn fit_height(height: u32) -> Self {
        Self {
            target_width: None,
            target_height: Some(height),
        }
    }

    pub fn fit_width(width: u32) -> Self {
        Self {
            target_width: Some(width),
            target_height: None,
        }
    }

    /// The single bound, whichever axis it constrains
    pub fn bound(&self) -> u32 {
        self.target_width.or(self.target_height).unwrap_or(0)
    }

    pub fn constrains_width(&self) -> bool {
        self.target_width.is_some()
    }
}

/// One geometric step of an effect chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Rotate { degrees: u16 },
    Scale(ScaleEffect),
}

/// What happens to the audio track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioPolicy {
    #[default]
    Keep,
    Drop,
}

/// Ordered transforms applied during encoding; rotation always precedes scaling
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EffectChain {
    pub effects: Vec<Effect>,
    pub audio: AudioPolicy,
}

impl EffectChain {
    /// No geometric effects, only an audio policy
    pub fn untransformed(audio: AudioPolicy) -> Self {
        Self {
            effects: Vec::new(),
            audio,
        }
    }

    pub fn rotation(&self) -> Option<u16> {
        self.effects.iter().find_map(|effect| match effect {
            Effect::Rotate { degrees } => Some(*degrees),
            _ => None,
        })
    }

    pub fn scale(&self) -> Option<ScaleEffect> {
        self.effects.iter().find_map(|effect| match effect {
            Effect::Scale(scale) => Some(*scale),
            _ => None,
        })
    }

    pub fn has_video_effects(&self) -> bool {
        !self.effects.is_empty()
    }
}

/// Request flavour at the caller boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformMode {
    /// Clip and re-encode through the effect chain
    #[default]
    Transcode,
    /// Clip with a minimum span; stream copy unless a target height is given
    TrimOnly,
}

impl FromStr for TransformMode {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "transcode" => Ok(TransformMode::Transcode),
            "trim" | "trim_only" | "trim-only" | "trimonly" => Ok(TransformMode::TrimOnly),
            _ => Err(DomainError::BadArgs(format!(
                "Invalid mode: {}. Valid modes: transcode, trim_only",
                value
            ))),
        }
    }
}

impl fmt::Display for TransformMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformMode::Transcode => write!(f, "transcode"),
            TransformMode::TrimOnly => write!(f, "trim_only"),
        }
    }
}

/// Policy defaults for requests that leave fields unset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformDefaults {
    pub target_height: u32,
    pub mode: TransformMode,
    /// Minimum span for trim-only jobs
    pub min_trim_span_ms: u64,
    /// Output frame rate of the flatten phase
    pub flatten_frame_rate: u32,
}

impl Default for TransformDefaults {
    fn default() -> Self {
        Self {
            target_height: 480,
            mode: TransformMode::Transcode,
            min_trim_span_ms: 1000,
            flatten_frame_rate: 30,
        }
    }
}

/// A caller's request to produce one clipped output
#[derive(Debug, Clone, PartialEq)]
pub struct TransformRequest {
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub target_height: Option<u32>,
    /// Unset falls back to the configured default mode
    pub mode: Option<TransformMode>,
    /// Flatten variable frame rate before clipping (two-phase job)
    pub normalize_frame_rate: bool,
}

impl TransformRequest {
    pub fn new(
        source_path: impl Into<PathBuf>,
        dest_path: impl Into<PathBuf>,
        start_seconds: f64,
        end_seconds: f64,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            dest_path: dest_path.into(),
            start_seconds,
            end_seconds,
            target_height: None,
            mode: None,
            normalize_frame_rate: false,
        }
    }

    pub fn with_mode(mut self, mode: TransformMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_target_height(mut self, height: u32) -> Self {
        self.target_height = Some(height);
        self
    }

    pub fn with_frame_rate_normalization(mut self, enabled: bool) -> Self {
        self.normalize_frame_rate = enabled;
        self
    }

    /// Reject malformed fields before any job is created
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.source_path.as_os_str().is_empty() {
            return Err(DomainError::BadArgs("Source path cannot be empty".to_string()));
        }
        if self.dest_path.as_os_str().is_empty() {
            return Err(DomainError::BadArgs("Destination path cannot be empty".to_string()));
        }
        if same_file(&self.source_path, &self.dest_path) {
            return Err(DomainError::BadArgs(
                "Destination must differ from the source".to_string(),
            ));
        }
        if !self.start_seconds.is_finite() || !self.end_seconds.is_finite() {
            return Err(DomainError::BadArgs("Times must be finite numbers".to_string()));
        }
        if self.start_seconds < 0.0 {
            return Err(DomainError::BadArgs(format!(
                "Start time cannot be negative: {}",
                self.start_seconds
            )));
        }
        if self.end_seconds < self.start_seconds {
            return Err(DomainError::BadArgs(format!(
                "End time ({}) must not precede start time ({})",
                self.end_seconds, self.start_seconds
            )));
        }
        if self.target_height == Some(0) {
            return Err(DomainError::BadArgs("Target height must be positive".to_string()));
        }
        Ok(())
    }

    pub fn start_ms(&self) -> i64 {
        TimeSpec::from_seconds(self.start_seconds).as_millis()
    }

    pub fn end_ms(&self) -> i64 {
        TimeSpec::from_seconds(self.end_seconds).as_millis()
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Identifier of a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Lifecycle of a transform job; moves forward only
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobPhase {
    NotStarted,
    Phase1Running,
    Phase2Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobPhase::Succeeded | JobPhase::Failed | JobPhase::Cancelled
        )
    }
}

/// Terminal result of one job, reported exactly once
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded { output: PathBuf },
    Failed(DomainError),
    Cancelled,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded { .. })
    }

    pub fn phase(&self) -> JobPhase {
        match self {
            JobOutcome::Succeeded { .. } => JobPhase::Succeeded,
            JobOutcome::Failed(_) => JobPhase::Failed,
            JobOutcome::Cancelled => JobPhase::Cancelled,
        }
    }
}

impl From<Result<PathBuf, DomainError>> for JobOutcome {
    fn from(result: Result<PathBuf, DomainError>) -> Self {
        match result {
            Ok(output) => JobOutcome::Succeeded { output },
            Err(DomainError::Cancelled) => JobOutcome::Cancelled,
            Err(err) => JobOutcome::Failed(err),
        }
    }
}

/// What a job streams back to its caller
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// Overall progress in [0.0, 1.0]
    Progress(f64),
    Finished(JobOutcome),
}
