//! FFprobe adapter for source metadata probing
//!
//! Runs `ffprobe -print_format json` and extracts duration, display
//! dimensions, rotation and audio support. Every field that cannot be
//! resolved falls back to its default and is logged as degraded.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::errors::DomainError;
use crate::domain::model::*;
use crate::ports::ProbePort;

/// Audio codecs the container can carry without re-muxing trouble
const SUPPORTED_AUDIO_CODECS: &[&str] = &["aac", "mp3"];

/// FFprobe-based probe adapter
pub struct FfprobeAdapter {
    ffprobe_bin: PathBuf,
}

impl FfprobeAdapter {
    pub fn new(ffprobe_bin: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_bin: ffprobe_bin.into(),
        }
    }

    async fn run_ffprobe(&self, path: &Path) -> Result<String, DomainError> {
        let output = tokio::process::Command::new(&self.ffprobe_bin)
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| DomainError::ProbeDegraded {
                field: "all",
                reason: format!("failed to run {}: {}", self.ffprobe_bin.display(), err),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DomainError::ProbeDegraded {
                field: "all",
                reason: format!("ffprobe exited with {}: {}", output.status, stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ProbePort for FfprobeAdapter {
    async fn probe(&self, path: &Path) -> SourceProbe {
        match self.run_ffprobe(path).await {
            Ok(json) => {
                let probe = parse_probe_output(&json);
                debug!(path = %path.display(), ?probe, "Probe complete");
                probe
            }
            Err(err) => {
                warn!(path = %path.display(), code = err.code(), "{}", err);
                SourceProbe::default()
            }
        }
    }
}

fn degraded(field: &'static str, reason: impl Into<String>) {
    let err = DomainError::ProbeDegraded {
        field,
        reason: reason.into(),
    };
    warn!(code = err.code(), field, "{}", err);
}

/// Extract a [`SourceProbe`] from ffprobe's JSON document
pub fn parse_probe_output(json_str: &str) -> SourceProbe {
    let json: Value = match serde_json::from_str(json_str) {
        Ok(json) => json,
        Err(err) => {
            degraded("all", format!("unparseable ffprobe output: {}", err));
            return SourceProbe::default();
        }
    };

    let streams = json
        .get("streams")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let video = streams
        .iter()
        .find(|s| s.get("codec_type").and_then(Value::as_str) == Some("video"));
    let audio = streams
        .iter()
        .find(|s| s.get("codec_type").and_then(Value::as_str) == Some("audio"));

    let duration_ms = match parse_duration_ms(&json, video) {
        Some(ms) => ms,
        None => {
            degraded("duration", "no duration in format or video stream");
            0
        }
    };

    let (width, height) = match video.and_then(parse_dimensions) {
        Some(dims) => dims,
        None => {
            degraded("dimensions", "no video stream with width and height");
            (0, 0)
        }
    };

    let rotation = match video.map(parse_rotation) {
        Some(Ok(rotation)) => rotation,
        Some(Err(reason)) => {
            degraded("rotation", reason);
            Rotation::None
        }
        None => Rotation::None,
    };

    let audio_supported = match audio {
        Some(stream) => {
            let codec = stream
                .get("codec_name")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            SUPPORTED_AUDIO_CODECS.contains(&codec)
        }
        None => false,
    };

    SourceProbe {
        duration_ms,
        width,
        height,
        rotation,
        audio_supported,
    }
}

fn parse_seconds(value: Option<&Value>) -> Option<u64> {
    let seconds = match value? {
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    (seconds.is_finite() && seconds >= 0.0).then(|| (seconds * 1000.0).round() as u64)
}

fn parse_duration_ms(json: &Value, video: Option<&Value>) -> Option<u64> {
    parse_seconds(json.get("format").and_then(|f| f.get("duration")))
        .or_else(|| parse_seconds(video.and_then(|v| v.get("duration"))))
}

fn parse_dimensions(stream: &Value) -> Option<(u32, u32)> {
    let width = stream.get("width").and_then(Value::as_u64)?;
    let height = stream.get("height").and_then(Value::as_u64)?;
    Some((u32::try_from(width).ok()?, u32::try_from(height).ok()?))
}

/// Clockwise rotation from the `rotate` tag or the display matrix.
///
/// The display matrix reports counter-clockwise degrees, so it is negated.
fn parse_rotation(stream: &Value) -> Result<Rotation, String> {
    if let Some(tag) = stream
        .get("tags")
        .and_then(|t| t.get("rotate"))
        .and_then(Value::as_str)
    {
        let degrees: f64 = tag
            .trim()
            .parse()
            .map_err(|_| format!("unreadable rotate tag {:?}", tag))?;
        return Rotation::from_degrees(degrees)
            .ok_or_else(|| format!("rotate tag out of range: {}", tag));
    }

    let side_rotation = stream
        .get("side_data_list")
        .and_then(Value::as_array)
        .and_then(|list| list.iter().find_map(|sd| sd.get("rotation")));
    match side_rotation {
        Some(value) => {
            let degrees = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
            .ok_or_else(|| format!("unreadable display matrix rotation {}", value))?;
            Rotation::from_degrees(-degrees)
                .ok_or_else(|| format!("display matrix rotation out of range: {}", degrees))
        }
        None => Ok(Rotation::None),
    }
}
