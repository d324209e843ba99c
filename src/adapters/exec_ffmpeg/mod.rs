//! FFmpeg execution adapter
//!
//! Each engine session is one `ffmpeg` child process. Progress is read from
//! `-progress pipe:1`, the stderr tail becomes the failure message, and
//! cancellation kills the child.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, EnginePhase};
use crate::domain::model::*;
use crate::ports::*;

/// Lines of stderr kept for the failure message
const STDERR_TAIL_LINES: usize = 8;

/// Encoder knobs applied to every re-encoding session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub audio_codec: String,
    pub threads: usize,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            preset: "medium".to_string(),
            crf: 23,
            audio_codec: "aac".to_string(),
            threads: default_thread_count(),
        }
    }
}

/// 75% of the CPU cores, at least 1 and at most 16
pub fn default_thread_count() -> usize {
    let cpu_count = num_cpus::get();
    let optimal_threads = (cpu_count as f64 * 0.75).ceil() as usize;
    optimal_threads.clamp(1, 16)
}

/// FFmpeg-based transform engine
pub struct FfmpegEngine {
    ffmpeg_bin: PathBuf,
    settings: EncoderSettings,
}

impl FfmpegEngine {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>, settings: EncoderSettings) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            settings,
        }
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }
}

#[async_trait]
impl TransformEngine for FfmpegEngine {
    async fn start_session(&self, spec: SessionSpec) -> Result<EngineSession, DomainError> {
        if let Some(parent) = spec.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                DomainError::Io(format!(
                    "failed to create output directory {}: {}",
                    parent.display(),
                    err
                ))
            })?;
        }

        let args = build_args(&spec, &self.settings);
        debug!(ffmpeg = %self.ffmpeg_bin.display(), args = ?args, "Spawning ffmpeg");

        let mut child = tokio::process::Command::new(&self.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                DomainError::engine(
                    EnginePhase::Single,
                    format!("failed to start {}: {}", self.ffmpeg_bin.display(), err),
                )
            })?;

        let (progress_tx, progress_rx) = watch::channel(None);
        let (done_tx, done_rx) = oneshot::channel();
        let token = CancellationToken::new();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(track_progress(stdout, spec.expected_duration_ms, progress_tx));
        }
        let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(collect_tail(stderr)));

        let cancel = token.clone();
        let output = spec.output;
        tokio::spawn(async move {
            let result = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => Ok(output),
                    Ok(status) => {
                        let tail = join_tail(stderr_task).await;
                        let message = if tail.is_empty() {
                            format!("ffmpeg exited with {}", status)
                        } else {
                            tail
                        };
                        Err(SessionError::Failed(message))
                    }
                    Err(err) => Err(SessionError::Failed(format!("failed to wait for ffmpeg: {}", err))),
                },
                _ = cancel.cancelled() => {
                    if let Err(err) = child.kill().await {
                        warn!(error = %err, "Failed to kill ffmpeg");
                    }
                    Err(SessionError::Cancelled)
                }
            };
            let _ = done_tx.send(result);
        });

        Ok(EngineSession::new(progress_rx, done_rx, token))
    }
}

/// Translate one session into an ffmpeg command line
pub fn build_args(spec: &SessionSpec, settings: &EncoderSettings) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-nostdin".into(), "-y".into()];

    let rotates = spec.effects.rotation().is_some();
    if rotates {
        // The chain rotates explicitly; the input display matrix is zeroed so
        // it is not carried to the output and applied a second time
        args.extend([
            "-noautorotate".into(),
            "-display_rotation:v:0".into(),
            "0".into(),
        ]);
    }
    if let Some(clip) = spec.clip {
        args.push("-ss".into());
        args.push(format_seconds(clip.start_ms));
    }
    args.push("-i".into());
    args.push(spec.input.to_string_lossy().into_owned());
    if let Some(clip) = spec.clip {
        args.push("-t".into());
        args.push(format_seconds(clip.span_ms()));
    }

    args.push("-map".into());
    args.push("0:v:0".into());

    match spec.encode {
        EncodeMode::StreamCopy => {
            args.push("-map".into());
            args.push("0:a:0?".into());
            args.push("-c".into());
            args.push("copy".into());
        }
        EncodeMode::Reencode => {
            let filters = video_filters(&spec.effects);
            if !filters.is_empty() {
                args.push("-vf".into());
                args.push(filters.join(","));
            }
            args.extend([
                "-c:v".into(),
                settings.video_codec.clone(),
                "-preset".into(),
                settings.preset.clone(),
                "-crf".into(),
                settings.crf.to_string(),
                "-pix_fmt".into(),
                "yuv420p".into(),
            ]);
            if rotates {
                args.push("-metadata:s:v:0".into());
                args.push("rotate=0".into());
            }
            if let Some(rate) = spec.frame_rate {
                args.extend(["-fps_mode".into(), "cfr".into(), "-r".into(), rate.to_string()]);
            }
            match spec.effects.audio {
                AudioPolicy::Keep => {
                    args.extend([
                        "-map".into(),
                        "0:a:0?".into(),
                        "-c:a".into(),
                        settings.audio_codec.clone(),
                    ]);
                }
                AudioPolicy::Drop => args.push("-an".into()),
            }
            args.push("-threads".into());
            args.push(settings.threads.to_string());
        }
    }

    args.extend([
        "-movflags".into(),
        "+faststart".into(),
        "-progress".into(),
        "pipe:1".into(),
        "-nostats".into(),
    ]);
    args.push(spec.output.to_string_lossy().into_owned());
    args
}

/// Ordered `-vf` filters for an effect chain
pub fn video_filters(chain: &EffectChain) -> Vec<String> {
    chain
        .effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Rotate { degrees } => match degrees {
                90 => Some("transpose=clock".to_string()),
                180 => Some("hflip,vflip".to_string()),
                270 => Some("transpose=cclock".to_string()),
                _ => None,
            },
            Effect::Scale(scale) => Some(if scale.constrains_width() {
                format!("scale={}:-2:flags=lanczos", scale.bound())
            } else {
                format!("scale=-2:{}:flags=lanczos", scale.bound())
            }),
        })
        .collect()
}

fn format_seconds(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

/// Engine percent for one `-progress` line, if the line carries one
pub fn parse_progress_line(line: &str, expected_duration_ms: u64) -> Option<u8> {
    let line = line.trim();
    if line == "progress=end" {
        return Some(100);
    }
    // out_time_ms is in microseconds too
    let micros = line
        .strip_prefix("out_time_us=")
        .or_else(|| line.strip_prefix("out_time_ms="))?
        .trim()
        .parse::<i64>()
        .ok()?;
    if expected_duration_ms == 0 {
        return None;
    }
    let elapsed_ms = micros.max(0) as u64 / 1000;
    Some((elapsed_ms.saturating_mul(100) / expected_duration_ms).min(100) as u8)
}

async fn track_progress<R>(stdout: R, expected_duration_ms: u64, progress: watch::Sender<Option<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(percent) = parse_progress_line(&line, expected_duration_ms) {
            progress.send_if_modified(|current| {
                if current.map_or(true, |c| percent > c) {
                    *current = Some(percent);
                    true
                } else {
                    false
                }
            });
        }
    }
}

async fn collect_tail<R>(stderr: R) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into()
}

async fn join_tail(task: Option<JoinHandle<Vec<String>>>) -> String {
    match task {
        Some(task) => task.await.unwrap_or_default().join("\n"),
        None => String::new(),
    }
}
