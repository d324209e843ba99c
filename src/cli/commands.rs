//! Command implementations

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::adapters::exec_ffmpeg::FfmpegEngine;
use crate::adapters::probe_ffprobe::FfprobeAdapter;
use crate::adapters::toml_config::AppConfig;
use crate::cli::args::{ClipArgs, ProbeArgs};
use crate::cli::ProgressMode;
use crate::domain::model::{JobId, JobOutcome, TimeSpec, TransformMode, TransformRequest};
use crate::engine::{ConsoleProgressSink, JobSupervisor, JsonProgressSink, NoOpProgressSink};
use crate::ports::{ProbePort, ProgressSink};
use crate::utils::path::default_output_path;
use crate::utils::{format_duration, format_file_size};

/// Exit code after a successful job
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code after a failed job
pub const EXIT_FAILURE: i32 = 1;
/// Exit code after a cancelled job, as for SIGINT
pub const EXIT_CANCELLED: i32 = 130;

/// Build the transform request for a clip command
pub fn build_request(
    args: &ClipArgs,
    mode: TransformMode,
) -> Result<TransformRequest> {
    let start = TimeSpec::parse(&args.start)
        .with_context(|| format!("Invalid start time '{}'", args.start))?;
    let end = TimeSpec::parse(&args.end)
        .with_context(|| format!("Invalid end time '{}'", args.end))?;

    let output = match &args.output {
        Some(output) => output.clone(),
        None => default_output_path(&args.input, start.as_seconds(), end.as_seconds())?,
    };

    let mut request = TransformRequest::new(&args.input, output, start.as_seconds(), end.as_seconds())
        .with_mode(mode)
        .with_frame_rate_normalization(args.normalize_frame_rate);
    if let Some(height) = args.height {
        request = request.with_target_height(height);
    }
    Ok(request)
}

fn progress_sink(mode: ProgressMode) -> Box<dyn ProgressSink> {
    match mode {
        ProgressMode::Console => Box::new(ConsoleProgressSink::new(false)),
        ProgressMode::Json => Box::new(JsonProgressSink::new(true)),
        ProgressMode::None => Box::new(NoOpProgressSink),
    }
}

/// Execute `transcode` or `trim`; returns the process exit code
pub async fn clip(
    args: ClipArgs,
    mode: TransformMode,
    config: &AppConfig,
    progress: ProgressMode,
) -> Result<i32> {
    let request = build_request(&args, mode)?;
    info!(
        input = %request.source_path.display(),
        output = %request.dest_path.display(),
        start = request.start_seconds,
        end = request.end_seconds,
        mode = %mode,
        "Starting clip operation"
    );

    let probe = Arc::new(FfprobeAdapter::new(&config.ffmpeg.ffprobe_bin));
    let engine = Arc::new(FfmpegEngine::new(
        &config.ffmpeg.ffmpeg_bin,
        config.ffmpeg.encoder.clone(),
    ));
    let supervisor = Arc::new(JobSupervisor::new(probe, engine, config.job_policy()));
    let sink = progress_sink(progress);

    let handle = match supervisor.submit(request).await {
        Ok(handle) => handle,
        Err(err) => {
            sink.on_error(JobId(0), &err);
            return Ok(EXIT_FAILURE);
        }
    };

    let interrupt = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling");
                supervisor.cancel_active().await;
            }
        })
    };

    let started = Instant::now();
    let outcome = handle.wait_with(sink.as_ref()).await;
    interrupt.abort();
    supervisor.shutdown().await;

    Ok(match outcome {
        JobOutcome::Succeeded { output } => {
            let size = std::fs::metadata(&output).map(|m| m.len()).unwrap_or(0);
            info!(
                output = %output.display(),
                size = %format_file_size(size),
                elapsed = %format_duration(started.elapsed()),
                "Clip operation completed"
            );
            EXIT_SUCCESS
        }
        JobOutcome::Failed(_) => EXIT_FAILURE,
        JobOutcome::Cancelled => EXIT_CANCELLED,
    })
}

/// Execute `probe`
pub async fn probe(args: ProbeArgs, config: &AppConfig) -> Result<i32> {
    if !args.input.exists() {
        anyhow::bail!("Input file does not exist: {}", args.input.display());
    }

    let adapter = FfprobeAdapter::new(&config.ffmpeg.ffprobe_bin);
    let probe = adapter.probe(&args.input).await;

    if args.json {
        let json = serde_json::to_string_pretty(&probe).context("Failed to serialize probe")?;
        println!("{}", json);
    } else {
        println!("File:     {}", args.input.display());
        println!("Duration: {}", TimeSpec::from_millis(probe.duration_ms));
        println!("Size:     {}x{}", probe.width, probe.height);
        println!("Rotation: {} degrees", probe.rotation.degrees());
        println!(
            "Audio:    {}",
            if probe.audio_supported { "supported" } else { "absent or unsupported" }
        );
    }
    Ok(EXIT_SUCCESS)
}
