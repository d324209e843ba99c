//! Integration tests for the job supervisor and transform job state machine
//!
//! A scripted in-memory engine stands in for ffmpeg so that progress,
//! failure, cancellation and supersession can be driven deterministically.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use clipshrink::domain::errors::{DomainError, EnginePhase};
use clipshrink::domain::model::*;
use clipshrink::engine::{JobHandle, JobPolicy, JobSupervisor};
use clipshrink::ports::*;

// Test utilities

#[derive(Clone)]
enum Script {
    /// Report each percentage after a short delay, then write the output
    Succeed(Vec<u8>),
    /// Fail with the given engine message
    Fail(&'static str),
    /// Write a partial output, report some progress, then wait for cancellation
    Hang,
}

struct SessionRecord {
    spec: SessionSpec,
    /// Existence of every earlier flatten temp file when this session started
    earlier_temps: Vec<(PathBuf, bool)>,
}

#[derive(Default)]
struct ScriptedEngine {
    scripts: Mutex<VecDeque<Script>>,
    sessions: Mutex<Vec<SessionRecord>>,
}

impl ScriptedEngine {
    fn with_scripts(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            sessions: Mutex::new(Vec::new()),
        })
    }

    fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    fn spec(&self, index: usize) -> SessionSpec {
        self.sessions.lock().unwrap()[index].spec.clone()
    }

    fn earlier_temps(&self, index: usize) -> Vec<(PathBuf, bool)> {
        self.sessions.lock().unwrap()[index].earlier_temps.clone()
    }

    async fn wait_for_sessions(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.session_count() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("engine session never started");
    }
}

fn is_flatten_temp(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with("flatten_"))
        .unwrap_or(false)
}

#[async_trait]
impl TransformEngine for ScriptedEngine {
    async fn start_session(&self, spec: SessionSpec) -> Result<EngineSession, DomainError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::Succeed(vec![25, 50, 75, 100]));

        {
            let mut sessions = self.sessions.lock().unwrap();
            let earlier_temps = sessions
                .iter()
                .map(|record| record.spec.output.clone())
                .filter(|path| is_flatten_temp(path))
                .map(|path| {
                    let exists = path.exists();
                    (path, exists)
                })
                .collect();
            sessions.push(SessionRecord {
                spec: spec.clone(),
                earlier_temps,
            });
        }

        let (progress_tx, progress_rx) = watch::channel(None);
        let (done_tx, done_rx) = oneshot::channel();
        let token = CancellationToken::new();
        let cancel = token.clone();
        let output = spec.output.clone();

        tokio::spawn(async move {
            let result = match script {
                Script::Succeed(steps) => {
                    let mut result = Ok(output.clone());
                    for step in steps {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                result = Err(SessionError::Cancelled);
                                break;
                            }
                            _ = tokio::time::sleep(Duration::from_millis(15)) => {
                                let _ = progress_tx.send(Some(step));
                            }
                        }
                    }
                    if result.is_ok() {
                        std::fs::write(&output, b"encoded").unwrap();
                    }
                    result
                }
                Script::Fail(message) => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Err(SessionError::Failed(message.to_string()))
                }
                Script::Hang => {
                    std::fs::write(&output, b"partial").unwrap();
                    let _ = progress_tx.send(Some(30));
                    cancel.cancelled().await;
                    Err(SessionError::Cancelled)
                }
            };
            let _ = done_tx.send(result);
        });

        Ok(EngineSession::new(progress_rx, done_rx, token))
    }
}

struct StubProbe {
    probe: SourceProbe,
}

#[async_trait]
impl ProbePort for StubProbe {
    async fn probe(&self, _path: &Path) -> SourceProbe {
        self.probe.clone()
    }
}

/// Answers the first `answers` probes, then never returns
struct StallingProbe {
    answers: usize,
    calls: AtomicUsize,
}

impl StallingProbe {
    fn after(answers: usize) -> Arc<Self> {
        Arc::new(Self {
            answers,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ProbePort for StallingProbe {
    async fn probe(&self, _path: &Path) -> SourceProbe {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.answers {
            return landscape_probe(10_000).probe.clone();
        }
        std::future::pending().await
    }
}

fn landscape_probe(duration_ms: u64) -> Arc<StubProbe> {
    Arc::new(StubProbe {
        probe: SourceProbe {
            duration_ms,
            width: 1920,
            height: 1080,
            rotation: Rotation::None,
            audio_supported: true,
        },
    })
}

fn policy(temp: &Path) -> JobPolicy {
    JobPolicy::default()
        .with_poll_interval(Duration::from_millis(5))
        .with_cancel_grace(Duration::from_secs(2))
        .with_temp_dir(temp)
}

struct Fixture {
    dir: TempDir,
    temp: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            temp: TempDir::new().unwrap(),
        }
    }

    fn request(&self, start: f64, end: f64) -> TransformRequest {
        TransformRequest::new(self.dir.path().join("in.mp4"), self.dest(), start, end)
    }

    fn dest(&self) -> PathBuf {
        self.dir.path().join("out.mp4")
    }

    fn temp_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.temp.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }
}

/// Drain a handle until its terminal event
async fn collect(mut handle: JobHandle) -> (Vec<f64>, JobOutcome) {
    tokio::time::timeout(Duration::from_secs(10), async move {
        let mut progress = Vec::new();
        while let Some(event) = handle.next_event().await {
            match event {
                JobEvent::Progress(value) => progress.push(value),
                JobEvent::Finished(outcome) => return (progress, outcome),
            }
        }
        panic!("event stream ended without an outcome");
    })
    .await
    .expect("job did not finish in time")
}

fn assert_non_decreasing(values: &[f64]) {
    for pair in values.windows(2) {
        assert!(pair[0] <= pair[1], "progress went backwards: {:?}", values);
    }
}

// Single-phase jobs

#[tokio::test]
async fn test_single_pass_success() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![]);
    let supervisor = JobSupervisor::new(landscape_probe(10_000), engine.clone(), policy(fixture.temp.path()));

    let handle = supervisor.submit(fixture.request(1.0, 5.0)).await.unwrap();
    let (progress, outcome) = collect(handle).await;

    assert_eq!(outcome, JobOutcome::Succeeded { output: fixture.dest() });
    assert_non_decreasing(&progress);
    assert_eq!(progress.last(), Some(&1.0));
    assert_eq!(progress.iter().filter(|&&p| p == 1.0).count(), 1);
    assert!(progress[..progress.len() - 1].iter().all(|&p| p < 1.0));

    assert_eq!(engine.session_count(), 1);
    let spec = engine.spec(0);
    assert_eq!(spec.clip, Some(ClipRange { start_ms: 1000, end_ms: 5000 }));
    assert_eq!(spec.expected_duration_ms, 4000);
    assert_eq!(spec.encode, EncodeMode::Reencode);
    assert_eq!(spec.frame_rate, None);
    assert_eq!(spec.effects.scale(), Some(ScaleEffect::fit_height(480)));
    assert_eq!(spec.effects.audio, AudioPolicy::Keep);
    assert!(fixture.dest().exists());
}

#[tokio::test]
async fn test_end_clamped_to_duration() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![]);
    let supervisor = JobSupervisor::new(landscape_probe(10_000), engine.clone(), policy(fixture.temp.path()));

    let handle = supervisor.submit(fixture.request(5.0, 200.0)).await.unwrap();
    let (_, outcome) = collect(handle).await;

    assert!(outcome.is_success());
    assert_eq!(engine.spec(0).clip, Some(ClipRange { start_ms: 5000, end_ms: 10_000 }));
}

#[tokio::test]
async fn test_trim_only_without_height_is_stream_copy() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![]);
    let supervisor = JobSupervisor::new(landscape_probe(10_000), engine.clone(), policy(fixture.temp.path()));

    let request = fixture.request(2.0, 6.0).with_mode(TransformMode::TrimOnly);
    let (_, outcome) = collect(supervisor.submit(request).await.unwrap()).await;

    assert!(outcome.is_success());
    let spec = engine.spec(0);
    assert_eq!(spec.encode, EncodeMode::StreamCopy);
    assert_eq!(spec.effects, EffectChain::untransformed(AudioPolicy::Keep));
}

#[tokio::test]
async fn test_trim_only_with_height_uses_effect_chain() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![]);
    let supervisor = JobSupervisor::new(landscape_probe(10_000), engine.clone(), policy(fixture.temp.path()));

    let request = fixture
        .request(2.0, 6.0)
        .with_mode(TransformMode::TrimOnly)
        .with_target_height(360);
    let (_, outcome) = collect(supervisor.submit(request).await.unwrap()).await;

    assert!(outcome.is_success());
    let spec = engine.spec(0);
    assert_eq!(spec.encode, EncodeMode::Reencode);
    assert_eq!(spec.effects.scale(), Some(ScaleEffect::fit_height(360)));
}

#[tokio::test]
async fn test_trim_too_short_never_starts_engine() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![]);
    let supervisor = JobSupervisor::new(landscape_probe(10_000), engine.clone(), policy(fixture.temp.path()));

    let request = fixture.request(0.0, 0.5).with_mode(TransformMode::TrimOnly);
    let (progress, outcome) = collect(supervisor.submit(request).await.unwrap()).await;

    assert_eq!(
        outcome,
        JobOutcome::Failed(DomainError::RangeTooShort {
            start_ms: 0,
            end_ms: 500,
            minimum_ms: 1000
        })
    );
    assert!(progress.is_empty());
    assert_eq!(engine.session_count(), 0);
}

#[tokio::test]
async fn test_degraded_probe_fails_transcode_as_invalid_duration() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![]);
    let probe = Arc::new(StubProbe { probe: SourceProbe::default() });
    let supervisor = JobSupervisor::new(probe, engine.clone(), policy(fixture.temp.path()));

    let (_, outcome) = collect(supervisor.submit(fixture.request(0.0, 5.0)).await.unwrap()).await;

    match outcome {
        JobOutcome::Failed(err) => assert_eq!(err.code(), "INVALID_DURATION"),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(engine.session_count(), 0);
}

#[tokio::test]
async fn test_engine_failure_message_is_verbatim() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![Script::Fail("Conversion failed!")]);
    let supervisor = JobSupervisor::new(landscape_probe(10_000), engine.clone(), policy(fixture.temp.path()));

    let (progress, outcome) = collect(supervisor.submit(fixture.request(0.0, 5.0)).await.unwrap()).await;

    assert_eq!(
        outcome,
        JobOutcome::Failed(DomainError::Engine {
            phase: EnginePhase::Single,
            message: "Conversion failed!".to_string()
        })
    );
    assert!(!progress.contains(&1.0));
}

// Two-phase jobs

#[tokio::test]
async fn test_two_phase_success() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![]);
    let supervisor = JobSupervisor::new(landscape_probe(10_000), engine.clone(), policy(fixture.temp.path()));

    let request = fixture.request(1.0, 4.0).with_frame_rate_normalization(true);
    let (progress, outcome) = collect(supervisor.submit(request).await.unwrap()).await;

    assert_eq!(outcome, JobOutcome::Succeeded { output: fixture.dest() });
    assert_non_decreasing(&progress);
    assert_eq!(progress.last(), Some(&1.0));
    assert_eq!(progress.iter().filter(|&&p| p == 1.0).count(), 1);

    assert_eq!(engine.session_count(), 2);
    let flatten = engine.spec(0);
    let clip = engine.spec(1);

    assert_eq!(flatten.clip, None);
    assert_eq!(flatten.frame_rate, Some(30));
    assert_eq!(flatten.expected_duration_ms, 10_000);
    assert!(is_flatten_temp(&flatten.output));
    assert_eq!(flatten.output.parent(), Some(fixture.temp.path()));

    assert_eq!(clip.input, flatten.output);
    assert_eq!(clip.output, fixture.dest());
    assert_eq!(clip.clip, Some(ClipRange { start_ms: 1000, end_ms: 4000 }));
    assert_eq!(clip.effects, EffectChain::untransformed(AudioPolicy::Drop));
    assert_eq!(clip.encode, EncodeMode::Reencode);

    // The flatten output still existed when the clip phase started, and is gone now
    assert_eq!(engine.earlier_temps(1), vec![(flatten.output.clone(), true)]);
    assert!(!flatten.output.exists());
    assert!(fixture.temp_files().is_empty());
}

#[tokio::test]
async fn test_two_phase_progress_halves() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![
        Script::Succeed(vec![20, 60, 100]),
        Script::Succeed(vec![10, 50, 90, 100]),
    ]);
    let supervisor = JobSupervisor::new(landscape_probe(10_000), engine.clone(), policy(fixture.temp.path()));

    let request = fixture.request(0.0, 8.0).with_frame_rate_normalization(true);
    let (progress, outcome) = collect(supervisor.submit(request).await.unwrap()).await;

    assert!(outcome.is_success());
    assert_non_decreasing(&progress);
    let first_upper = progress.iter().position(|&p| p >= 0.5).unwrap_or(progress.len());
    assert!(progress[..first_upper].iter().all(|&p| p < 0.5));
    assert!(progress[first_upper..].iter().all(|&p| p >= 0.5));
    assert_eq!(*progress.last().unwrap(), 1.0);
}

#[tokio::test]
async fn test_phase_one_failure_skips_phase_two() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![Script::Fail("Encoder exploded")]);
    let supervisor = JobSupervisor::new(landscape_probe(10_000), engine.clone(), policy(fixture.temp.path()));

    let request = fixture.request(1.0, 4.0).with_frame_rate_normalization(true);
    let (_, outcome) = collect(supervisor.submit(request).await.unwrap()).await;

    assert_eq!(
        outcome,
        JobOutcome::Failed(DomainError::Engine {
            phase: EnginePhase::Flatten,
            message: "Encoder exploded".to_string()
        })
    );
    assert_eq!(engine.session_count(), 1);
    assert!(fixture.temp_files().is_empty());
    assert!(!fixture.dest().exists());
}

#[tokio::test]
async fn test_phase_two_failure_is_tagged() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![
        Script::Succeed(vec![100]),
        Script::Fail("muxer error"),
    ]);
    let supervisor = JobSupervisor::new(landscape_probe(10_000), engine.clone(), policy(fixture.temp.path()));

    let request = fixture.request(1.0, 4.0).with_frame_rate_normalization(true);
    let (_, outcome) = collect(supervisor.submit(request).await.unwrap()).await;

    match outcome {
        JobOutcome::Failed(DomainError::Engine { phase, message }) => {
            assert_eq!(phase, EnginePhase::Clip);
            assert_eq!(message, "muxer error");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(fixture.temp_files().is_empty());
}

// Cancellation, supersession and timeout

#[tokio::test]
async fn test_cancel_active_without_job_is_noop() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![]);
    let supervisor = JobSupervisor::new(landscape_probe(10_000), engine.clone(), policy(fixture.temp.path()));

    supervisor.cancel_active().await;
    supervisor.cancel_active().await;
    assert_eq!(supervisor.active_job().await, None);
    assert_eq!(engine.session_count(), 0);
}

#[tokio::test]
async fn test_cancel_running_job() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![Script::Hang]);
    let supervisor = JobSupervisor::new(landscape_probe(10_000), engine.clone(), policy(fixture.temp.path()));

    let handle = supervisor.submit(fixture.request(0.0, 5.0)).await.unwrap();
    engine.wait_for_sessions(1).await;
    assert_eq!(handle.phase(), JobPhase::Phase1Running);

    supervisor.cancel_active().await;
    supervisor.cancel_active().await;
    let (progress, outcome) = collect(handle).await;

    assert_eq!(outcome, JobOutcome::Cancelled);
    assert!(!progress.contains(&1.0));
    // Partial output is removed
    assert!(!fixture.dest().exists());
    assert_eq!(supervisor.active_job().await, None);
}

#[tokio::test]
async fn test_handle_cancel_twice_is_harmless() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![Script::Hang]);
    let supervisor = JobSupervisor::new(landscape_probe(10_000), engine.clone(), policy(fixture.temp.path()));

    let handle = supervisor.submit(fixture.request(0.0, 5.0)).await.unwrap();
    engine.wait_for_sessions(1).await;
    handle.cancel();
    handle.cancel();

    let (_, outcome) = collect(handle).await;
    assert_eq!(outcome, JobOutcome::Cancelled);
}

#[tokio::test]
async fn test_supersession_tears_down_previous_job_first() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![Script::Hang]);
    let supervisor = JobSupervisor::new(landscape_probe(10_000), engine.clone(), policy(fixture.temp.path()));

    let first_request = fixture.request(1.0, 4.0).with_frame_rate_normalization(true);
    let first = supervisor.submit(first_request).await.unwrap();
    engine.wait_for_sessions(1).await;
    let first_temp = engine.spec(0).output;
    assert!(first_temp.exists());

    let second = supervisor.submit(fixture.request(0.0, 3.0)).await.unwrap();
    assert_ne!(first.id(), second.id());

    let (_, first_outcome) = collect(first).await;
    let (_, second_outcome) = collect(second).await;

    assert_eq!(first_outcome, JobOutcome::Cancelled);
    assert!(second_outcome.is_success());

    // The first job's temp file was already gone when the second job started its engine
    assert_eq!(engine.earlier_temps(1), vec![(first_temp, false)]);
    assert!(fixture.temp_files().is_empty());
}

#[tokio::test]
async fn test_bad_request_leaves_active_job_alone() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![Script::Hang]);
    let supervisor = JobSupervisor::new(landscape_probe(10_000), engine.clone(), policy(fixture.temp.path()));

    let running = supervisor.submit(fixture.request(0.0, 5.0)).await.unwrap();
    engine.wait_for_sessions(1).await;

    let rejected = supervisor.submit(fixture.request(-1.0, 5.0)).await;
    assert!(matches!(rejected, Err(DomainError::BadArgs(_))));
    assert_eq!(running.phase(), JobPhase::Phase1Running);
    assert_eq!(supervisor.active_job().await, Some(running.id()));

    supervisor.shutdown().await;
    let (_, outcome) = collect(running).await;
    assert_eq!(outcome, JobOutcome::Cancelled);
}

#[tokio::test]
async fn test_timeout_is_distinct_from_failure() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![Script::Hang]);
    let policy = policy(fixture.temp.path()).with_timeout(Some(Duration::from_millis(100)));
    let supervisor = JobSupervisor::new(landscape_probe(10_000), engine.clone(), policy);

    let request = fixture.request(1.0, 4.0).with_frame_rate_normalization(true);
    let (_, outcome) = collect(supervisor.submit(request).await.unwrap()).await;

    match outcome {
        JobOutcome::Failed(err) => {
            assert_eq!(err, DomainError::Timeout { after: Duration::from_millis(100) });
            assert_eq!(err.code(), "TIMEOUT");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(fixture.temp_files().is_empty());
}

#[tokio::test]
async fn test_dropping_supervisor_cancels_job() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![Script::Hang]);
    let supervisor = JobSupervisor::new(landscape_probe(10_000), engine.clone(), policy(fixture.temp.path()));

    let handle = supervisor.submit(fixture.request(0.0, 5.0)).await.unwrap();
    engine.wait_for_sessions(1).await;
    drop(supervisor);

    let (_, outcome) = collect(handle).await;
    assert_eq!(outcome, JobOutcome::Cancelled);
}

#[tokio::test]
async fn test_terminal_phase_visible_after_outcome() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![]);
    let supervisor = JobSupervisor::new(landscape_probe(10_000), engine.clone(), policy(fixture.temp.path()));

    let mut handle = supervisor.submit(fixture.request(0.0, 2.0)).await.unwrap();
    let mut finished = None;
    while let Some(event) = handle.next_event().await {
        if let JobEvent::Finished(outcome) = event {
            finished = Some(outcome);
        }
    }
    assert!(finished.unwrap().is_success());
    assert_eq!(handle.phase(), JobPhase::Succeeded);
    assert!(handle.next_event().await.is_none());
}

#[tokio::test]
async fn test_cancel_during_clip_phase() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![Script::Succeed(vec![100]), Script::Hang]);
    let supervisor = JobSupervisor::new(landscape_probe(10_000), engine.clone(), policy(fixture.temp.path()));

    let request = fixture.request(1.0, 4.0).with_frame_rate_normalization(true);
    let handle = supervisor.submit(request).await.unwrap();
    engine.wait_for_sessions(2).await;
    assert_eq!(handle.phase(), JobPhase::Phase2Running);

    // Let the poller pick up the clip session's 30%
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.cancel();
    let (progress, outcome) = collect(handle).await;

    assert_eq!(outcome, JobOutcome::Cancelled);
    assert_non_decreasing(&progress);
    // 30% of the clip phase is the last value; nothing follows the cancel
    assert_eq!(progress.last(), Some(&0.65));
    assert!(fixture.temp_files().is_empty());
    assert!(!fixture.dest().exists());
}

#[tokio::test]
async fn test_timeout_covers_stalled_source_probe() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![]);
    let policy = policy(fixture.temp.path()).with_timeout(Some(Duration::from_millis(100)));
    let supervisor = JobSupervisor::new(StallingProbe::after(0), engine.clone(), policy);

    let (progress, outcome) = collect(supervisor.submit(fixture.request(0.0, 5.0)).await.unwrap()).await;

    assert_eq!(
        outcome,
        JobOutcome::Failed(DomainError::Timeout { after: Duration::from_millis(100) })
    );
    assert!(progress.is_empty());
    assert_eq!(engine.session_count(), 0);
}

#[tokio::test]
async fn test_timeout_covers_stalled_flatten_probe() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![Script::Succeed(vec![100])]);
    let policy = policy(fixture.temp.path()).with_timeout(Some(Duration::from_millis(300)));
    let supervisor = JobSupervisor::new(StallingProbe::after(1), engine.clone(), policy);

    let request = fixture.request(1.0, 4.0).with_frame_rate_normalization(true);
    let (_, outcome) = collect(supervisor.submit(request).await.unwrap()).await;

    match outcome {
        JobOutcome::Failed(err) => assert_eq!(err.code(), "TIMEOUT"),
        other => panic!("unexpected outcome {:?}", other),
    }
    // Phase 2 never reached the engine, and the flatten output is gone
    assert_eq!(engine.session_count(), 1);
    assert!(fixture.temp_files().is_empty());
    assert!(!fixture.dest().exists());
}

#[tokio::test]
async fn test_cancel_interrupts_stalled_probe() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![]);
    let supervisor = JobSupervisor::new(StallingProbe::after(0), engine.clone(), policy(fixture.temp.path()));

    let handle = supervisor.submit(fixture.request(0.0, 5.0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    supervisor.cancel_active().await;

    let (_, outcome) = collect(handle).await;
    assert_eq!(outcome, JobOutcome::Cancelled);
    assert_eq!(engine.session_count(), 0);
}

#[tokio::test]
async fn test_request_without_mode_uses_configured_default() {
    let fixture = Fixture::new();
    let engine = ScriptedEngine::with_scripts(vec![]);
    let mut policy = policy(fixture.temp.path());
    policy.defaults.mode = TransformMode::TrimOnly;
    let supervisor = JobSupervisor::new(landscape_probe(10_000), engine.clone(), policy);

    // Trim-only rules apply: stream copy, and the one second minimum
    let (_, outcome) = collect(supervisor.submit(fixture.request(2.0, 6.0)).await.unwrap()).await;
    assert!(outcome.is_success());
    assert_eq!(engine.spec(0).encode, EncodeMode::StreamCopy);

    let (_, outcome) = collect(supervisor.submit(fixture.request(2.0, 2.5)).await.unwrap()).await;
    match outcome {
        JobOutcome::Failed(err) => assert_eq!(err.code(), "INVALID_DURATION"),
        other => panic!("unexpected outcome {:?}", other),
    }

    // An explicit mode still wins over the default
    let request = fixture.request(2.0, 6.0).with_mode(TransformMode::Transcode);
    let (_, outcome) = collect(supervisor.submit(request).await.unwrap()).await;
    assert!(outcome.is_success());
    assert_eq!(engine.spec(1).encode, EncodeMode::Reencode);
}
