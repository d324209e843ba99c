//! One transform job: probe, resolve, build effects and drive engine sessions

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempPath;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::errors::DomainError;
use crate::domain::model::*;
use crate::domain::rules::{EffectChainBuilder, RangeResolver};
use crate::engine::progress::{ProgressReporter, ProgressStage};
use crate::engine::JobPolicy;
use crate::ports::{EncodeMode, ProbePort, SessionError, SessionSpec, TransformEngine};

/// A single submitted transform request and everything it owns
///
/// The job owns its temp file and its engine sessions. Both are released
/// before [`TransformJob::run`] returns the terminal outcome.
pub struct TransformJob {
    id: JobId,
    request: TransformRequest,
    probe_port: Arc<dyn ProbePort>,
    engine: Arc<dyn TransformEngine>,
    policy: JobPolicy,
    cancel: CancellationToken,
    phase: watch::Sender<JobPhase>,
    reporter: ProgressReporter,
    temp: Option<TempPath>,
    deadline: Option<Instant>,
    output_touched: bool,
}

impl TransformJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: JobId,
        request: TransformRequest,
        probe_port: Arc<dyn ProbePort>,
        engine: Arc<dyn TransformEngine>,
        policy: JobPolicy,
        cancel: CancellationToken,
        phase: watch::Sender<JobPhase>,
        events: mpsc::UnboundedSender<JobEvent>,
    ) -> Self {
        let reporter = ProgressReporter::new(events, cancel.clone());
        Self {
            id,
            request,
            probe_port,
            engine,
            policy,
            cancel,
            phase,
            reporter,
            temp: None,
            deadline: None,
            output_touched: false,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Run to completion and produce the single terminal outcome
    pub async fn run(mut self) -> JobOutcome {
        info!(
            job_id = %self.id,
            source = %self.request.source_path.display(),
            dest = %self.request.dest_path.display(),
            start = self.request.start_seconds,
            end = self.request.end_seconds,
            mode = %self.mode(),
            normalize_frame_rate = self.request.normalize_frame_rate,
            "Starting transform job"
        );
        let started = Instant::now();
        self.deadline = self.policy.timeout.map(|limit| started + limit);

        let result = self.execute().await;
        self.release(&result);

        let outcome = JobOutcome::from(result);
        if outcome.is_success() {
            self.reporter.complete();
        }
        self.phase.send_replace(outcome.phase());

        match &outcome {
            JobOutcome::Succeeded { output } => info!(
                job_id = %self.id,
                output = %output.display(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Transform job succeeded"
            ),
            JobOutcome::Failed(err) => error!(
                job_id = %self.id,
                code = err.code(),
                error = %err,
                "Transform job failed"
            ),
            JobOutcome::Cancelled => info!(job_id = %self.id, "Transform job cancelled"),
        }
        outcome
    }

    /// Terminal outcome for a job whose execution context never came up
    pub fn abandon(self, reason: DomainError) -> JobOutcome {
        error!(job_id = %self.id, error = %reason, "Transform job could not start");
        self.phase.send_replace(JobPhase::Failed);
        JobOutcome::Failed(reason)
    }

    async fn execute(&mut self) -> Result<PathBuf, DomainError> {
        self.checkpoint()?;
        let source = self.request.source_path.clone();
        let probe = self.probe(&source).await?;
        debug!(job_id = %self.id, ?probe, "Probed source");

        let range = self.resolve_range(probe.duration_ms)?;
        debug!(
            job_id = %self.id,
            start_ms = range.start_ms,
            end_ms = range.end_ms,
            "Resolved clip range"
        );

        let (effects, encode) = self.plan_effects(&probe);
        debug!(job_id = %self.id, ?effects, ?encode, "Planned effect chain");

        if self.request.normalize_frame_rate {
            self.flatten_then_clip(probe, effects).await
        } else {
            self.single_pass(range, effects, encode).await
        }
    }

    async fn single_pass(
        &mut self,
        range: ClipRange,
        effects: EffectChain,
        encode: EncodeMode,
    ) -> Result<PathBuf, DomainError> {
        self.phase.send_replace(JobPhase::Phase1Running);
        let spec = SessionSpec {
            input: self.request.source_path.clone(),
            output: self.request.dest_path.clone(),
            effects,
            clip: Some(range),
            expected_duration_ms: range.span_ms(),
            encode,
            frame_rate: None,
        };
        self.output_touched = true;
        self.run_session(spec, ProgressStage::Single).await
    }

    /// Normalize the whole source to a temp file, then clip that file
    async fn flatten_then_clip(
        &mut self,
        probe: SourceProbe,
        effects: EffectChain,
    ) -> Result<PathBuf, DomainError> {
        let temp_path = self.create_temp()?;

        self.phase.send_replace(JobPhase::Phase1Running);
        let flatten = SessionSpec {
            input: self.request.source_path.clone(),
            output: temp_path.clone(),
            effects,
            clip: None,
            expected_duration_ms: probe.duration_ms,
            encode: EncodeMode::Reencode,
            frame_rate: Some(self.policy.defaults.flatten_frame_rate),
        };
        self.run_session(flatten, ProgressStage::Flatten).await?;
        self.checkpoint()?;

        self.phase.send_replace(JobPhase::Phase2Running);
        let flattened = self.probe(&temp_path).await?;
        let range = self.resolve_range(flattened.duration_ms)?;
        debug!(
            job_id = %self.id,
            duration_ms = flattened.duration_ms,
            start_ms = range.start_ms,
            end_ms = range.end_ms,
            "Re-resolved clip range against flattened file"
        );

        let clip = SessionSpec {
            input: temp_path,
            output: self.request.dest_path.clone(),
            effects: EffectChain::untransformed(AudioPolicy::Drop),
            clip: Some(range),
            expected_duration_ms: range.span_ms(),
            encode: EncodeMode::Reencode,
            frame_rate: None,
        };
        self.output_touched = true;
        self.run_session(clip, ProgressStage::Clip).await
    }

    /// Drive one engine session until it completes, is cancelled or times out
    async fn run_session(
        &mut self,
        spec: SessionSpec,
        stage: ProgressStage,
    ) -> Result<PathBuf, DomainError> {
        self.checkpoint()?;
        let phase = stage.engine_phase();
        info!(
            job_id = %self.id,
            %phase,
            input = %spec.input.display(),
            output = %spec.output.display(),
            "Starting engine session"
        );

        let mut session = self
            .engine
            .start_session(spec)
            .await
            .map_err(|err| match err {
                DomainError::Engine { message, .. } => DomainError::engine(phase, message),
                other => other,
            })?;

        let mut ticker = tokio::time::interval(self.policy.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let expiry = self.expiry();
        tokio::pin!(expiry);

        let cancel = self.cancel.clone();
        let grace = self.policy.cancel_grace;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(job_id = %self.id, %phase, "Cancelling engine session");
                    session.cancel_and_settle(grace).await;
                    return Err(DomainError::Cancelled);
                }
                _ = &mut expiry => {
                    warn!(job_id = %self.id, %phase, "Transform job timed out");
                    session.cancel_and_settle(grace).await;
                    return Err(self.timeout_error());
                }
                result = session.completion() => {
                    return match result {
                        Ok(output) => {
                            debug!(job_id = %self.id, %phase, "Engine session completed");
                            Ok(output)
                        }
                        Err(SessionError::Failed(message)) => Err(DomainError::engine(phase, message)),
                        Err(SessionError::Cancelled) if cancel.is_cancelled() => Err(DomainError::Cancelled),
                        Err(SessionError::Cancelled) => Err(DomainError::engine(
                            phase,
                            "engine session was cancelled unexpectedly",
                        )),
                    };
                }
                _ = ticker.tick() => {
                    if let Some(percent) = session.poll_progress() {
                        self.reporter.report(stage.overall(percent));
                    }
                }
            }
        }
    }

    /// Probe under the same cancel token and deadline as the engine sessions
    async fn probe(&self, path: &Path) -> Result<SourceProbe, DomainError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DomainError::Cancelled),
            _ = self.expiry() => {
                warn!(job_id = %self.id, path = %path.display(), "Transform job timed out while probing");
                Err(self.timeout_error())
            }
            probe = self.probe_port.probe(path) => Ok(probe),
        }
    }

    /// Completes at the job deadline; never completes without a timeout
    fn expiry(&self) -> impl Future<Output = ()> + 'static {
        let deadline = self.deadline;
        async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        }
    }

    fn timeout_error(&self) -> DomainError {
        DomainError::Timeout {
            after: self.policy.timeout.unwrap_or_default(),
        }
    }

    fn mode(&self) -> TransformMode {
        self.request.mode.unwrap_or(self.policy.defaults.mode)
    }

    fn resolve_range(&self, duration_ms: u64) -> Result<ClipRange, DomainError> {
        let minimum = match self.mode() {
            TransformMode::TrimOnly => self.policy.defaults.min_trim_span_ms,
            // An empty clip has nothing to encode
            TransformMode::Transcode => 1,
        };
        Ok(RangeResolver::resolve(
            self.request.start_ms(),
            self.request.end_ms(),
            duration_ms,
            Some(minimum),
        )?)
    }

    fn plan_effects(&self, probe: &SourceProbe) -> (EffectChain, EncodeMode) {
        match (self.mode(), self.request.target_height) {
            (TransformMode::TrimOnly, None) => (
                EffectChain::untransformed(AudioPolicy::Keep),
                EncodeMode::StreamCopy,
            ),
            (_, height) => {
                let target = height.unwrap_or(self.policy.defaults.target_height);
                (EffectChainBuilder::build(probe, target), EncodeMode::Reencode)
            }
        }
    }

    fn create_temp(&mut self) -> Result<PathBuf, DomainError> {
        let temp = tempfile::Builder::new()
            .prefix("flatten_")
            .suffix(".mp4")
            .tempfile_in(&self.policy.temp_dir)
            .map_err(|err| {
                DomainError::Io(format!(
                    "failed to create temp file in {}: {}",
                    self.policy.temp_dir.display(),
                    err
                ))
            })?
            .into_temp_path();
        let path = temp.to_path_buf();
        debug!(job_id = %self.id, temp = %path.display(), "Created flatten temp file");
        self.temp = Some(temp);
        Ok(path)
    }

    /// Fail fast on cancellation or an expired deadline between steps
    fn checkpoint(&self) -> Result<(), DomainError> {
        if self.cancel.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(self.timeout_error());
        }
        Ok(())
    }

    /// Delete the temp file and, on any non-success, the partial destination
    fn release(&mut self, result: &Result<PathBuf, DomainError>) {
        if let Some(temp) = self.temp.take() {
            let path = temp.to_path_buf();
            match temp.close() {
                Ok(()) => debug!(job_id = %self.id, temp = %path.display(), "Removed temp file"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!(
                    job_id = %self.id,
                    temp = %path.display(),
                    error = %err,
                    "Failed to remove temp file"
                ),
            }
        }

        if result.is_err() && self.output_touched {
            let dest = &self.request.dest_path;
            match std::fs::remove_file(dest) {
                Ok(()) => debug!(job_id = %self.id, dest = %dest.display(), "Removed partial output"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!(
                    job_id = %self.id,
                    dest = %dest.display(),
                    error = %err,
                    "Failed to remove partial output"
                ),
            }
        }
    }
}
