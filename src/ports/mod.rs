// Ports - Interface definitions (contracts)

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::domain::errors::*;
use crate::domain::model::*;

/// Port for source metadata probing
///
/// Probing is best-effort: unresolvable fields fall back to the defaults of
/// [`SourceProbe`] instead of failing the job.
#[async_trait]
pub trait ProbePort: Send + Sync {
    /// Probe duration, dimensions, rotation and audio support
    async fn probe(&self, path: &Path) -> SourceProbe;
}

/// How the engine should produce the output streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeMode {
    /// Decode, filter and encode
    Reencode,
    /// Copy packets untouched; only valid for an empty effect chain
    StreamCopy,
}

/// Everything one engine session needs
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSpec {
    pub input: PathBuf,
    pub output: PathBuf,
    pub effects: EffectChain,
    /// `None` transforms the whole input
    pub clip: Option<ClipRange>,
    /// Expected output length, used to turn engine time into a percentage
    pub expected_duration_ms: u64,
    pub encode: EncodeMode,
    /// Force constant frame rate output
    pub frame_rate: Option<u32>,
}

/// Why a session ended without output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    Failed(String),
    Cancelled,
}

/// Terminal result of one engine session
pub type SessionResult = Result<PathBuf, SessionError>;

/// Handle to one running engine session
///
/// Progress is read through a watch channel, completion arrives exactly once
/// through a oneshot, and cancellation is a token the engine listens to.
pub struct EngineSession {
    progress: watch::Receiver<Option<u8>>,
    completion: Option<oneshot::Receiver<SessionResult>>,
    cancel: CancellationToken,
}

impl EngineSession {
    pub fn new(
        progress: watch::Receiver<Option<u8>>,
        completion: oneshot::Receiver<SessionResult>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            progress,
            completion: Some(completion),
            cancel,
        }
    }

    /// Current engine percentage, `None` while unavailable
    pub fn poll_progress(&self) -> Option<u8> {
        (*self.progress.borrow()).map(|p| p.min(100))
    }

    /// Ask the engine to stop; safe to call repeatedly
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the single terminal result; cancel-safe inside `select!`
    pub async fn completion(&mut self) -> SessionResult {
        let Some(receiver) = self.completion.as_mut() else {
            return Err(SessionError::Failed(
                "engine session result was already consumed".to_string(),
            ));
        };
        let result = match receiver.await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Failed(
                "engine session ended without reporting a result".to_string(),
            )),
        };
        self.completion = None;
        result
    }

    /// Cancel, then give the engine `grace` to finish its own teardown
    pub async fn cancel_and_settle(&mut self, grace: Duration) {
        self.cancel();
        if tokio::time::timeout(grace, self.completion()).await.is_err() {
            tracing::warn!(
                grace_ms = grace.as_millis() as u64,
                "Engine session did not settle after cancellation"
            );
        }
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        // An unfinished session must not outlive its owner
        if self.completion.is_some() {
            self.cancel.cancel();
        }
    }
}

/// Port for the external transform engine
#[async_trait]
pub trait TransformEngine: Send + Sync {
    /// Start one decode/filter/encode session
    async fn start_session(&self, spec: SessionSpec) -> Result<EngineSession, DomainError>;
}

/// Caller-side delivery of progress and the terminal outcome
pub trait ProgressSink: Send + Sync {
    /// Overall progress in [0.0, 1.0]
    fn on_progress(&self, job: JobId, fraction: f64);

    /// Job produced its output
    fn on_complete(&self, job: JobId, output: &Path);

    /// Job failed
    fn on_error(&self, job: JobId, error: &DomainError);

    /// Job was cancelled
    fn on_cancel(&self, job: JobId);
}
