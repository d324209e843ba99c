//! Progress mapping, monotonic reporting and caller-side sinks

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{DomainError, EnginePhase};
use crate::domain::model::{JobEvent, JobId, JobOutcome};
use crate::ports::ProgressSink;

/// Which part of the job an engine percentage belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStage {
    /// Single-pass transform
    Single,
    /// Phase 1 of flatten-then-clip, the lower half of the bar
    Flatten,
    /// Phase 2 of flatten-then-clip, the upper half of the bar
    Clip,
}

impl ProgressStage {
    /// Map an engine percentage onto overall job percent.
    ///
    /// 100 is never produced here; it is reserved for job success.
    pub fn overall(self, engine_percent: u8) -> u8 {
        let p = engine_percent.min(100);
        match self {
            ProgressStage::Single => p.min(99),
            ProgressStage::Flatten => (p / 2).min(49),
            ProgressStage::Clip => (50 + p / 2).min(99),
        }
    }

    pub fn engine_phase(self) -> EnginePhase {
        match self {
            ProgressStage::Single => EnginePhase::Single,
            ProgressStage::Flatten => EnginePhase::Flatten,
            ProgressStage::Clip => EnginePhase::Clip,
        }
    }
}

/// Sends non-decreasing, de-duplicated progress to the job's caller
///
/// Nothing is sent once the job's cancellation token has fired.
pub struct ProgressReporter {
    events: UnboundedSender<JobEvent>,
    cancel: CancellationToken,
    last: Option<u8>,
    completed: bool,
}

impl ProgressReporter {
    pub fn new(events: UnboundedSender<JobEvent>, cancel: CancellationToken) -> Self {
        Self {
            events,
            cancel,
            last: None,
            completed: false,
        }
    }

    /// Report an overall percentage; returns whether it was emitted
    pub fn report(&mut self, percent: u8) -> bool {
        if self.completed || self.cancel.is_cancelled() {
            return false;
        }
        let percent = percent.min(99);
        if self.last.is_some_and(|last| percent <= last) {
            return false;
        }
        self.last = Some(percent);
        self.emit(percent)
    }

    /// Emit the single terminal 100
    pub fn complete(&mut self) -> bool {
        if self.completed {
            return false;
        }
        self.completed = true;
        self.last = Some(100);
        self.emit(100)
    }

    pub fn last(&self) -> Option<u8> {
        self.last
    }

    fn emit(&self, percent: u8) -> bool {
        // A dropped handle just means nobody is listening anymore
        self.events
            .send(JobEvent::Progress(f64::from(percent) / 100.0))
            .is_ok()
    }
}

/// Route a terminal outcome to the matching sink callback
pub fn deliver_outcome(sink: &dyn ProgressSink, job: JobId, outcome: &JobOutcome) {
    match outcome {
        JobOutcome::Succeeded { output } => sink.on_complete(job, output),
        JobOutcome::Failed(err) => sink.on_error(job, err),
        JobOutcome::Cancelled => sink.on_cancel(job),
    }
}

/// Text progress bar on stderr
pub struct ConsoleProgressSink {
    verbose: bool,
    last_drawn: AtomicU8,
}

impl ConsoleProgressSink {
    const BAR_LENGTH: usize = 30;

    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            last_drawn: AtomicU8::new(u8::MAX),
        }
    }

    fn render_bar(fraction: f64) -> String {
        let fraction = fraction.clamp(0.0, 1.0);
        let filled = (fraction * Self::BAR_LENGTH as f64).round() as usize;
        format!(
            "[{}{}] {:>5.1}%",
            "#".repeat(filled),
            "-".repeat(Self::BAR_LENGTH - filled),
            fraction * 100.0
        )
    }

    fn finish_line(&self) {
        if self.last_drawn.swap(u8::MAX, Ordering::Relaxed) != u8::MAX {
            eprintln!();
        }
    }
}

impl ProgressSink for ConsoleProgressSink {
    fn on_progress(&self, job: JobId, fraction: f64) {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0).round() as u8;
        self.last_drawn.store(percent, Ordering::Relaxed);
        let mut stderr = std::io::stderr().lock();
        if self.verbose {
            let _ = write!(stderr, "\r{} {}", job, Self::render_bar(fraction));
        } else {
            let _ = write!(stderr, "\r{}", Self::render_bar(fraction));
        }
        let _ = stderr.flush();
    }

    fn on_complete(&self, _job: JobId, output: &Path) {
        self.finish_line();
        eprintln!("Completed: {}", output.display());
    }

    fn on_error(&self, _job: JobId, error: &DomainError) {
        self.finish_line();
        eprintln!("Error [{}]: {}", error.code(), error);
    }

    fn on_cancel(&self, _job: JobId) {
        self.finish_line();
        eprintln!("Cancelled");
    }
}

/// Line-delimited JSON events on stdout
pub struct JsonProgressSink {
    output_progress_events: bool,
}

impl JsonProgressSink {
    pub fn new(output_progress_events: bool) -> Self {
        Self {
            output_progress_events,
        }
    }
}

impl ProgressSink for JsonProgressSink {
    fn on_progress(&self, job: JobId, fraction: f64) {
        if self.output_progress_events {
            let event = serde_json::json!({
                "event": "progress",
                "job": job.to_string(),
                "progress": fraction,
                "timestamp": chrono::Utc::now().to_rfc3339()
            });
            println!("{}", event);
        }
    }

    fn on_complete(&self, job: JobId, output: &Path) {
        let event = serde_json::json!({
            "event": "complete",
            "job": job.to_string(),
            "output": output.display().to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        println!("{}", event);
    }

    fn on_error(&self, job: JobId, error: &DomainError) {
        let event = serde_json::json!({
            "event": "error",
            "job": job.to_string(),
            "code": error.code(),
            "message": error.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        println!("{}", event);
    }

    fn on_cancel(&self, job: JobId) {
        let event = serde_json::json!({
            "event": "cancel",
            "job": job.to_string(),
            "code": DomainError::Cancelled.code(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        println!("{}", event);
    }
}

/// Sink for when progress display is disabled
pub struct NoOpProgressSink;

impl ProgressSink for NoOpProgressSink {
    fn on_progress(&self, _job: JobId, _fraction: f64) {}
    fn on_complete(&self, _job: JobId, _output: &Path) {}
    fn on_error(&self, _job: JobId, _error: &DomainError) {}
    fn on_cancel(&self, _job: JobId) {}
}
