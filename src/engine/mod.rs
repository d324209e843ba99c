//! Transform job engine: job state machine, progress mapping and supervision

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::model::TransformDefaults;

pub mod job;
pub mod progress;
pub mod supervisor;

pub use job::TransformJob;
pub use progress::{
    ConsoleProgressSink, JsonProgressSink, NoOpProgressSink, ProgressReporter, ProgressStage,
};
pub use supervisor::{JobHandle, JobSupervisor};

/// Runtime policy shared by every job a supervisor starts
#[derive(Debug, Clone)]
pub struct JobPolicy {
    /// Request defaults (target height, minimum trim span, flatten frame rate)
    pub defaults: TransformDefaults,
    /// How often the running engine session is polled for progress
    pub poll_interval: Duration,
    /// Wall-clock limit across all phases; `None` disables it
    pub timeout: Option<Duration>,
    /// How long a cancelled session may take to settle
    pub cancel_grace: Duration,
    /// Where flatten temp files are created
    pub temp_dir: PathBuf,
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self {
            defaults: TransformDefaults::default(),
            poll_interval: Duration::from_millis(500),
            timeout: None,
            cancel_grace: Duration::from_millis(5000),
            temp_dir: std::env::temp_dir(),
        }
    }
}

impl JobPolicy {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }
}
