//! clipshrink library
//!
//! Cancellable, progress-reporting video transform jobs: clip a time range,
//! correct the stored rotation and down-scale to a target height, optionally
//! flattening the source to a constant frame rate first.
//!
//! The domain layer holds the pure rules, `ports` the seams to the outside
//! world, `adapters` the ffmpeg/ffprobe/TOML implementations and `engine`
//! the job state machine and its supervisor.

pub mod adapters;
pub mod cli;
pub mod config_initialization;
pub mod domain;
pub mod engine;
pub mod ports;
pub mod utils;

// Re-export commonly used types
pub use domain::errors::DomainError;
pub use domain::model::{JobEvent, JobId, JobOutcome, JobPhase, SourceProbe, TransformMode, TransformRequest};
pub use engine::{JobHandle, JobPolicy, JobSupervisor};
