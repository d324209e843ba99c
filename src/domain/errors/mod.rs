// Domain errors - Error types for the domain layer

use std::time::Duration;
use thiserror::Error;

/// Which engine phase produced a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Single-pass transform
    Single,
    /// First half of flatten-then-clip: normalize the whole source
    Flatten,
    /// Second half of flatten-then-clip: clip the flattened file
    Clip,
}

impl std::fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnginePhase::Single => write!(f, "transform"),
            EnginePhase::Flatten => write!(f, "phase 1 (flatten)"),
            EnginePhase::Clip => write!(f, "phase 2 (clip)"),
        }
    }
}

/// Range resolution failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    /// Resolved span is below the policy minimum
    #[error("clip range {start_ms}ms..{end_ms}ms is shorter than the {minimum_ms}ms minimum")]
    TooShort {
        start_ms: u64,
        end_ms: u64,
        minimum_ms: u64,
    },
}

/// Domain-specific error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Malformed or missing request fields
    #[error("Bad arguments: {0}")]
    BadArgs(String),

    /// Resolved clip span below the minimum
    #[error("Trim duration too short or invalid: {start_ms}ms..{end_ms}ms (minimum {minimum_ms}ms)")]
    RangeTooShort {
        start_ms: u64,
        end_ms: u64,
        minimum_ms: u64,
    },

    /// Probe fell back to a default; never fatal, only logged
    #[error("Probe degraded: {field} unavailable ({reason})")]
    ProbeDegraded { field: &'static str, reason: String },

    /// Transform engine failure, message preserved verbatim
    #[error("{phase} failed: {message}")]
    Engine { phase: EnginePhase, message: String },

    /// Wall-clock limit reached
    #[error("Export timeout ({} seconds)", after.as_secs())]
    Timeout { after: Duration },

    /// Job was cancelled by request or supersession
    #[error("Processing cancelled")]
    Cancelled,

    /// File system failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Stable error code reported across the caller boundary
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::BadArgs(_) => "ARGUMENT_ERROR",
            DomainError::RangeTooShort { .. } => "INVALID_DURATION",
            DomainError::ProbeDegraded { .. } => "PROBE_DEGRADED",
            DomainError::Engine { .. } => "PROCESSING_FAILED",
            DomainError::Timeout { .. } => "TIMEOUT",
            DomainError::Cancelled => "EXPORT_CANCELLED",
            DomainError::Io(_) => "IO_ERROR",
            DomainError::Config(_) => "CONFIG_ERROR",
            DomainError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn engine(phase: EnginePhase, message: impl Into<String>) -> Self {
        DomainError::Engine {
            phase,
            message: message.into(),
        }
    }
}

impl From<RangeError> for DomainError {
    fn from(err: RangeError) -> Self {
        match err {
            RangeError::TooShort {
                start_ms,
                end_ms,
                minimum_ms,
            } => DomainError::RangeTooShort {
                start_ms,
                end_ms,
                minimum_ms,
            },
        }
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}
