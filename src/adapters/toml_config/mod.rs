// TOML config adapter - Configuration file loading and validation

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapters::exec_ffmpeg::EncoderSettings;
use crate::domain::errors::*;
use crate::domain::model::TransformDefaults;
use crate::engine::JobPolicy;
use crate::utils::logging::LoggingConfig;

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub transform: TransformDefaults,
    pub job: JobConfig,
    pub ffmpeg: FfmpegConfig,
    pub logging: LoggingConfig,
}

/// `[job]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub poll_interval_ms: u64,
    /// Unset disables the wall-clock limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    pub cancel_grace_ms: u64,
    /// Unset uses the system temp directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            timeout_secs: None,
            cancel_grace_ms: 5000,
            temp_dir: None,
        }
    }
}

/// `[ffmpeg]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    #[serde(flatten)]
    pub encoder: EncoderSettings,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            encoder: EncoderSettings::default(),
        }
    }
}

impl AppConfig {
    /// Reject values no job could run with
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.transform.target_height == 0 {
            return Err(DomainError::Config(
                "transform.target_height must be positive".to_string(),
            ));
        }
        if self.transform.flatten_frame_rate == 0 {
            return Err(DomainError::Config(
                "transform.flatten_frame_rate must be positive".to_string(),
            ));
        }
        if self.job.poll_interval_ms == 0 {
            return Err(DomainError::Config(
                "job.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.job.timeout_secs == Some(0) {
            return Err(DomainError::Config(
                "job.timeout_secs must be positive; omit it to disable the timeout".to_string(),
            ));
        }
        if self.ffmpeg.encoder.crf > 51 {
            return Err(DomainError::Config(
                "CRF value cannot exceed 51".to_string(),
            ));
        }
        if self.ffmpeg.encoder.threads == 0 {
            return Err(DomainError::Config(
                "ffmpeg.threads must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Runtime policy handed to the job supervisor
    pub fn job_policy(&self) -> JobPolicy {
        JobPolicy {
            defaults: self.transform.clone(),
            poll_interval: Duration::from_millis(self.job.poll_interval_ms),
            timeout: self.job.timeout_secs.map(Duration::from_secs),
            cancel_grace: Duration::from_millis(self.job.cancel_grace_ms),
            temp_dir: self
                .job
                .temp_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
        }
    }
}

/// TOML configuration adapter
pub struct TomlConfigAdapter;

impl TomlConfigAdapter {
    /// Parse a TOML document
    pub fn parse(toml_content: &str) -> Result<AppConfig, DomainError> {
        toml::from_str(toml_content)
            .map_err(|e| DomainError::Config(format!("Failed to parse TOML config: {}", e)))
    }

    /// Load and parse a config file
    pub fn load(path: &Path) -> Result<AppConfig, DomainError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DomainError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    /// Serialize a config back to TOML
    pub fn to_toml_string(config: &AppConfig) -> Result<String, DomainError> {
        toml::to_string_pretty(config)
            .map_err(|e| DomainError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Per-user config location, if one can be determined
    pub fn user_config_path() -> Option<PathBuf> {
        if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME") {
            return Some(PathBuf::from(dir).join("clipshrink").join("config.toml"));
        }
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return Some(PathBuf::from(appdata).join("clipshrink").join("config.toml"));
        }
        std::env::var_os("HOME").map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join("clipshrink")
                .join("config.toml")
        })
    }

    /// Files searched, in order, when no `--config` is given
    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("clipshrink.toml")];
        paths.extend(Self::user_config_path());
        paths
    }
}
