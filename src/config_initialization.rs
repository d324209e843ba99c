//! Configuration initialization and hierarchy management

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::adapters::toml_config::{AppConfig, TomlConfigAdapter};
use crate::cli::Cli;
use crate::domain::errors::DomainError;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "CLIPSHRINK_";

/// Resolved configuration and where each layer came from
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: AppConfig,
    /// File layer, if any file was loaded
    pub source: Option<PathBuf>,
    /// Environment variables that overrode a value
    pub env_overrides: Vec<String>,
    /// CLI options that overrode a value
    pub cli_overrides: Vec<&'static str>,
}

/// Build the configuration following precedence: CLI > Env > File > Defaults
pub fn initialize_configuration_hierarchy(cli: &Cli) -> Result<ResolvedConfig> {
    // Step 1 and 2: defaults, then the config file if one is found
    let (mut config, source) = load_config_file(cli)?;

    // Step 3: environment variables
    let env_overrides = apply_environment_overrides(&mut config, |key| std::env::var(key).ok())?;

    // Step 4: CLI arguments
    let cli_overrides = apply_cli_overrides(&mut config, cli)?;

    config.validate().context("Invalid configuration")?;

    Ok(ResolvedConfig {
        config,
        source,
        env_overrides,
        cli_overrides,
    })
}

/// An explicit `--config` must exist; otherwise the first candidate found wins
fn load_config_file(cli: &Cli) -> Result<(AppConfig, Option<PathBuf>)> {
    if let Some(path) = &cli.config {
        let config = TomlConfigAdapter::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        return Ok((config, Some(path.clone())));
    }

    for path in TomlConfigAdapter::candidate_paths() {
        if path.is_file() {
            let config = TomlConfigAdapter::load(&path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
            return Ok((config, Some(path)));
        }
    }

    Ok((AppConfig::default(), None))
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, DomainError> {
    value
        .trim()
        .parse()
        .map_err(|_| DomainError::Config(format!("Invalid value for {}: {:?}", key, value)))
}

/// Apply `CLIPSHRINK_*` variables; returns the names that were applied
pub fn apply_environment_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<Vec<String>, DomainError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut applied = Vec::new();
    let mut var = |suffix: &str| -> Option<(String, String)> {
        let key = format!("{}{}", ENV_PREFIX, suffix);
        let value = lookup(&key)?;
        applied.push(key.clone());
        Some((key, value))
    };

    if let Some((_, v)) = var("LOG_LEVEL") {
        config.logging.level = v.parse()?;
    }
    if let Some((_, v)) = var("LOG_FORMAT") {
        config.logging.format = v.parse()?;
    }
    if let Some((k, v)) = var("TARGET_HEIGHT") {
        config.transform.target_height = parse_env(&k, &v)?;
    }
    if let Some((k, v)) = var("POLL_INTERVAL_MS") {
        config.job.poll_interval_ms = parse_env(&k, &v)?;
    }
    if let Some((k, v)) = var("TIMEOUT_SECS") {
        config.job.timeout_secs = Some(parse_env(&k, &v)?);
    }
    if let Some((k, v)) = var("CANCEL_GRACE_MS") {
        config.job.cancel_grace_ms = parse_env(&k, &v)?;
    }
    if let Some((_, v)) = var("TEMP_DIR") {
        config.job.temp_dir = Some(PathBuf::from(v));
    }
    if let Some((_, v)) = var("FFMPEG") {
        config.ffmpeg.ffmpeg_bin = PathBuf::from(v);
    }
    if let Some((_, v)) = var("FFPROBE") {
        config.ffmpeg.ffprobe_bin = PathBuf::from(v);
    }
    if let Some((_, v)) = var("PRESET") {
        config.ffmpeg.encoder.preset = v;
    }
    if let Some((k, v)) = var("CRF") {
        config.ffmpeg.encoder.crf = parse_env(&k, &v)?;
    }
    if let Some((k, v)) = var("THREADS") {
        config.ffmpeg.encoder.threads = parse_env(&k, &v)?;
    }

    Ok(applied)
}

/// Apply the global CLI options; returns the option names that were applied
pub fn apply_cli_overrides(config: &mut AppConfig, cli: &Cli) -> Result<Vec<&'static str>, DomainError> {
    let mut applied = Vec::new();

    if let Some(level) = &cli.log_level {
        config.logging.level = level.parse()?;
        applied.push("--log-level");
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.parse()?;
        applied.push("--log-format");
    }
    if let Some(timeout) = cli.timeout {
        config.job.timeout_secs = Some(timeout);
        applied.push("--timeout");
    }

    Ok(applied)
}
