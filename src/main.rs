//! clipshrink CLI
//!
//! Clip, rotate-correct and down-scale videos.
//!
//! # Usage
//!
//! ```bash
//! clipshrink transcode --input video.mov --start 00:01:00 --end 00:02:00
//! clipshrink trim --input video.mov --start 10 --end 25 --output clip.mp4
//! clipshrink probe --input video.mov --json
//! ```

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};

use clipshrink::cli::{commands, Cli, Commands};
use clipshrink::config_initialization::initialize_configuration_hierarchy;
use clipshrink::domain::model::TransformMode;
use clipshrink::utils::logging::LoggingSystem;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let resolved = initialize_configuration_hierarchy(&cli)?;
    let logging = LoggingSystem::new(resolved.config.logging.clone());
    logging.initialize()?;
    logging.log_system_info();

    match &resolved.source {
        Some(path) => info!(path = %path.display(), "Loaded configuration file"),
        None => debug!("No configuration file found, using defaults"),
    }
    if !resolved.env_overrides.is_empty() {
        debug!(vars = ?resolved.env_overrides, "Applied environment overrides");
    }
    if !resolved.cli_overrides.is_empty() {
        debug!(options = ?resolved.cli_overrides, "Applied CLI overrides");
    }

    let config = resolved.config;
    let code = match cli.command {
        Commands::Transcode(args) => {
            commands::clip(args, TransformMode::Transcode, &config, cli.progress).await?
        }
        Commands::Trim(args) => {
            commands::clip(args, TransformMode::TrimOnly, &config, cli.progress).await?
        }
        Commands::Probe(args) => commands::probe(args, &config).await?,
    };

    std::process::exit(code);
}
