//! CLI module for clipshrink
//!
//! This module handles command-line argument parsing and command execution.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub mod args;
pub mod commands;

pub use args::{ClipArgs, ProbeArgs};

/// clipshrink - clip, rotate-correct and down-scale videos
#[derive(Parser, Debug)]
#[command(name = "clipshrink")]
#[command(about = "Clip, rotate-correct and down-scale videos")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "CLIPSHRINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Logging format (pretty, compact, json)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Progress display
    #[arg(long, global = true, value_enum, default_value_t = ProgressMode::Console)]
    pub progress: ProgressMode,

    /// Abort the job after this many seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Clip and re-encode, correcting rotation and down-scaling
    Transcode(ClipArgs),
    /// Clip with a one second minimum; stream copy unless --height is given
    Trim(ClipArgs),
    /// Show the probed metadata of a video file
    Probe(ProbeArgs),
}

/// How job progress is shown
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    /// Text progress bar on stderr
    Console,
    /// Line-delimited JSON events on stdout
    Json,
    /// No progress output
    None,
}
