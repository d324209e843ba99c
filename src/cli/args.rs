//! Command-line argument definitions

use std::path::PathBuf;

use clap::Args;

/// Arguments shared by the `transcode` and `trim` commands
#[derive(Args, Debug, Clone)]
pub struct ClipArgs {
    /// Input video file path
    #[arg(short, long)]
    pub input: PathBuf,

    /// Start time (HH:MM:SS.ms, MM:SS.ms, or seconds)
    #[arg(short, long)]
    pub start: String,

    /// End time (HH:MM:SS.ms, MM:SS.ms, or seconds)
    #[arg(short, long)]
    pub end: String,

    /// Output file path (default: <stem>_clip_<start>_to_<end>.mp4 next to the input)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Target height of the short edge; `trim` stream-copies when omitted
    #[arg(long)]
    pub height: Option<u32>,

    /// Flatten the whole source to constant frame rate before clipping (drops audio)
    #[arg(long)]
    pub normalize_frame_rate: bool,
}

/// Arguments for the probe command
#[derive(Args, Debug, Clone)]
pub struct ProbeArgs {
    /// Input video file path
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
