//! Output path helpers

use std::path::{Path, PathBuf};

use crate::domain::errors::DomainError;

/// `<stem>_clip_<start>_to_<end>.mp4` next to the input
pub fn default_output_path(input: &Path, start_seconds: f64, end_seconds: f64) -> Result<PathBuf, DomainError> {
    let stem = input
        .file_stem()
        .ok_or_else(|| DomainError::BadArgs("Invalid input file path".to_string()))?
        .to_string_lossy();

    let file_name = format!(
        "{}_clip_{}_to_{}.mp4",
        stem,
        format_time_for_filename(start_seconds),
        format_time_for_filename(end_seconds)
    );
    Ok(input.with_file_name(file_name))
}

/// Whole seconds as `M-SS` or `H-MM-SS`; colons are not portable in file names
fn format_time_for_filename(seconds: f64) -> String {
    let total_seconds = seconds.max(0.0) as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}-{:02}-{:02}", hours, minutes, secs)
    } else {
        format!("{}-{:02}", minutes, secs)
    }
}
