//! Startup checks
//!
//! Verifies before a batch starts that the encoder and probe binaries can be
//! run, so a missing tool is reported once as a configuration error instead
//! of failing every job.

use crate::config::Config;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("FFmpeg not available: {0}")]
    FfmpegUnavailable(String),

    #[error("FFprobe not available: {0}")]
    FfprobeUnavailable(String),
}

/// Versions reported by the external tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolVersions {
    pub ffmpeg: String,
    pub ffprobe: String,
}

/// Extract the version token from `<tool> -version` output
///
/// Handles various version formats:
/// - Standard: "ffmpeg version 6.1.1 ..."
/// - N-prefixed: "ffmpeg version n7.0-... ..."
/// - Git builds: "ffprobe version N-113000-g1234 ..."
pub fn parse_tool_version(tool: &str, version_output: &str) -> Option<String> {
    let marker = format!("{} version", tool.to_lowercase());
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains(&marker))?;

    let start = version_line.to_lowercase().find(&marker)? + marker.len();
    let token = version_line.get(start..)?.split_whitespace().next()?;
    Some(token.to_string())
}

fn tool_version(path: &Path, tool: &str) -> Result<String, String> {
    let output = Command::new(path)
        .arg("-version")
        .output()
        .map_err(|e| format!("{} -version failed; is it installed and in PATH? Error: {}", path.display(), e))?;

    if !output.status.success() {
        return Err(format!("{} -version exited with {}", path.display(), output.status));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_tool_version(tool, &stdout).ok_or_else(|| {
        format!(
            "could not parse version from: {}",
            stdout.lines().next().unwrap_or("(empty)")
        )
    })
}

/// Check that ffmpeg runs, returning its version string
pub fn check_ffmpeg(path: &Path) -> Result<String, StartupError> {
    tool_version(path, "ffmpeg").map_err(StartupError::FfmpegUnavailable)
}

/// Check that ffprobe runs, returning its version string
pub fn check_ffprobe(path: &Path) -> Result<String, StartupError> {
    tool_version(path, "ffprobe").map_err(StartupError::FfprobeUnavailable)
}

/// Run all startup checks in order
///
/// 1. FFmpeg availability
/// 2. FFprobe availability
pub fn run_startup_checks(cfg: &Config) -> Result<ToolVersions, StartupError> {
    let ffmpeg = check_ffmpeg(&cfg.encoder.ffmpeg_path)?;
    let ffprobe = check_ffprobe(&cfg.encoder.ffprobe_path)?;
    Ok(ToolVersions { ffmpeg, ffprobe })
}
