//! Frame dimension probe.
//!
//! Reads the pixel size of a sequence's first frame through ffprobe.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Upper bound on a single ffprobe run.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for dimension probes
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run ffprobe: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("ffprobe exited unsuccessfully: {0}")]
    Failed(String),

    #[error("unexpected ffprobe output: {0:?}")]
    Parse(String),

    #[error("ffprobe did not finish within {0:?}")]
    TimedOut(Duration),
}

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Source of frame dimensions.
pub trait DimensionProbe: Send + Sync {
    fn dimensions(&self, frame: &Path) -> impl Future<Output = Result<Dimensions, ProbeError>> + Send;
}

/// Parses ffprobe's `WxH` csv output, e.g. `6000x4000`.
pub fn parse_dimensions(output: &str) -> Result<Dimensions, ProbeError> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    let parsed = line.split_once('x').and_then(|(w, h)| {
        Some(Dimensions {
            width: w.trim().parse().ok()?,
            height: h.trim().parse().ok()?,
        })
    });
    parsed.ok_or_else(|| ProbeError::Parse(output.to_string()))
}

/// [`DimensionProbe`] backed by the ffprobe binary.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    ffprobe_path: PathBuf,
    timeout: Duration,
}

impl FfprobeProbe {
    pub fn new(ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
            timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl DimensionProbe for FfprobeProbe {
    async fn dimensions(&self, frame: &Path) -> Result<Dimensions, ProbeError> {
        let mut command = tokio::process::Command::new(&self.ffprobe_path);
        command
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height",
                "-of",
                "csv=s=x:p=0",
            ])
            .arg(frame)
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| ProbeError::TimedOut(self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Failed(stderr.trim().to_string()));
        }

        parse_dimensions(&String::from_utf8_lossy(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dimensions() {
        assert_eq!(
            parse_dimensions("6000x4000\n").unwrap(),
            Dimensions {
                width: 6000,
                height: 4000
            }
        );
        assert_eq!(parse_dimensions("\n 1920x1080 \n").unwrap().width, 1920);
        assert!(parse_dimensions("").is_err());
        assert!(parse_dimensions("N/AxN/A").is_err());
        assert!(parse_dimensions("1920").is_err());
    }

    #[tokio::test]
    async fn test_missing_ffprobe_is_a_spawn_error() {
        let probe = FfprobeProbe::new("/nonexistent/ffprobe-binary");
        let result = probe.dimensions(Path::new("/tmp/P0001.JPG")).await;
        assert!(matches!(result, Err(ProbeError::Spawn(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_ffprobe_times_out() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        let temp = TempDir::new().unwrap();
        let tool = temp.path().join("ffprobe");
        fs::write(&tool, "#!/bin/sh\nsleep 30\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        let ffprobe = FfprobeProbe::new(&tool).with_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let result = ffprobe.dimensions(Path::new("/tmp/P0001.JPG")).await;

        assert!(matches!(result, Err(ProbeError::TimedOut(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
