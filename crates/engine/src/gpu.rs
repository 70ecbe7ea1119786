//! GPU vendor detection.
//!
//! Runs `nvidia-smi -L` once per detector and caches the answer. The
//! detector is built explicitly and handed to whoever needs it.

use crate::codec::HwAccel;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Upper bound on a single `nvidia-smi` run.
pub const DETECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum GpuVendor {
    Nvidia,
}

impl GpuVendor {
    /// Hardware-acceleration mode that fits this vendor.
    pub fn hwaccel(&self) -> HwAccel {
        match self {
            GpuVendor::Nvidia => HwAccel::Nvenc,
        }
    }
}

/// True when `nvidia-smi -L` output lists at least one GPU.
pub fn lists_nvidia_gpu(output: &str) -> bool {
    output.lines().any(|l| l.trim_start().starts_with("GPU 0:"))
}

/// Memoizing GPU detector.
#[derive(Debug)]
pub struct GpuDetector {
    nvidia_smi_path: PathBuf,
    cached: OnceCell<Option<GpuVendor>>,
}

impl GpuDetector {
    pub fn new(nvidia_smi_path: impl Into<PathBuf>) -> Self {
        Self {
            nvidia_smi_path: nvidia_smi_path.into(),
            cached: OnceCell::new(),
        }
    }

    /// Detected vendor, probing on first call only.
    pub async fn vendor(&self) -> Option<GpuVendor> {
        *self.cached.get_or_init(|| self.probe()).await
    }

    /// Hardware-acceleration suggestion, `None` mode when no GPU was found.
    pub async fn suggest_hwaccel(&self) -> HwAccel {
        self.vendor()
            .await
            .map(|v| v.hwaccel())
            .unwrap_or(HwAccel::None)
    }

    async fn probe(&self) -> Option<GpuVendor> {
        let run = tokio::process::Command::new(&self.nvidia_smi_path)
            .arg("-L")
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(DETECT_TIMEOUT, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!(error = %e, "nvidia-smi not available");
                return None;
            }
            Err(_) => {
                info!("nvidia-smi timed out; assuming no NVIDIA GPU");
                return None;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let vendor = (output.status.success() && lists_nvidia_gpu(&stdout)).then_some(GpuVendor::Nvidia);
        info!(?vendor, "GPU detection complete");
        vendor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_nvidia_gpu() {
        assert!(lists_nvidia_gpu(
            "GPU 0: NVIDIA GeForce RTX 3080 (UUID: GPU-1234)\n"
        ));
        assert!(!lists_nvidia_gpu("No devices were found\n"));
        assert!(!lists_nvidia_gpu(""));
    }

    #[tokio::test]
    async fn test_missing_tool_means_no_gpu() {
        let detector = GpuDetector::new("/nonexistent/nvidia-smi");
        assert_eq!(detector.vendor().await, None);
        assert_eq!(detector.suggest_hwaccel().await, HwAccel::None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_detection_runs_once() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        let temp = TempDir::new().unwrap();
        let counter = temp.path().join("calls");
        let tool = temp.path().join("nvidia-smi");
        fs::write(
            &tool,
            format!(
                "#!/bin/sh\necho x >> '{}'\necho 'GPU 0: Test Card (UUID: GPU-0)'\n",
                counter.display()
            ),
        )
        .unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        let detector = GpuDetector::new(&tool);
        assert_eq!(detector.vendor().await, Some(GpuVendor::Nvidia));
        assert_eq!(detector.suggest_hwaccel().await, HwAccel::Nvenc);

        let calls = fs::read_to_string(&counter).unwrap();
        assert_eq!(calls.lines().count(), 1);
    }
}
