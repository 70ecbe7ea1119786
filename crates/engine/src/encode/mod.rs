//! Encoder process supervision

pub mod ffmpeg;
pub mod progress;

pub use ffmpeg::{with_progress_flag, FfmpegSupervisor, Supervise, SupervisorOptions};
pub use progress::{parse_progress_line, ProgressLine, ProgressTracker};
