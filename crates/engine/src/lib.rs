//! Timelapse Engine
//!
//! Finds numbered still-image sequences on disk, compiles them into ffmpeg
//! invocations and runs those one at a time with progress and cancellation.

pub mod codec;
pub mod compile;
pub mod encode;
pub mod events;
pub mod gpu;
pub mod probe;
pub mod runner;
pub mod scan;
pub mod settings;
pub mod startup;

pub use timelapse_config as config;
pub use timelapse_config::Config;
pub use codec::{CodecId, HwAccel};
pub use compile::{compile_job, EncodeJob, JobCompiler};
pub use encode::{FfmpegSupervisor, Supervise, SupervisorOptions};
pub use events::{
    event_channel, BatchPhase, BatchSummary, DiagnosticLevel, EncodeEvent, EventReceiver,
    EventSender, FailureReason, JobOutcome, JobRecord, JobReporter,
};
pub use gpu::{GpuDetector, GpuVendor};
pub use probe::{DimensionProbe, Dimensions, FfprobeProbe, ProbeError};
pub use runner::{BatchControl, BatchRunner, BatchState, RunnerError};
pub use scan::{
    count_sequences, discover_candidate_directories, enumerate_sequences, ScanError, Sequence,
    SequenceCatalog, SequenceId,
};
pub use settings::{EncodeSettings, Quality, ResolvedSettings, ScaleSpec, SettingsError};
pub use startup::{check_ffmpeg, check_ffprobe, run_startup_checks, StartupError, ToolVersions};
