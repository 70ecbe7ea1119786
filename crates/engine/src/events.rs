//! Events emitted while a batch runs.

use crate::scan::SequenceId;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Why a job did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The encoder ran and exited unsuccessfully. `code` is `None` when it
    /// was killed by a signal.
    EncoderExit { code: Option<i32> },
    /// The encoder could not be started.
    SpawnFailed { message: String },
    /// The encoder did not exit within the allowed time after its output closed.
    ExitTimeout { secs: u64 },
    /// The selected sequence is no longer on disk.
    SequenceMissing { path: PathBuf },
    /// Reading the encoder's output or waiting on it failed.
    Io { message: String },
}

impl FailureReason {
    /// Faults in running the encoder, as opposed to the encoder reporting failure.
    pub fn is_process_fault(&self) -> bool {
        matches!(
            self,
            FailureReason::SpawnFailed { .. } | FailureReason::ExitTimeout { .. } | FailureReason::Io { .. }
        )
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::EncoderExit { code: Some(code) } => {
                write!(f, "encoder exited with code {}", code)
            }
            FailureReason::EncoderExit { code: None } => write!(f, "encoder terminated by signal"),
            FailureReason::SpawnFailed { message } => write!(f, "could not start encoder: {}", message),
            FailureReason::ExitTimeout { secs } => {
                write!(f, "encoder did not exit within {}s", secs)
            }
            FailureReason::SequenceMissing { path } => {
                write!(f, "sequence no longer available: {}", path.display())
            }
            FailureReason::Io { message } => write!(f, "i/o error: {}", message),
        }
    }
}

/// Terminal status of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    Failed { reason: FailureReason },
    Cancelled,
}

impl JobOutcome {
    pub fn failed(reason: FailureReason) -> Self {
        JobOutcome::Failed { reason }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobOutcome::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Succeeded => "succeeded",
            JobOutcome::Failed { .. } => "failed",
            JobOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Info,
    Warning,
    Error,
}

/// Externally visible batch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum BatchPhase {
    Idle,
    Running { index: usize },
    Completed,
    Cancelled,
}

impl BatchPhase {
    pub fn is_running(&self) -> bool {
        matches!(self, BatchPhase::Running { .. })
    }
}

/// Result of one job, kept in the batch summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    pub sequence: SequenceId,
    pub output_path: Option<PathBuf>,
    pub outcome: JobOutcome,
}

/// Final report of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub phase: BatchPhase,
    pub total: usize,
    /// Jobs that reached a terminal state other than cancelled.
    pub completed: usize,
    pub jobs: Vec<JobRecord>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.jobs.iter().filter(|j| j.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| matches!(j.outcome, JobOutcome::Failed { .. }))
            .count()
    }

    pub fn cancelled(&self) -> usize {
        self.jobs.iter().filter(|j| j.outcome.is_cancelled()).count()
    }

    /// True when every selected job ran and succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.phase == BatchPhase::Completed && self.succeeded() == self.total
    }
}

/// Everything a caller can observe about a running batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EncodeEvent {
    BatchStarted {
        batch_id: Uuid,
        total: usize,
    },
    JobStarted {
        index: usize,
        total: usize,
        sequence: SequenceId,
        output_path: PathBuf,
        expected_frames: u64,
    },
    Progress {
        index: usize,
        current_frame: u64,
        total_frames: u64,
    },
    Diagnostic {
        index: usize,
        level: DiagnosticLevel,
        message: String,
    },
    JobFinished {
        index: usize,
        sequence: SequenceId,
        output_path: Option<PathBuf>,
        outcome: JobOutcome,
    },
    BatchProgress {
        completed: usize,
        processed: usize,
        total: usize,
    },
    BatchFinished {
        summary: BatchSummary,
    },
}

pub type EventSender = mpsc::UnboundedSender<EncodeEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<EncodeEvent>;

/// Creates the channel a batch reports on.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Per-job view of the event channel used by the supervisor.
///
/// A dropped receiver is not an error; events are then discarded.
#[derive(Debug, Clone)]
pub struct JobReporter {
    index: usize,
    tx: EventSender,
}

impl JobReporter {
    pub fn new(index: usize, tx: EventSender) -> Self {
        Self { index, tx }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn progress(&self, current_frame: u64, total_frames: u64) {
        let _ = self.tx.send(EncodeEvent::Progress {
            index: self.index,
            current_frame,
            total_frames,
        });
    }

    pub fn diagnostic(&self, level: DiagnosticLevel, message: impl Into<String>) {
        let _ = self.tx.send(EncodeEvent::Diagnostic {
            index: self.index,
            level,
            message: message.into(),
        });
    }

    pub(crate) fn send(&self, event: EncodeEvent) {
        let _ = self.tx.send(event);
    }
}
