//! Terminal rendering of batch events.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::Path;
use timelapse_engine::{BatchSummary, DiagnosticLevel, EncodeEvent, EventReceiver, JobOutcome};

const JOB_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} frames ({percent}%) {msg}";
const BATCH_TEMPLATE: &str = "Batch [{bar:40.green/white}] {pos}/{len} jobs {msg}";

/// Consumes events until the sender side closes.
pub async fn render(mut rx: EventReceiver, json: bool) {
    if json {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!(error = %e, "Cannot serialize event"),
            }
        }
        return;
    }

    let mut bars = Bars::new();
    while let Some(event) = rx.recv().await {
        bars.apply(event);
    }
}

struct Bars {
    multi: MultiProgress,
    batch: Option<ProgressBar>,
    job: Option<ProgressBar>,
}

impl Bars {
    fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            batch: None,
            job: None,
        }
    }

    fn apply(&mut self, event: EncodeEvent) {
        match event {
            EncodeEvent::BatchStarted { total, .. } => {
                let bar = self.multi.add(ProgressBar::new(total as u64));
                if let Ok(style) = ProgressStyle::with_template(BATCH_TEMPLATE) {
                    bar.set_style(style.progress_chars("=> "));
                }
                self.batch = Some(bar);
            }
            EncodeEvent::JobStarted {
                index,
                total,
                output_path,
                expected_frames,
                ..
            } => {
                let bar = ProgressBar::new(expected_frames);
                let bar = match &self.batch {
                    Some(batch) => self.multi.insert_before(batch, bar),
                    None => self.multi.add(bar),
                };
                if let Ok(style) = ProgressStyle::with_template(JOB_TEMPLATE) {
                    bar.set_style(style.progress_chars("#>-"));
                }
                bar.set_message(format!("[{}/{}] {}", index + 1, total, file_name(&output_path)));
                self.job = Some(bar);
            }
            EncodeEvent::Progress { current_frame, .. } => {
                if let Some(bar) = &self.job {
                    bar.set_position(current_frame);
                }
            }
            EncodeEvent::Diagnostic { level, message, .. } => {
                let tag = match level {
                    DiagnosticLevel::Info => "info",
                    DiagnosticLevel::Warning => "warning",
                    DiagnosticLevel::Error => "ffmpeg",
                };
                self.println(format!("  {}: {}", tag, message));
            }
            EncodeEvent::JobFinished {
                sequence,
                output_path,
                outcome,
                ..
            } => {
                if let Some(bar) = self.job.take() {
                    bar.finish_and_clear();
                }
                let target = output_path
                    .as_deref()
                    .map(file_name)
                    .unwrap_or_else(|| "-".to_string());
                let line = match &outcome {
                    JobOutcome::Succeeded => format!("done      {} -> {}", sequence, target),
                    JobOutcome::Failed { reason } => {
                        format!("failed    {} -> {}: {}", sequence, target, reason)
                    }
                    JobOutcome::Cancelled => format!("cancelled {}", sequence),
                };
                self.println(line);
            }
            EncodeEvent::BatchProgress {
                completed, processed, ..
            } => {
                if let Some(bar) = &self.batch {
                    bar.set_position(processed as u64);
                    bar.set_message(format!("({} completed)", completed));
                }
            }
            EncodeEvent::BatchFinished { summary } => {
                if let Some(bar) = self.batch.take() {
                    bar.finish_and_clear();
                }
                self.println(summary_line(&summary));
            }
        }
    }

    fn println(&self, line: String) {
        // A hidden target (no terminal) swallows println.
        if self.multi.is_hidden() || self.multi.println(&line).is_err() {
            println!("{}", line);
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// One-line batch result, e.g. `Batch completed: 3 succeeded, 1 failed of 4`.
pub fn summary_line(summary: &BatchSummary) -> String {
    let state = match summary.phase {
        timelapse_engine::BatchPhase::Cancelled => "cancelled",
        _ => "completed",
    };
    let mut line = format!(
        "Batch {}: {} succeeded, {} failed",
        state,
        summary.succeeded(),
        summary.failed()
    );
    if summary.cancelled() > 0 {
        line.push_str(&format!(", {} cancelled", summary.cancelled()));
    }
    line.push_str(&format!(" of {}", summary.total));
    line
}
