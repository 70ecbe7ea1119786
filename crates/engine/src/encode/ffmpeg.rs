//! ffmpeg process supervisor
//!
//! Runs one [`EncodeJob`] through ffmpeg with `-progress pipe:1`, turns the
//! progress stream into events, and enforces cancellation and exit timeouts.

use super::progress::{parse_progress_line, ProgressLine, ProgressTracker};
use crate::compile::EncodeJob;
use crate::events::{DiagnosticLevel, FailureReason, JobOutcome, JobReporter};
use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use timelapse_config::EncoderConfig;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Success diagnostics mentioning this are routine noise from image inputs.
const DEPRECATED_PIX_FMT_NOTICE: &str = "deprecated pixel format";

/// Runs encode jobs to a terminal outcome.
pub trait Supervise: Send + Sync {
    fn run(
        &self,
        job: &EncodeJob,
        verbose: bool,
        cancel: CancellationToken,
        reporter: &JobReporter,
    ) -> impl Future<Output = JobOutcome> + Send;
}

/// Timing and binary location for [`FfmpegSupervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub ffmpeg_path: PathBuf,
    /// Bound on the wait for exit once the progress stream has ended.
    pub exit_timeout: Duration,
    /// Time between the quit request and a forced kill.
    pub cancel_grace: Duration,
    /// Bound on a single progress read.
    pub read_poll: Duration,
}

impl From<&EncoderConfig> for SupervisorOptions {
    fn from(cfg: &EncoderConfig) -> Self {
        Self {
            ffmpeg_path: cfg.ffmpeg_path.clone(),
            exit_timeout: Duration::from_secs(cfg.exit_timeout_secs),
            cancel_grace: Duration::from_millis(cfg.cancel_grace_ms),
            read_poll: Duration::from_millis(cfg.read_poll_ms.max(1)),
        }
    }
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self::from(&EncoderConfig::default())
    }
}

/// Inserts `-progress pipe:1` immediately before the first `-i`.
///
/// Without an `-i` the flag goes first, and a warning is logged.
pub fn with_progress_flag(args: &[String]) -> Vec<String> {
    let at = args.iter().position(|a| a == "-i").unwrap_or_else(|| {
        warn!("No -i in encoder arguments; placing -progress first");
        0
    });
    let mut out = Vec::with_capacity(args.len() + 2);
    out.extend_from_slice(&args[..at]);
    out.push("-progress".to_string());
    out.push("pipe:1".to_string());
    out.extend_from_slice(&args[at..]);
    out
}

/// Supervises ffmpeg child processes.
#[derive(Debug, Clone, Default)]
pub struct FfmpegSupervisor {
    options: SupervisorOptions,
}

enum ReadEnd {
    /// `progress=end` or the stream closed.
    Finished,
    Cancelled,
}

impl FfmpegSupervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    async fn read_progress(
        &self,
        child: &mut Child,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
        reporter: &JobReporter,
    ) -> Result<ReadEnd, std::io::Error> {
        let Some(stdout) = child.stdout.take() else {
            return Ok(ReadEnd::Finished);
        };
        let mut reader = BufReader::new(stdout);
        // Survives poll timeouts: `read_until` resumes appending to it.
        let mut buf = Vec::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(ReadEnd::Cancelled),
                read = tokio::time::timeout(self.options.read_poll, reader.read_until(b'\n', &mut buf)) => {
                    let Ok(read) = read else {
                        continue;
                    };
                    if read? == 0 && buf.is_empty() {
                        return Ok(ReadEnd::Finished);
                    }
                    let raw = std::mem::take(&mut buf);
                    let text = match String::from_utf8(raw) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(
                                job = reporter.index(),
                                line = %String::from_utf8_lossy(e.as_bytes()).trim_end(),
                                "Ignoring progress line that is not valid UTF-8"
                            );
                            continue;
                        }
                    };
                    let line = text.trim_end_matches(['\n', '\r']);
                    match parse_progress_line(line) {
                        ProgressLine::Frame(frame) => {
                            if let Some(frame) = tracker.frame(frame) {
                                reporter.progress(frame, tracker.total());
                            }
                        }
                        ProgressLine::End => {
                            if let Some(frame) = tracker.finish() {
                                reporter.progress(frame, tracker.total());
                            }
                            return Ok(ReadEnd::Finished);
                        }
                        ProgressLine::Other => {}
                        ProgressLine::Malformed => {
                            warn!(job = reporter.index(), line = %line, "Ignoring malformed progress line");
                        }
                    }
                }
            }
        }
    }

    /// Asks ffmpeg to quit, then kills it if it has not exited within the grace window.
    async fn terminate(&self, child: &mut Child) {
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(b"q").await {
                debug!(error = %e, "Could not send quit request to encoder");
            }
            drop(stdin);
        }

        match tokio::time::timeout(self.options.cancel_grace, child.wait()).await {
            Ok(Ok(status)) => debug!(?status, "Encoder stopped after quit request"),
            Ok(Err(e)) => warn!(error = %e, "Waiting for cancelled encoder failed"),
            Err(_) => {
                info!("Encoder ignored quit request; killing");
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "Failed to kill encoder");
                }
                let _ = child.wait().await;
            }
        }
    }

    fn report_exit(
        &self,
        job: &EncodeJob,
        status: ExitStatus,
        stderr: &str,
        verbose: bool,
        tracker: &mut ProgressTracker,
        reporter: &JobReporter,
    ) -> JobOutcome {
        if status.success() {
            if let Some(frame) = tracker.finish() {
                reporter.progress(frame, tracker.total());
            }
            if verbose {
                for line in stderr
                    .lines()
                    .filter(|l| !l.trim().is_empty() && !l.contains(DEPRECATED_PIX_FMT_NOTICE))
                {
                    reporter.diagnostic(DiagnosticLevel::Info, line);
                }
            }
            info!(output = %job.output_path.display(), "Encode finished");
            return JobOutcome::Succeeded;
        }

        error!(
            output = %job.output_path.display(),
            code = ?status.code(),
            stderr = %stderr,
            "Encoder failed"
        );
        for line in stderr.lines() {
            reporter.diagnostic(DiagnosticLevel::Error, line);
        }
        JobOutcome::failed(FailureReason::EncoderExit {
            code: status.code(),
        })
    }
}

/// Whole seconds, rounded up so sub-second limits do not read as zero.
fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

fn collect_stderr(child: &mut Child) -> JoinHandle<String> {
    let stderr = child.stderr.take();
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr {
            if let Err(e) = stderr.read_to_end(&mut buf).await {
                debug!(error = %e, "Encoder stderr read failed");
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

impl Supervise for FfmpegSupervisor {
    async fn run(
        &self,
        job: &EncodeJob,
        verbose: bool,
        cancel: CancellationToken,
        reporter: &JobReporter,
    ) -> JobOutcome {
        let args = with_progress_flag(&job.args);
        debug!(program = %self.options.ffmpeg_path.display(), ?args, "Spawning encoder");

        let mut command = Command::new(&self.options.ffmpeg_path);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group: a terminal Ctrl-C must reach the runner, not ffmpeg.
        #[cfg(unix)]
        command.process_group(0);
        let spawned = command.spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                error!(
                    program = %self.options.ffmpeg_path.display(),
                    error = %e,
                    "Failed to start encoder"
                );
                reporter.diagnostic(
                    DiagnosticLevel::Error,
                    format!("could not start {}: {}", self.options.ffmpeg_path.display(), e),
                );
                return JobOutcome::failed(FailureReason::SpawnFailed {
                    message: e.to_string(),
                });
            }
        };

        let stderr_task = collect_stderr(&mut child);
        let mut tracker = ProgressTracker::new(job.expected_frames);

        let read = self
            .read_progress(&mut child, &mut tracker, &cancel, reporter)
            .await;
        match read {
            Ok(ReadEnd::Finished) => {}
            Ok(ReadEnd::Cancelled) => {
                info!(output = %job.output_path.display(), "Cancelling encode");
                self.terminate(&mut child).await;
                return JobOutcome::Cancelled;
            }
            Err(e) => {
                warn!(error = %e, "Reading encoder progress failed");
                reporter.diagnostic(DiagnosticLevel::Warning, format!("progress stream error: {}", e));
            }
        }

        let exit_timeout = self.options.exit_timeout;
        let timeout_secs = ceil_secs(exit_timeout);
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(output = %job.output_path.display(), "Cancelling encode");
                self.terminate(&mut child).await;
                return JobOutcome::Cancelled;
            }
            waited = tokio::time::timeout(exit_timeout, child.wait()) => waited,
        };

        let status = match status {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                error!(error = %e, "Waiting for encoder failed");
                let _ = child.start_kill();
                return JobOutcome::failed(FailureReason::Io {
                    message: e.to_string(),
                });
            }
            Err(_) => {
                error!(
                    output = %job.output_path.display(),
                    secs = timeout_secs,
                    "Encoder did not exit in time; killing"
                );
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "Failed to kill encoder");
                }
                let _ = child.wait().await;
                reporter.diagnostic(
                    DiagnosticLevel::Error,
                    format!("encoder did not exit within {}s", timeout_secs),
                );
                return JobOutcome::failed(FailureReason::ExitTimeout {
                    secs: timeout_secs,
                });
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();
        self.report_exit(job, status, &stderr, verbose, &mut tracker, reporter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{event_channel, EncodeEvent, EventReceiver};
    use crate::scan::SequenceId;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    fn job(expected_frames: u64) -> EncodeJob {
        EncodeJob {
            args: strings(&["-y", "-i", "in/P%04d.JPG", "out.mp4"]),
            output_path: PathBuf::from("out.mp4"),
            expected_frames,
            sequence: SequenceId {
                directory: PathBuf::from("in"),
                start: "0001".to_string(),
            },
        }
    }

    fn drain(rx: &mut EventReceiver) -> Vec<EncodeEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn progress_frames(events: &[EncodeEvent]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|e| match e {
                EncodeEvent::Progress { current_frame, .. } => Some(*current_frame),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_progress_flag_goes_before_input() {
        let args = strings(&["-y", "-framerate", "24", "-i", "a/P%04d.JPG", "out.mp4"]);
        assert_eq!(
            with_progress_flag(&args),
            strings(&["-y", "-framerate", "24", "-progress", "pipe:1", "-i", "a/P%04d.JPG", "out.mp4"])
        );
    }

    #[test]
    fn test_progress_flag_fallback_without_input() {
        let args = strings(&["-version"]);
        assert_eq!(with_progress_flag(&args), strings(&["-progress", "pipe:1", "-version"]));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_spawn() {
        let supervisor = FfmpegSupervisor::new(SupervisorOptions {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
            ..SupervisorOptions::default()
        });
        let (tx, mut rx) = event_channel();
        let reporter = JobReporter::new(0, tx);

        let outcome = supervisor
            .run(&job(10), false, CancellationToken::new(), &reporter)
            .await;
        assert!(matches!(
            outcome,
            JobOutcome::Failed {
                reason: FailureReason::SpawnFailed { .. }
            }
        ));
        assert!(progress_frames(&drain(&mut rx)).is_empty());
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;
        use tempfile::TempDir;

        /// Writes an executable shell script standing in for ffmpeg.
        fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("ffmpeg");
            fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn supervisor(ffmpeg_path: PathBuf) -> FfmpegSupervisor {
            FfmpegSupervisor::new(SupervisorOptions {
                ffmpeg_path,
                exit_timeout: Duration::from_secs(5),
                cancel_grace: Duration::from_millis(200),
                read_poll: Duration::from_millis(20),
            })
        }

        #[tokio::test]
        async fn test_successful_encode_reports_monotonic_progress() {
            let temp = TempDir::new().unwrap();
            let ffmpeg = fake_ffmpeg(
                temp.path(),
                "echo 'frame=1'\necho 'fps=0.0'\necho 'frame=3'\necho 'not a pair'\n\
                 echo 'frame=2'\necho 'progress=continue'\necho 'frame=5'\necho 'progress=end'\nexit 0",
            );
            let (tx, mut rx) = event_channel();
            let reporter = JobReporter::new(0, tx);

            let outcome = supervisor(ffmpeg)
                .run(&job(5), false, CancellationToken::new(), &reporter)
                .await;

            assert_eq!(outcome, JobOutcome::Succeeded);
            assert_eq!(progress_frames(&drain(&mut rx)), vec![1, 3, 5]);
        }

        #[tokio::test]
        async fn test_success_without_end_marker_reports_total() {
            let temp = TempDir::new().unwrap();
            let ffmpeg = fake_ffmpeg(temp.path(), "echo 'frame=2'\nexit 0");
            let (tx, mut rx) = event_channel();
            let reporter = JobReporter::new(0, tx);

            let outcome = supervisor(ffmpeg)
                .run(&job(8), false, CancellationToken::new(), &reporter)
                .await;

            assert_eq!(outcome, JobOutcome::Succeeded);
            assert_eq!(progress_frames(&drain(&mut rx)), vec![2, 8]);
        }

        #[tokio::test]
        async fn test_progress_flag_reaches_the_encoder() {
            let temp = TempDir::new().unwrap();
            let log = temp.path().join("args.txt");
            let ffmpeg = fake_ffmpeg(
                temp.path(),
                &format!("echo \"$@\" > '{}'\necho 'progress=end'", log.display()),
            );
            let (tx, _rx) = event_channel();
            let reporter = JobReporter::new(0, tx);

            supervisor(ffmpeg)
                .run(&job(1), false, CancellationToken::new(), &reporter)
                .await;

            let seen = fs::read_to_string(&log).unwrap();
            assert_eq!(seen.trim(), "-y -progress pipe:1 -i in/P%04d.JPG out.mp4");
        }

        #[tokio::test]
        async fn test_invalid_utf8_progress_line_is_skipped() {
            let temp = TempDir::new().unwrap();
            let ffmpeg = fake_ffmpeg(
                temp.path(),
                "printf 'frame=1\\nx=\\377\\nframe=2\\n'\nsleep 1\n\
                 echo 'frame=3'\necho 'progress=end'\nexit 0",
            );
            let (tx, mut rx) = event_channel();
            let reporter = JobReporter::new(0, tx);
            let supervisor = FfmpegSupervisor::new(SupervisorOptions {
                ffmpeg_path: ffmpeg,
                exit_timeout: Duration::from_millis(500),
                cancel_grace: Duration::from_millis(100),
                read_poll: Duration::from_millis(20),
            });

            let outcome = supervisor
                .run(&job(3), false, CancellationToken::new(), &reporter)
                .await;

            assert_eq!(outcome, JobOutcome::Succeeded);
            assert_eq!(progress_frames(&drain(&mut rx)), vec![1, 2, 3]);
        }

        #[cfg(target_os = "linux")]
        #[tokio::test]
        async fn test_encoder_leads_its_own_process_group() {
            let temp = TempDir::new().unwrap();
            let log = temp.path().join("pgid.txt");
            // Field 5 of /proc/<pid>/stat is the process group id.
            let ffmpeg = fake_ffmpeg(
                temp.path(),
                &format!(
                    "echo \"$$ $(cut -d' ' -f5 /proc/$$/stat)\" > '{}'\necho 'progress=end'",
                    log.display()
                ),
            );
            let (tx, _rx) = event_channel();
            let reporter = JobReporter::new(0, tx);

            let outcome = supervisor(ffmpeg)
                .run(&job(1), false, CancellationToken::new(), &reporter)
                .await;
            assert_eq!(outcome, JobOutcome::Succeeded);

            let seen = fs::read_to_string(&log).unwrap();
            let ids: Vec<&str> = seen.split_whitespace().collect();
            assert_eq!(ids.len(), 2);
            assert_eq!(ids[0], ids[1]);
        }

        #[test]
        fn test_timeout_seconds_round_up() {
            assert_eq!(ceil_secs(Duration::from_millis(300)), 1);
            assert_eq!(ceil_secs(Duration::from_secs(120)), 120);
            assert_eq!(ceil_secs(Duration::from_millis(1500)), 2);
        }

        #[tokio::test]
        async fn test_nonzero_exit_surfaces_stderr() {
            let temp = TempDir::new().unwrap();
            let ffmpeg = fake_ffmpeg(
                temp.path(),
                "echo 'frame=1'\necho 'Unknown encoder' >&2\nexit 3",
            );
            let (tx, mut rx) = event_channel();
            let reporter = JobReporter::new(4, tx);

            let outcome = supervisor(ffmpeg)
                .run(&job(10), false, CancellationToken::new(), &reporter)
                .await;

            assert_eq!(
                outcome,
                JobOutcome::failed(FailureReason::EncoderExit { code: Some(3) })
            );
            let events = drain(&mut rx);
            assert!(events.iter().any(|e| matches!(
                e,
                EncodeEvent::Diagnostic { index: 4, level: DiagnosticLevel::Error, message }
                    if message == "Unknown encoder"
            )));
        }

        #[tokio::test]
        async fn test_verbose_success_filters_pixel_format_notice() {
            let temp = TempDir::new().unwrap();
            let ffmpeg = fake_ffmpeg(
                temp.path(),
                "echo 'deprecated pixel format used, make sure you did set range correctly' >&2\n\
                 echo 'encoded 5 frames' >&2\necho 'progress=end'\nexit 0",
            );
            let (tx, mut rx) = event_channel();
            let reporter = JobReporter::new(0, tx);

            supervisor(ffmpeg)
                .run(&job(5), true, CancellationToken::new(), &reporter)
                .await;

            let messages: Vec<String> = drain(&mut rx)
                .into_iter()
                .filter_map(|e| match e {
                    EncodeEvent::Diagnostic { message, .. } => Some(message),
                    _ => None,
                })
                .collect();
            assert_eq!(messages, vec!["encoded 5 frames".to_string()]);
        }

        #[tokio::test]
        async fn test_cancel_stops_a_running_encode() {
            let temp = TempDir::new().unwrap();
            // Ignores the quit request on stdin, so the kill path is exercised.
            let ffmpeg = fake_ffmpeg(temp.path(), "echo 'frame=1'\nsleep 30\nexit 0");
            let (tx, _rx) = event_channel();
            let reporter = JobReporter::new(0, tx);
            let cancel = CancellationToken::new();

            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                trigger.cancel();
            });

            let started = std::time::Instant::now();
            let outcome = supervisor(ffmpeg).run(&job(10), false, cancel, &reporter).await;

            assert_eq!(outcome, JobOutcome::Cancelled);
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[tokio::test]
        async fn test_exit_timeout_is_a_process_fault() {
            let temp = TempDir::new().unwrap();
            // Closes stdout, then lingers.
            let ffmpeg = fake_ffmpeg(temp.path(), "echo 'progress=end'\nexec 1>&-\nsleep 30");
            let (tx, _rx) = event_channel();
            let reporter = JobReporter::new(0, tx);
            let supervisor = FfmpegSupervisor::new(SupervisorOptions {
                ffmpeg_path: ffmpeg,
                exit_timeout: Duration::from_millis(300),
                cancel_grace: Duration::from_millis(100),
                read_poll: Duration::from_millis(20),
            });

            let outcome = supervisor
                .run(&job(1), false, CancellationToken::new(), &reporter)
                .await;

            match outcome {
                JobOutcome::Failed { reason } => {
                    assert!(reason.is_process_fault());
                    // A 300ms limit is reported as a whole second, not zero.
                    assert_eq!(reason, FailureReason::ExitTimeout { secs: 1 });
                }
                other => panic!("expected timeout failure, got {:?}", other),
            }
        }
    }
}
