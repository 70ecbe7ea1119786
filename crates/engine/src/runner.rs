//! Job queue and batch runner.
//!
//! A batch is an ordered selection of sequence identifiers. Jobs are compiled
//! at dispatch time and run one at a time; a failed job does not stop the
//! batch, only a batch cancel does.

use crate::compile::JobCompiler;
use crate::encode::Supervise;
use crate::events::{
    BatchPhase, BatchSummary, EncodeEvent, EventSender, FailureReason, JobOutcome, JobRecord,
    JobReporter,
};
use crate::probe::DimensionProbe;
use crate::scan::{SequenceCatalog, SequenceId};
use crate::settings::ResolvedSettings;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Error type for starting a batch
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("No sequences selected")]
    EmptySelection,

    #[error("A batch is already running")]
    BatchAlreadyRunning,

    #[error("Cannot create output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Queue position, counters and cancellation handles of the active batch.
#[derive(Debug)]
pub struct BatchState {
    phase: BatchPhase,
    queue: Vec<SequenceId>,
    completed: usize,
    batch_cancel: CancellationToken,
    job_cancel: Option<CancellationToken>,
}

impl Default for BatchState {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchState {
    pub fn new() -> Self {
        Self {
            phase: BatchPhase::Idle,
            queue: Vec::new(),
            completed: 0,
            batch_cancel: CancellationToken::new(),
            job_cancel: None,
        }
    }

    pub fn phase(&self) -> BatchPhase {
        self.phase
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn total(&self) -> usize {
        self.queue.len()
    }

    pub fn is_batch_cancelled(&self) -> bool {
        self.batch_cancel.is_cancelled()
    }

    /// Starts a new batch at `Running(0)`.
    ///
    /// # Errors
    /// [`RunnerError::EmptySelection`] for an empty selection and
    /// [`RunnerError::BatchAlreadyRunning`] while another batch runs. The
    /// state is unchanged in both cases.
    pub fn start_batch(&mut self, selection: Vec<SequenceId>) -> Result<(), RunnerError> {
        if self.phase.is_running() {
            return Err(RunnerError::BatchAlreadyRunning);
        }
        if selection.is_empty() {
            return Err(RunnerError::EmptySelection);
        }
        self.queue = selection;
        self.completed = 0;
        self.batch_cancel = CancellationToken::new();
        self.job_cancel = None;
        self.phase = BatchPhase::Running { index: 0 };
        Ok(())
    }

    /// Identifier and index of the job to dispatch, if running.
    pub fn current(&self) -> Option<(usize, &SequenceId)> {
        match self.phase {
            BatchPhase::Running { index } => self.queue.get(index).map(|id| (index, id)),
            _ => None,
        }
    }

    /// Creates the cancellation handle for the job about to run.
    ///
    /// The handle is a child of the batch handle, so a batch cancel reaches
    /// the in-flight job too.
    pub fn begin_job(&mut self) -> CancellationToken {
        let token = self.batch_cancel.child_token();
        self.job_cancel = Some(token.clone());
        token
    }

    /// Records a job's terminal outcome and moves to the next state.
    pub fn advance(&mut self, outcome: &JobOutcome) -> BatchPhase {
        let BatchPhase::Running { index } = self.phase else {
            return self.phase;
        };
        self.job_cancel = None;
        if !self.batch_cancel.is_cancelled() && !outcome.is_cancelled() {
            self.completed += 1;
        }
        let next = index + 1;
        self.phase = if self.batch_cancel.is_cancelled() {
            BatchPhase::Cancelled
        } else if next >= self.queue.len() {
            BatchPhase::Completed
        } else {
            BatchPhase::Running { index: next }
        };
        self.phase
    }

    /// Stops dispatch and cancels the in-flight job. Returns false when idle.
    pub fn cancel_batch(&mut self) -> bool {
        if !self.phase.is_running() {
            return false;
        }
        self.batch_cancel.cancel();
        true
    }

    /// Cancels only the in-flight job. Returns false when no job is running.
    pub fn cancel_current(&mut self) -> bool {
        match &self.job_cancel {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Back to `Idle`, e.g. when a batch could not actually start.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Cancellation and status handle, cloneable across tasks.
#[derive(Debug, Clone)]
pub struct BatchControl {
    state: Arc<Mutex<BatchState>>,
}

impl BatchControl {
    pub async fn cancel_batch(&self) -> bool {
        let cancelled = self.state.lock().await.cancel_batch();
        if cancelled {
            info!("Batch cancellation requested");
        }
        cancelled
    }

    pub async fn cancel_current(&self) -> bool {
        let cancelled = self.state.lock().await.cancel_current();
        if cancelled {
            info!("Cancellation of current job requested");
        }
        cancelled
    }

    pub async fn phase(&self) -> BatchPhase {
        self.state.lock().await.phase()
    }
}

/// Runs batches one job at a time.
#[derive(Debug)]
pub struct BatchRunner<S, P> {
    supervisor: S,
    probe: P,
    state: Arc<Mutex<BatchState>>,
}

impl<S, P> BatchRunner<S, P>
where
    S: Supervise,
    P: DimensionProbe + Clone,
{
    pub fn new(supervisor: S, probe: P) -> Self {
        Self {
            supervisor,
            probe,
            state: Arc::new(Mutex::new(BatchState::new())),
        }
    }

    pub fn control(&self) -> BatchControl {
        BatchControl {
            state: Arc::clone(&self.state),
        }
    }

    /// Runs `selection` to a terminal state.
    ///
    /// Each identifier is looked up in `catalog` and compiled just before it
    /// runs. Identifiers missing from the catalog, or whose frames are gone
    /// from disk, fail individually without stopping the batch.
    ///
    /// # Errors
    /// Configuration problems found before the first job: an empty selection,
    /// a batch already running, or an output directory that cannot be created.
    pub async fn run(
        &self,
        catalog: &SequenceCatalog,
        selection: Vec<SequenceId>,
        settings: ResolvedSettings,
        events: EventSender,
    ) -> Result<BatchSummary, RunnerError> {
        let total = selection.len();
        self.state.lock().await.start_batch(selection)?;

        if let Err(source) = tokio::fs::create_dir_all(&settings.output_dir).await {
            self.state.lock().await.reset();
            return Err(RunnerError::OutputDir {
                path: settings.output_dir.clone(),
                source,
            });
        }

        let batch_id = Uuid::new_v4();
        let verbose = settings.verbose;
        let compiler = JobCompiler::new(settings, self.probe.clone());
        info!(%batch_id, total, "Batch started");
        let _ = events.send(EncodeEvent::BatchStarted { batch_id, total });

        let mut records = Vec::with_capacity(total);

        loop {
            let (index, id, cancel) = {
                let mut state = self.state.lock().await;
                let Some((index, id)) = state.current() else {
                    break;
                };
                let id = id.clone();
                (index, id, state.begin_job())
            };

            let reporter = JobReporter::new(index, events.clone());
            let (output_path, outcome) = self
                .dispatch(catalog, &compiler, &id, index, total, verbose, cancel, &reporter)
                .await;

            info!(job = index, sequence = %id, outcome = outcome.as_str(), "Job finished");
            reporter.send(EncodeEvent::JobFinished {
                index,
                sequence: id.clone(),
                output_path: output_path.clone(),
                outcome: outcome.clone(),
            });

            let completed = {
                let mut state = self.state.lock().await;
                state.advance(&outcome);
                state.completed()
            };
            let _ = events.send(EncodeEvent::BatchProgress {
                completed,
                processed: index + 1,
                total,
            });

            records.push(JobRecord {
                sequence: id,
                output_path,
                outcome,
            });
        }

        let (phase, completed) = {
            let state = self.state.lock().await;
            (state.phase(), state.completed())
        };
        let summary = BatchSummary {
            batch_id,
            phase,
            total,
            completed,
            jobs: records,
        };
        info!(
            %batch_id,
            phase = ?summary.phase,
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            cancelled = summary.cancelled(),
            "Batch finished"
        );
        let _ = events.send(EncodeEvent::BatchFinished {
            summary: summary.clone(),
        });
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        catalog: &SequenceCatalog,
        compiler: &JobCompiler<P>,
        id: &SequenceId,
        index: usize,
        total: usize,
        verbose: bool,
        cancel: CancellationToken,
        reporter: &JobReporter,
    ) -> (Option<PathBuf>, JobOutcome) {
        let Some(sequence) = catalog.get(id) else {
            warn!(sequence = %id, "Selected sequence is not in the scan results");
            return (
                None,
                JobOutcome::failed(FailureReason::SequenceMissing {
                    path: id.directory.clone(),
                }),
            );
        };

        if let Some(missing) = sequence.first_missing_frame() {
            warn!(sequence = %id, frame = %missing.display(), "Sequence frames removed since scan");
            return (
                None,
                JobOutcome::failed(FailureReason::SequenceMissing {
                    path: missing.to_path_buf(),
                }),
            );
        }

        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(sequence = %id, "Job cancelled while reading frame dimensions");
                return (None, JobOutcome::Cancelled);
            }
            job = compiler.compile(sequence) => job,
        };
        reporter.send(EncodeEvent::JobStarted {
            index,
            total,
            sequence: id.clone(),
            output_path: job.output_path.clone(),
            expected_frames: job.expected_frames,
        });

        if cancel.is_cancelled() {
            debug!(sequence = %id, "Job cancelled before the encoder started");
            return (Some(job.output_path), JobOutcome::Cancelled);
        }

        info!(job = index, output = %job.output_path.display(), frames = job.expected_frames, "Encoding");
        let outcome = self.supervisor.run(&job, verbose, cancel, reporter).await;
        (Some(job.output_path), outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecId;
    use crate::events::{event_channel, EventReceiver};
    use crate::probe::{Dimensions, ProbeError};
    use crate::settings::EncodeSettings;
    use crate::compile::EncodeJob;
    use std::collections::HashSet;
    use std::fs::{self, File};
    use std::path::Path;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;
    use timelapse_config::EncoderSafetyConfig;

    #[derive(Clone)]
    struct NoProbe;

    impl DimensionProbe for NoProbe {
        async fn dimensions(&self, _frame: &Path) -> Result<Dimensions, ProbeError> {
            Err(ProbeError::Parse(String::new()))
        }
    }

    /// Frame size lookup that never answers.
    #[derive(Clone)]
    struct StalledFrameSize;

    impl DimensionProbe for StalledFrameSize {
        async fn dimensions(&self, _frame: &Path) -> Result<Dimensions, ProbeError> {
            std::future::pending().await
        }
    }

    /// Supervisor that scripts outcomes by sequence start digits.
    #[derive(Default)]
    struct FakeSupervisor {
        failing: HashSet<String>,
        /// Waits for cancellation on these instead of finishing.
        hanging: HashSet<String>,
        dispatched: StdMutex<Vec<String>>,
    }

    impl Supervise for FakeSupervisor {
        async fn run(
            &self,
            job: &EncodeJob,
            _verbose: bool,
            cancel: CancellationToken,
            reporter: &JobReporter,
        ) -> JobOutcome {
            let start = job.sequence.start.clone();
            self.dispatched.lock().unwrap().push(start.clone());
            if self.hanging.contains(&start) {
                cancel.cancelled().await;
                return JobOutcome::Cancelled;
            }
            reporter.progress(job.expected_frames, job.expected_frames);
            if self.failing.contains(&start) {
                JobOutcome::failed(FailureReason::EncoderExit { code: Some(1) })
            } else {
                JobOutcome::Succeeded
            }
        }
    }

    struct Fixture {
        _temp: TempDir,
        dir: PathBuf,
        out: PathBuf,
        catalog: SequenceCatalog,
    }

    /// Three runs: 0001-0002, 0010-0011, 0020-0021.
    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("roll");
        fs::create_dir(&dir).unwrap();
        for n in [1, 2, 10, 11, 20, 21] {
            File::create(dir.join(format!("P{:04}.JPG", n))).unwrap();
        }
        let catalog = SequenceCatalog::scan(&[dir.clone()], "P", ".JPG");
        let out = temp.path().join("renders");
        Fixture {
            _temp: temp,
            dir,
            out,
            catalog,
        }
    }

    fn id(dir: &Path, start: &str) -> SequenceId {
        SequenceId {
            directory: dir.to_path_buf(),
            start: start.to_string(),
        }
    }

    fn settings(out: &Path) -> ResolvedSettings {
        EncodeSettings::for_codec(CodecId::H264Mp4, out)
            .resolve(&EncoderSafetyConfig::default())
            .unwrap()
    }

    fn drain(rx: &mut EventReceiver) -> Vec<EncodeEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_state_machine_transitions() {
        let mut state = BatchState::new();
        assert_eq!(state.phase(), BatchPhase::Idle);
        assert!(matches!(state.start_batch(vec![]), Err(RunnerError::EmptySelection)));
        assert_eq!(state.phase(), BatchPhase::Idle);

        let dir = PathBuf::from("/d");
        state
            .start_batch(vec![id(&dir, "1"), id(&dir, "5")])
            .unwrap();
        assert_eq!(state.phase(), BatchPhase::Running { index: 0 });
        assert!(matches!(
            state.start_batch(vec![id(&dir, "9")]),
            Err(RunnerError::BatchAlreadyRunning)
        ));

        state.begin_job();
        assert_eq!(
            state.advance(&JobOutcome::failed(FailureReason::EncoderExit { code: Some(1) })),
            BatchPhase::Running { index: 1 }
        );
        state.begin_job();
        assert_eq!(state.advance(&JobOutcome::Succeeded), BatchPhase::Completed);
        assert_eq!(state.completed(), 2);

        // A finished batch can be replaced by a new one.
        state.start_batch(vec![id(&dir, "9")]).unwrap();
        assert_eq!(state.completed(), 0);
    }

    #[test]
    fn test_cancel_current_does_not_count_or_stop() {
        let dir = PathBuf::from("/d");
        let mut state = BatchState::new();
        state
            .start_batch(vec![id(&dir, "1"), id(&dir, "5")])
            .unwrap();
        let token = state.begin_job();
        assert!(state.cancel_current());
        assert!(token.is_cancelled());
        assert!(!state.is_batch_cancelled());

        assert_eq!(state.advance(&JobOutcome::Cancelled), BatchPhase::Running { index: 1 });
        assert_eq!(state.completed(), 0);
    }

    #[test]
    fn test_cancel_batch_reaches_job_and_halts() {
        let dir = PathBuf::from("/d");
        let mut state = BatchState::new();
        assert!(!state.cancel_batch());

        state
            .start_batch(vec![id(&dir, "1"), id(&dir, "5")])
            .unwrap();
        let token = state.begin_job();
        assert!(state.cancel_batch());
        assert!(token.is_cancelled());

        assert_eq!(state.advance(&JobOutcome::Succeeded), BatchPhase::Cancelled);
        assert_eq!(state.completed(), 0);
        assert!(state.current().is_none());
    }

    #[tokio::test]
    async fn test_failed_job_does_not_stop_batch() {
        let fx = fixture();
        let supervisor = FakeSupervisor {
            failing: ["0010".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let runner = BatchRunner::new(supervisor, NoProbe);
        let (tx, mut rx) = event_channel();

        let selection = vec![id(&fx.dir, "0001"), id(&fx.dir, "0010"), id(&fx.dir, "0020")];
        let summary = runner
            .run(&fx.catalog, selection, settings(&fx.out), tx)
            .await
            .unwrap();

        assert_eq!(summary.phase, BatchPhase::Completed);
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);
        assert_eq!(
            *runner.supervisor.dispatched.lock().unwrap(),
            vec!["0001", "0010", "0020"]
        );
        assert!(fx.out.is_dir());

        let events = drain(&mut rx);
        assert!(matches!(events.first(), Some(EncodeEvent::BatchStarted { total: 3, .. })));
        assert!(matches!(events.last(), Some(EncodeEvent::BatchFinished { .. })));
    }

    #[tokio::test]
    async fn test_events_of_consecutive_jobs_do_not_interleave() {
        let fx = fixture();
        let runner = BatchRunner::new(FakeSupervisor::default(), NoProbe);
        let (tx, mut rx) = event_channel();

        let selection = vec![id(&fx.dir, "0001"), id(&fx.dir, "0010")];
        runner
            .run(&fx.catalog, selection, settings(&fx.out), tx)
            .await
            .unwrap();

        let mut current = None;
        for event in drain(&mut rx) {
            match event {
                EncodeEvent::JobStarted { index, .. } => {
                    assert_eq!(current, None);
                    current = Some(index);
                }
                EncodeEvent::Progress { index, .. } => assert_eq!(current, Some(index)),
                EncodeEvent::JobFinished { index, .. } => {
                    assert_eq!(current, Some(index));
                    current = None;
                }
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn test_cancel_batch_during_job() {
        let fx = fixture();
        let supervisor = FakeSupervisor {
            hanging: ["0010".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let runner = Arc::new(BatchRunner::new(supervisor, NoProbe));
        let control = runner.control();
        let (tx, mut rx) = event_channel();

        let selection = vec![id(&fx.dir, "0001"), id(&fx.dir, "0010"), id(&fx.dir, "0020")];
        let task = {
            let runner = Arc::clone(&runner);
            let catalog = fx.catalog.clone();
            let settings = settings(&fx.out);
            tokio::spawn(async move { runner.run(&catalog, selection, settings, tx).await })
        };

        // Wait until the second job is in flight.
        loop {
            if control.phase().await == (BatchPhase::Running { index: 1 })
                && runner.supervisor.dispatched.lock().unwrap().len() == 2
            {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(control.cancel_batch().await);

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.phase, BatchPhase::Cancelled);
        assert_eq!(summary.jobs.len(), 2);
        assert_eq!(summary.jobs[1].outcome, JobOutcome::Cancelled);
        assert_eq!(summary.completed, 1);
        assert_eq!(
            *runner.supervisor.dispatched.lock().unwrap(),
            vec!["0001", "0010"]
        );
        assert!(!drain(&mut rx)
            .iter()
            .any(|e| matches!(e, EncodeEvent::JobStarted { index: 2, .. })));
    }

    #[tokio::test]
    async fn test_cancel_current_continues_with_next_job() {
        let fx = fixture();
        let supervisor = FakeSupervisor {
            hanging: ["0001".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let runner = Arc::new(BatchRunner::new(supervisor, NoProbe));
        let control = runner.control();
        let (tx, _rx) = event_channel();

        let selection = vec![id(&fx.dir, "0001"), id(&fx.dir, "0010")];
        let task = {
            let runner = Arc::clone(&runner);
            let catalog = fx.catalog.clone();
            let settings = settings(&fx.out);
            tokio::spawn(async move { runner.run(&catalog, selection, settings, tx).await })
        };

        while runner.supervisor.dispatched.lock().unwrap().is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(control.cancel_current().await);

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.phase, BatchPhase::Completed);
        assert_eq!(summary.jobs[0].outcome, JobOutcome::Cancelled);
        assert_eq!(summary.jobs[1].outcome, JobOutcome::Succeeded);
        assert_eq!(summary.completed, 1);
    }

    #[tokio::test]
    async fn test_removed_sequence_is_a_single_job_failure() {
        let fx = fixture();
        fs::remove_file(fx.dir.join("P0011.JPG")).unwrap();
        let runner = BatchRunner::new(FakeSupervisor::default(), NoProbe);
        let (tx, _rx) = event_channel();

        let selection = vec![
            id(&fx.dir, "0010"),
            id(&fx.dir, "9999"),
            id(&fx.dir, "0020"),
        ];
        let summary = runner
            .run(&fx.catalog, selection, settings(&fx.out), tx)
            .await
            .unwrap();

        assert_eq!(summary.phase, BatchPhase::Completed);
        assert!(matches!(
            &summary.jobs[0].outcome,
            JobOutcome::Failed { reason: FailureReason::SequenceMissing { path } }
                if path == &fx.dir.join("P0011.JPG")
        ));
        assert!(matches!(
            summary.jobs[1].outcome,
            JobOutcome::Failed { reason: FailureReason::SequenceMissing { .. } }
        ));
        assert_eq!(summary.jobs[2].outcome, JobOutcome::Succeeded);
        assert_eq!(*runner.supervisor.dispatched.lock().unwrap(), vec!["0020"]);
    }

    #[tokio::test]
    async fn test_cancel_reaches_job_waiting_on_frame_size() {
        let fx = fixture();
        let runner = Arc::new(BatchRunner::new(FakeSupervisor::default(), StalledFrameSize));
        let control = runner.control();
        let (tx, mut rx) = event_channel();

        let selection = vec![id(&fx.dir, "0001"), id(&fx.dir, "0010")];
        let task = {
            let runner = Arc::clone(&runner);
            let catalog = fx.catalog.clone();
            let settings = settings(&fx.out);
            tokio::spawn(async move { runner.run(&catalog, selection, settings, tx).await })
        };

        while !control.phase().await.is_running() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(control.cancel_batch().await);

        let summary = tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("batch stuck waiting on frame size")
            .unwrap()
            .unwrap();
        assert_eq!(summary.phase, BatchPhase::Cancelled);
        assert_eq!(summary.jobs.len(), 1);
        assert_eq!(summary.jobs[0].outcome, JobOutcome::Cancelled);
        assert!(runner.supervisor.dispatched.lock().unwrap().is_empty());
        assert!(!drain(&mut rx)
            .iter()
            .any(|e| matches!(e, EncodeEvent::JobStarted { .. })));
    }

    #[tokio::test]
    async fn test_empty_selection_stays_idle() {
        let fx = fixture();
        let runner = BatchRunner::new(FakeSupervisor::default(), NoProbe);
        let (tx, mut rx) = event_channel();

        let result = runner
            .run(&fx.catalog, Vec::new(), settings(&fx.out), tx)
            .await;

        assert!(matches!(result, Err(RunnerError::EmptySelection)));
        assert_eq!(runner.control().phase().await, BatchPhase::Idle);
        assert!(drain(&mut rx).is_empty());
        assert!(!fx.out.exists());
    }

    #[tokio::test]
    async fn test_unusable_output_directory_is_a_configuration_error() {
        let fx = fixture();
        let blocker = fx.dir.parent().unwrap().join("blocker");
        File::create(&blocker).unwrap();
        let runner = BatchRunner::new(FakeSupervisor::default(), NoProbe);
        let (tx, _rx) = event_channel();

        let mut resolved = settings(&fx.out);
        resolved.output_dir = blocker.join("inner");
        let result = runner
            .run(&fx.catalog, vec![id(&fx.dir, "0001")], resolved, tx)
            .await;

        assert!(matches!(result, Err(RunnerError::OutputDir { .. })));
        assert_eq!(runner.control().phase().await, BatchPhase::Idle);
        assert!(runner.supervisor.dispatched.lock().unwrap().is_empty());
    }
}
