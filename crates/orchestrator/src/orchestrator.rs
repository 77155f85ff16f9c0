//! Job orchestration loop.
//!
//! ## Loop
//!
//! Each turn of the loop:
//!
//! ```text
//! 1. restart failed/timed out jobs of partitions waiting for a retry
//! 2. start jobs for new slices until the input ends or the tracker is full
//! 3. stop when nothing is tracked and no slice is left to admit
//! 4. refresh every running job in one repository call
//! 5. triage partitions; completed ones are handed to the caller
//! 6. pause before the next poll while anything is still in flight
//! ```
//!
//! The orchestrator is single-threaded: parallelism only exists on the remote
//! side. The pause in step 6 is the only blocking point.

use std::collections::{HashSet, VecDeque};
use std::iter::FusedIterator;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use asyncjob_core::{AsyncJob, AsyncPartition, JobId, JobStatus, MAX_ATTEMPTS};
use asyncjob_observability::SecretRedactor;

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::repository::{JobRepository, RepositoryError};
use crate::slices::SliceQueue;
use crate::tracker::{JobTracker, SlotKey, SlotReservation, TrackerError};

/// Statuses the triage below was written against.
///
/// Must stay equal to [`JobStatus::ALL`]; adding a status means reviewing the
/// retry, triage and abort logic of this module first.
const KNOWN_JOB_STATUSES: [JobStatus; 4] = [
    JobStatus::Completed,
    JobStatus::Failed,
    JobStatus::Running,
    JobStatus::TimedOut,
];

fn check_known_statuses(known: &[JobStatus]) -> Result<(), OrchestratorError> {
    let known: HashSet<JobStatus> = known.iter().copied().collect();
    let all: HashSet<JobStatus> = JobStatus::ALL.iter().copied().collect();
    if known != all {
        return Err(OrchestratorError::Configuration(
            "a job status has been added or removed; the orchestrator's status handling \
             must be reviewed before updating its known statuses"
                .to_string(),
        ));
    }
    Ok(())
}

/// Orchestrator runtime statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestratorStats {
    pub jobs_started: u64,
    pub jobs_retried: u64,
    pub status_polls: u64,
    pub partitions_completed: u64,
    pub non_breaking_errors: u64,
}

/// Why a job could not be started.
enum StartFailure {
    Tracker(TrackerError),
    Repository(RepositoryError),
}

/// Drives remote jobs for a sequence of slices and yields completed partitions.
///
/// The orchestrator is itself the (single pass) sequence of results: iterate it
/// to run the loop. After a terminal error, or once every slice is done, it
/// yields nothing more. A run with start failures that did not abort it ends
/// with [`OrchestratorError::Incomplete`].
pub struct JobOrchestrator<R, T, I>
where
    R: JobRepository + ?Sized,
    T: JobTracker + ?Sized,
    I: Iterator<Item = R::Slice>,
{
    repository: Arc<R>,
    tracker: Arc<T>,
    slices: SliceQueue<I>,
    config: OrchestratorConfig,
    redactor: SecretRedactor,
    /// Partitions with failed or timed out jobs, retried before any admission.
    retrying: Vec<AsyncPartition<R::Slice>>,
    /// Partitions whose jobs are all running or completed.
    running: Vec<AsyncPartition<R::Slice>>,
    ready: VecDeque<Result<AsyncPartition<R::Slice>, OrchestratorError>>,
    non_breaking_errors: Vec<String>,
    has_started_a_job: bool,
    admission_deferred: bool,
    pause_before_next_poll: bool,
    finished: bool,
    stats: OrchestratorStats,
}

impl<R, T, I> JobOrchestrator<R, T, I>
where
    R: JobRepository + ?Sized,
    T: JobTracker + ?Sized,
    I: Iterator<Item = R::Slice>,
{
    pub fn new(
        repository: Arc<R>,
        slices: impl IntoIterator<IntoIter = I, Item = R::Slice>,
        tracker: Arc<T>,
        config: OrchestratorConfig,
    ) -> Result<Self, OrchestratorError> {
        check_known_statuses(&KNOWN_JOB_STATUSES)?;

        let redactor = SecretRedactor::from_secrets(config.secrets.iter().cloned());
        Ok(Self {
            repository,
            tracker,
            slices: SliceQueue::new(slices.into_iter()),
            config,
            redactor,
            retrying: Vec::new(),
            running: Vec::new(),
            ready: VecDeque::new(),
            non_breaking_errors: Vec::new(),
            has_started_a_job: false,
            admission_deferred: false,
            pause_before_next_poll: false,
            finished: false,
            stats: OrchestratorStats::default(),
        })
    }

    pub fn stats(&self) -> &OrchestratorStats {
        &self.stats
    }

    /// Number of partitions still in flight.
    pub fn tracked_partitions(&self) -> usize {
        self.retrying.len() + self.running.len()
    }

    /// One turn of the loop. Completed partitions land in `self.ready`.
    fn step(&mut self) -> Result<(), OrchestratorError> {
        if std::mem::take(&mut self.pause_before_next_poll) {
            self.wait_on_status_update();
        }

        if let Err(err) = self.start_jobs() {
            self.abort_all_running_jobs();
            return Err(err);
        }

        let nothing_tracked = self.tracked_partitions() == 0;
        if nothing_tracked
            && !self.slices.has_pending()
            && (self.has_started_a_job || self.slices.is_exhausted())
        {
            return self.finish();
        }

        if let Err(err) = self.update_jobs_status() {
            self.abort_all_running_jobs();
            return Err(err);
        }

        self.process_partitions();

        self.pause_before_next_poll =
            !self.finished && (self.tracked_partitions() > 0 || self.admission_deferred);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), OrchestratorError> {
        self.finished = true;
        if self.non_breaking_errors.is_empty() {
            info!(
                orchestrator = %self.config.name,
                jobs_started = self.stats.jobs_started,
                partitions_completed = self.stats.partitions_completed,
                "all slices processed"
            );
            return Ok(());
        }
        Err(OrchestratorError::Incomplete {
            count: self.non_breaking_errors.len(),
            details: self.non_breaking_errors.join("\n"),
        })
    }

    /// Retry pass followed by the admission pass.
    fn start_jobs(&mut self) -> Result<(), OrchestratorError> {
        self.admission_deferred = false;

        let mut retrying = std::mem::take(&mut self.retrying);
        let retried = retrying
            .iter_mut()
            .try_for_each(|partition| self.replace_failed_jobs(partition));
        self.retrying = retrying;
        retried?;

        while let Some(slice) = self.slices.next_slice() {
            match self.start_job(&slice, None) {
                Ok(job) => {
                    debug!(
                        orchestrator = %self.config.name,
                        job_id = %job.id(),
                        slice = ?slice,
                        "started job"
                    );
                    self.has_started_a_job = true;
                    self.stats.jobs_started += 1;
                    self.running.push(AsyncPartition::from_job(job, slice));
                }
                Err(StartFailure::Tracker(TrackerError::ConcurrentLimitReached { limit })) => {
                    self.slices.push_front(slice);
                    self.admission_deferred = true;
                    debug!(
                        orchestrator = %self.config.name,
                        limit,
                        "concurrent job limit reached; waiting before creating more jobs"
                    );
                    break;
                }
                Err(failure) => self.handle_start_failure(&slice, failure)?,
            }
        }
        Ok(())
    }

    fn replace_failed_jobs(
        &mut self,
        partition: &mut AsyncPartition<R::Slice>,
    ) -> Result<(), OrchestratorError> {
        let to_replace: Vec<(JobId, R::Slice)> = partition
            .jobs()
            .filter(|job| job.status().is_retriable())
            .filter(|job| partition.attempts(job.id()).is_some_and(|n| n < MAX_ATTEMPTS))
            .map(|job| (job.id().clone(), job.parameters().clone()))
            .collect();

        for (previous, slice) in to_replace {
            match self.start_job(&slice, Some(&previous)) {
                Ok(job) => {
                    debug!(
                        orchestrator = %self.config.name,
                        previous_job_id = %previous,
                        job_id = %job.id(),
                        "restarted job"
                    );
                    partition.replace_job(&previous, vec![job])?;
                    self.stats.jobs_started += 1;
                    self.stats.jobs_retried += 1;
                }
                Err(failure) => self.handle_start_failure(&slice, failure)?,
            }
        }
        Ok(())
    }

    /// Start a job, either in a fresh slot or in the slot of `previous`.
    fn start_job(
        &self,
        slice: &R::Slice,
        previous: Option<&JobId>,
    ) -> Result<AsyncJob<R::Slice>, StartFailure> {
        let reservation = match previous {
            Some(previous) => SlotReservation::reuse(&*self.tracker, previous),
            None => SlotReservation::reserve(&*self.tracker).map_err(StartFailure::Tracker)?,
        };

        let job = self
            .repository
            .start(slice)
            .map_err(StartFailure::Repository)?;

        if let Err(err) = reservation.bind(job.id()) {
            self.abort_job(&job);
            return Err(StartFailure::Tracker(err));
        }
        Ok(job)
    }

    /// Breaking failures abort the run; anything else is kept for the end.
    fn handle_start_failure(
        &mut self,
        slice: &R::Slice,
        failure: StartFailure,
    ) -> Result<(), OrchestratorError> {
        let message = match failure {
            StartFailure::Repository(err) if self.config.is_breaking(err.category()) => {
                error!(
                    orchestrator = %self.config.name,
                    slice = ?slice,
                    error = %self.redactor.display(&err),
                    "breaking error while starting job"
                );
                return Err(OrchestratorError::Breaking(err));
            }
            StartFailure::Repository(err) => err.to_string(),
            StartFailure::Tracker(err) => err.to_string(),
        };

        let message = self
            .redactor
            .redact(&format!("failed to start job for slice {slice:?}: {message}"));
        error!(orchestrator = %self.config.name, error = %message, "failed to start the job");
        self.non_breaking_errors.push(message);
        self.stats.non_breaking_errors += 1;
        Ok(())
    }

    fn update_jobs_status(&mut self) -> Result<(), OrchestratorError> {
        let mut running: Vec<&mut AsyncJob<R::Slice>> = self
            .retrying
            .iter_mut()
            .chain(self.running.iter_mut())
            .flat_map(|partition| partition.jobs_mut())
            .filter(|job| job.status() == JobStatus::Running)
            .collect();

        if running.is_empty() {
            return Ok(());
        }

        self.repository.update_jobs_status(&mut running)?;
        self.stats.status_polls += 1;
        Ok(())
    }

    /// Triage every tracked partition, retrying ones first.
    fn process_partitions(&mut self) {
        let mut partitions = std::mem::take(&mut self.retrying)
            .into_iter()
            .chain(std::mem::take(&mut self.running));

        while let Some(mut partition) = partitions.next() {
            self.release_completed_jobs(&mut partition);

            match partition.status() {
                JobStatus::Completed => {
                    info!(
                        orchestrator = %self.config.name,
                        slice = ?partition.stream_slice(),
                        job_ids = ?partition.job_ids(),
                        slowest_job_ms = partition
                            .jobs()
                            .map(|job| job.elapsed().num_milliseconds())
                            .max()
                            .unwrap_or_default(),
                        "jobs for slice have been completed"
                    );
                    self.stats.partitions_completed += 1;
                    self.ready.push_back(Ok(partition));
                }
                JobStatus::Running => self.running.push(partition),
                JobStatus::Failed | JobStatus::TimedOut if partition.has_reached_max_attempt() => {
                    self.stop_partition(&mut partition);
                    let err = OrchestratorError::PartitionFailed {
                        slice: format!("{:?}", partition.stream_slice()),
                        statuses: partition.status_by_job(),
                    };
                    error!(orchestrator = %self.config.name, error = %err, "partition failed");

                    self.running.extend(partitions);
                    self.abort_all_running_jobs();
                    self.ready.push_back(Err(err));
                    self.finished = true;
                    return;
                }
                JobStatus::Failed | JobStatus::TimedOut => {
                    // Slots stay bound: the retry pass restarts these jobs in place.
                    self.stop_timed_out_jobs(&partition);
                    self.retrying.push(partition);
                }
            }
        }
    }

    /// Hand back the slot of every completed job, once.
    fn release_completed_jobs(&self, partition: &mut AsyncPartition<R::Slice>) {
        let completed: Vec<JobId> = partition
            .jobs()
            .filter(|job| job.status() == JobStatus::Completed)
            .map(|job| job.id().clone())
            .collect();
        for job_id in completed {
            if partition.take_slot(&job_id) {
                self.tracker.release(&SlotKey::from(&job_id));
            }
        }
    }

    /// Abort what is still in flight and free every slot of the partition.
    fn stop_partition(&self, partition: &mut AsyncPartition<R::Slice>) {
        for job in partition.jobs() {
            if matches!(job.status(), JobStatus::Running | JobStatus::TimedOut) {
                self.abort_job(job);
            }
        }
        for job_id in partition.job_ids() {
            if partition.take_slot(&job_id) {
                self.tracker.release(&SlotKey::from(&job_id));
            }
        }
    }

    fn stop_timed_out_jobs(&self, partition: &AsyncPartition<R::Slice>) {
        for job in partition.jobs() {
            if job.status() == JobStatus::TimedOut {
                self.abort_job(job);
            }
        }
    }

    /// Best effort: failures are logged, never raised.
    fn abort_job(&self, job: &AsyncJob<R::Slice>) -> bool {
        match self.repository.abort(job) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    orchestrator = %self.config.name,
                    job_id = %job.id(),
                    error = %self.redactor.display(&err),
                    "could not abort job"
                );
                false
            }
        }
    }

    /// Abort every running or timed out job and stop tracking all partitions.
    /// Slots are left as they are: the run is over.
    fn abort_all_running_jobs(&mut self) {
        let partitions: Vec<AsyncPartition<R::Slice>> = self
            .retrying
            .drain(..)
            .chain(self.running.drain(..))
            .collect();
        for job in partitions.iter().flat_map(|partition| partition.jobs()) {
            if matches!(job.status(), JobStatus::Running | JobStatus::TimedOut) {
                self.abort_job(job);
            }
        }
    }

    fn wait_on_status_update(&self) {
        debug!(
            orchestrator = %self.config.name,
            partitions = self.tracked_partitions(),
            interval = ?self.config.poll_interval,
            "waiting before next status poll"
        );
        if !self.config.poll_interval.is_zero() {
            std::thread::sleep(self.config.poll_interval);
        }
    }
}

impl<R, T, I> Iterator for JobOrchestrator<R, T, I>
where
    R: JobRepository + ?Sized,
    T: JobTracker + ?Sized,
    I: Iterator<Item = R::Slice>,
{
    type Item = Result<AsyncPartition<R::Slice>, OrchestratorError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(item);
            }
            if self.finished {
                return None;
            }
            if let Err(err) = self.step() {
                self.finished = true;
                return Some(Err(err));
            }
        }
    }
}

impl<R, T, I> FusedIterator for JobOrchestrator<R, T, I>
where
    R: JobRepository + ?Sized,
    T: JobTracker + ?Sized,
    I: Iterator<Item = R::Slice>,
{
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::repository::InMemoryJobRepository;
    use crate::tracker::InMemoryJobTracker;

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::default().with_poll_interval(Duration::ZERO)
    }

    #[test]
    fn known_statuses_match_the_status_enum() {
        assert!(check_known_statuses(&KNOWN_JOB_STATUSES).is_ok());
    }

    #[test]
    fn missing_status_is_a_configuration_error() {
        let err =
            check_known_statuses(&[JobStatus::Running, JobStatus::Completed]).unwrap_err();
        assert!(matches!(err, OrchestratorError::Configuration(_)));
    }

    #[test]
    fn empty_input_finishes_without_polling() {
        let repository = Arc::new(InMemoryJobRepository::<&str>::new());
        let tracker = Arc::new(InMemoryJobTracker::new(1));
        let mut orchestrator =
            JobOrchestrator::new(repository.clone(), Vec::new(), tracker, config()).unwrap();

        assert!(orchestrator.next().is_none());
        assert_eq!(repository.status_calls(), 0);
        assert_eq!(orchestrator.stats().jobs_started, 0);
    }

    #[test]
    fn running_jobs_are_refreshed_in_one_call() {
        let repository = Arc::new(InMemoryJobRepository::new());
        repository.script_attempt("a", [JobStatus::Running, JobStatus::Completed]);
        repository.script_attempt("b", [JobStatus::Running, JobStatus::Completed]);
        let tracker = Arc::new(InMemoryJobTracker::new(5));

        let orchestrator =
            JobOrchestrator::new(repository.clone(), vec!["a", "b"], tracker.clone(), config())
                .unwrap();
        let completed: Vec<_> = orchestrator.map(|p| p.unwrap()).collect();

        assert_eq!(completed.len(), 2);
        assert_eq!(repository.status_calls(), 2);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn timed_out_job_is_aborted_and_restarted_in_its_slot() {
        let repository = Arc::new(InMemoryJobRepository::new());
        repository.script_attempt("a", [JobStatus::TimedOut]);
        repository.script_attempt("a", [JobStatus::Completed]);
        let tracker = Arc::new(InMemoryJobTracker::new(1));

        let mut orchestrator =
            JobOrchestrator::new(repository.clone(), vec!["a"], tracker.clone(), config())
                .unwrap();
        let partition = orchestrator.next().unwrap().unwrap();

        assert_eq!(partition.status(), JobStatus::Completed);
        assert_eq!(partition.attempts(&JobId::from("job-2")), Some(2));
        assert_eq!(repository.aborted_jobs(), vec![JobId::from("job-1")]);
        assert_eq!(orchestrator.stats().jobs_retried, 1);
        assert!(orchestrator.next().is_none());
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn failing_abort_is_swallowed() {
        let repository = Arc::new(InMemoryJobRepository::new());
        repository.script_attempt("a", [JobStatus::TimedOut]);
        repository.script_attempt("a", [JobStatus::Completed]);
        repository.fail_aborts(RepositoryError::Transport("connection reset".into()));
        let tracker = Arc::new(InMemoryJobTracker::new(1));

        let results: Vec<_> =
            JobOrchestrator::new(repository, vec!["a"], tracker.clone(), config())
                .unwrap()
                .collect();

        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn refresh_failure_ends_the_run() {
        struct BrokenPolling(InMemoryJobRepository<&'static str>);

        impl JobRepository for BrokenPolling {
            type Slice = &'static str;
            type Record = serde_json::Value;

            fn start(&self, slice: &Self::Slice) -> Result<AsyncJob<Self::Slice>, RepositoryError> {
                self.0.start(slice)
            }

            fn update_jobs_status(
                &self,
                _jobs: &mut [&mut AsyncJob<Self::Slice>],
            ) -> Result<(), RepositoryError> {
                Err(RepositoryError::Transport("poll timed out".into()))
            }

            fn fetch_records<'a>(
                &'a self,
                job: &'a AsyncJob<Self::Slice>,
            ) -> Result<crate::repository::RecordStream<'a, Self::Record>, RepositoryError>
            {
                self.0.fetch_records(job)
            }

            fn delete(&self, job: &AsyncJob<Self::Slice>) -> Result<(), RepositoryError> {
                self.0.delete(job)
            }

            fn abort(&self, job: &AsyncJob<Self::Slice>) -> Result<(), RepositoryError> {
                self.0.abort(job)
            }
        }

        let repository = Arc::new(BrokenPolling(InMemoryJobRepository::new()));
        let tracker = Arc::new(InMemoryJobTracker::new(1));
        let mut orchestrator =
            JobOrchestrator::new(repository.clone(), vec!["a"], tracker, config()).unwrap();

        let err = orchestrator.next().unwrap().unwrap_err();
        assert!(matches!(err, OrchestratorError::Repository(RepositoryError::Transport(_))));
        assert_eq!(repository.0.aborted_jobs(), vec![JobId::from("job-1")]);
        assert!(orchestrator.next().is_none());
    }
}
