//! Scripted in-memory repository for tests/dev.
//!
//! Every start for a slice consumes the next scripted attempt for that slice.
//! An attempt either fails to start or yields a job whose successive status
//! polls follow the scripted sequence (the last status sticks). Slices without
//! a script complete on their first poll.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value as JsonValue;

use asyncjob_core::{AsyncJob, DEFAULT_JOB_TIMEOUT, JobId, JobStatus};

use super::{JobRepository, RecordStream, RepositoryError};

#[derive(Debug, Clone)]
enum AttemptScript {
    Polls(VecDeque<JobStatus>),
    StartFails(RepositoryError),
}

#[derive(Debug)]
struct LiveJob<S> {
    slice: S,
    polls: VecDeque<JobStatus>,
}

#[derive(Debug)]
struct State<S> {
    scripts: HashMap<S, VecDeque<AttemptScript>>,
    records: HashMap<S, Vec<JsonValue>>,
    live: HashMap<JobId, LiveJob<S>>,
    abort_failure: Option<RepositoryError>,
    started: Vec<(JobId, S)>,
    aborted: Vec<JobId>,
    deleted: Vec<JobId>,
    status_calls: usize,
    next_id: u64,
}

/// In-memory job repository.
#[derive(Debug)]
pub struct InMemoryJobRepository<S> {
    state: Mutex<State<S>>,
    job_timeout: Duration,
}

impl<S> InMemoryJobRepository<S>
where
    S: Clone + Eq + Hash + std::fmt::Debug + Send,
{
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                scripts: HashMap::new(),
                records: HashMap::new(),
                live: HashMap::new(),
                abort_failure: None,
                started: Vec::new(),
                aborted: Vec::new(),
                deleted: Vec::new(),
                status_calls: 0,
                next_id: 1,
            }),
            job_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }

    /// Timeout given to every job this repository starts.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Queue an attempt for `slice` whose polls return `statuses` in order.
    pub fn script_attempt(&self, slice: S, statuses: impl IntoIterator<Item = JobStatus>) {
        self.state()
            .scripts
            .entry(slice)
            .or_default()
            .push_back(AttemptScript::Polls(statuses.into_iter().collect()));
    }

    /// Queue an attempt for `slice` whose start fails with `error`.
    pub fn fail_start(&self, slice: S, error: RepositoryError) {
        self.state()
            .scripts
            .entry(slice)
            .or_default()
            .push_back(AttemptScript::StartFails(error));
    }

    pub fn set_records(&self, slice: S, records: Vec<JsonValue>) {
        self.state().records.insert(slice, records);
    }

    /// Make every subsequent abort fail with `error`.
    pub fn fail_aborts(&self, error: RepositoryError) {
        self.state().abort_failure = Some(error);
    }

    pub fn started_jobs(&self) -> Vec<(JobId, S)> {
        self.state().started.clone()
    }

    pub fn started_count(&self, slice: &S) -> usize {
        self.state().started.iter().filter(|(_, s)| s == slice).count()
    }

    pub fn aborted_jobs(&self) -> Vec<JobId> {
        self.state().aborted.clone()
    }

    pub fn deleted_jobs(&self) -> Vec<JobId> {
        self.state().deleted.clone()
    }

    /// Number of batched status refresh calls received.
    pub fn status_calls(&self) -> usize {
        self.state().status_calls
    }

    fn state(&self) -> MutexGuard<'_, State<S>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<S> Default for InMemoryJobRepository<S>
where
    S: Clone + Eq + Hash + std::fmt::Debug + Send,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> JobRepository for InMemoryJobRepository<S>
where
    S: Clone + Eq + Hash + std::fmt::Debug + Send,
{
    type Slice = S;
    type Record = JsonValue;

    fn start(&self, slice: &S) -> Result<AsyncJob<S>, RepositoryError> {
        let mut state = self.state();
        let script = state
            .scripts
            .get_mut(slice)
            .and_then(|attempts| attempts.pop_front());

        let polls = match script {
            Some(AttemptScript::StartFails(error)) => return Err(error),
            Some(AttemptScript::Polls(polls)) => polls,
            None => VecDeque::new(),
        };

        let id = JobId::new(format!("job-{}", state.next_id));
        state.next_id += 1;
        state.live.insert(
            id.clone(),
            LiveJob {
                slice: slice.clone(),
                polls,
            },
        );
        state.started.push((id.clone(), slice.clone()));

        Ok(AsyncJob::with_timeout(id, slice.clone(), self.job_timeout))
    }

    fn update_jobs_status(&self, jobs: &mut [&mut AsyncJob<S>]) -> Result<(), RepositoryError> {
        let mut state = self.state();
        state.status_calls += 1;

        for job in jobs.iter_mut() {
            let live = state
                .live
                .get_mut(job.id())
                .ok_or_else(|| RepositoryError::NotFound(job.id().clone()))?;
            let status = if live.polls.len() > 1 {
                live.polls.pop_front()
            } else {
                live.polls.front().copied()
            }
            .unwrap_or(JobStatus::Completed);
            job.update_status(status);
        }
        Ok(())
    }

    fn fetch_records<'a>(
        &'a self,
        job: &'a AsyncJob<S>,
    ) -> Result<RecordStream<'a, JsonValue>, RepositoryError> {
        let state = self.state();
        let live = state
            .live
            .get(job.id())
            .ok_or_else(|| RepositoryError::NotFound(job.id().clone()))?;
        let records = state.records.get(&live.slice).cloned().unwrap_or_default();
        Ok(Box::new(records.into_iter().map(Ok)))
    }

    fn delete(&self, job: &AsyncJob<S>) -> Result<(), RepositoryError> {
        let mut state = self.state();
        if state.live.remove(job.id()).is_none() {
            return Err(RepositoryError::NotFound(job.id().clone()));
        }
        state.deleted.push(job.id().clone());
        Ok(())
    }

    fn abort(&self, job: &AsyncJob<S>) -> Result<(), RepositoryError> {
        let mut state = self.state();
        if let Some(error) = state.abort_failure.clone() {
            return Err(error);
        }
        state.aborted.push(job.id().clone());
        Ok(())
    }
}
