//! Grouping of the job attempts made for one slice of work.

use crate::error::{PartitionError, PartitionResult};
use crate::id::JobId;
use crate::job::AsyncJob;
use crate::status::JobStatus;

/// Upper bound on attempts for a single job within a partition.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
struct JobAttempt<S> {
    job: AsyncJob<S>,
    attempt: u32,
    slot_held: bool,
}

/// The jobs currently standing for one slice, with their attempt counts.
///
/// Each job is keyed by its [`JobId`]. A job that fails or times out is
/// replaced, never mutated into a new attempt: the replacement inherits the
/// previous attempt count plus one.
///
/// Every job also carries a flag telling whether it still occupies a tracker
/// slot. A job enters the partition holding its slot (a replacement takes over
/// the slot of the job it replaces) and [`AsyncPartition::take_slot`] hands it
/// back exactly once.
#[derive(Debug, Clone)]
pub struct AsyncPartition<S> {
    attempts: Vec<JobAttempt<S>>,
    stream_slice: S,
}

impl<S> AsyncPartition<S> {
    /// A partition whose jobs are all on their first attempt.
    pub fn new(jobs: Vec<AsyncJob<S>>, stream_slice: S) -> PartitionResult<Self>
    where
        S: core::fmt::Debug,
    {
        if jobs.is_empty() {
            return Err(PartitionError::Empty(format!("{stream_slice:?}")));
        }
        let mut partition = Self {
            attempts: Vec::with_capacity(jobs.len()),
            stream_slice,
        };
        for job in jobs {
            partition.insert(job, 1);
        }
        Ok(partition)
    }

    /// A partition made of a single freshly started job.
    pub fn from_job(job: AsyncJob<S>, stream_slice: S) -> Self {
        Self {
            attempts: vec![JobAttempt {
                job,
                attempt: 1,
                slot_held: true,
            }],
            stream_slice,
        }
    }

    pub fn stream_slice(&self) -> &S {
        &self.stream_slice
    }

    pub fn jobs(&self) -> impl Iterator<Item = &AsyncJob<S>> {
        self.attempts.iter().map(|a| &a.job)
    }

    pub fn jobs_mut(&mut self) -> impl Iterator<Item = &mut AsyncJob<S>> {
        self.attempts.iter_mut().map(|a| &mut a.job)
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.jobs().map(|job| job.id().clone()).collect()
    }

    /// Attempt number of the given job, if it belongs to this partition.
    pub fn attempts(&self, job_id: &JobId) -> Option<u32> {
        self.find(job_id).map(|a| a.attempt)
    }

    /// True once any job has been attempted [`MAX_ATTEMPTS`] times.
    pub fn has_reached_max_attempt(&self) -> bool {
        self.attempts.iter().any(|a| a.attempt >= MAX_ATTEMPTS)
    }

    /// Replace `job_id` by `new_jobs`, each one attempt further along.
    ///
    /// Fails if the job is unknown or already at [`MAX_ATTEMPTS`]; callers are
    /// expected to check [`AsyncPartition::has_reached_max_attempt`] first.
    pub fn replace_job(&mut self, job_id: &JobId, new_jobs: Vec<AsyncJob<S>>) -> PartitionResult<()>
    where
        S: core::fmt::Debug,
    {
        let index = self
            .attempts
            .iter()
            .position(|a| a.job.id() == job_id)
            .ok_or_else(|| PartitionError::JobNotFound(job_id.clone()))?;

        let current = self.attempts[index].attempt;
        if current >= MAX_ATTEMPTS {
            return Err(PartitionError::max_attempts(job_id.clone(), &self.stream_slice));
        }

        self.attempts.remove(index);
        for job in new_jobs {
            self.insert(job, current + 1);
        }
        Ok(())
    }

    /// Aggregate status: all completed, else failed, else timed out, else running.
    pub fn status(&self) -> JobStatus {
        let mut any_failed = false;
        let mut any_timed_out = false;
        let mut all_completed = true;

        for job in self.jobs() {
            match job.status() {
                JobStatus::Completed => {}
                JobStatus::Failed => {
                    any_failed = true;
                    all_completed = false;
                }
                JobStatus::TimedOut => {
                    any_timed_out = true;
                    all_completed = false;
                }
                JobStatus::Running => all_completed = false,
            }
        }

        if all_completed {
            JobStatus::Completed
        } else if any_failed {
            JobStatus::Failed
        } else if any_timed_out {
            JobStatus::TimedOut
        } else {
            JobStatus::Running
        }
    }

    /// Status of each job, for error reporting.
    pub fn status_by_job(&self) -> Vec<(JobId, JobStatus)> {
        self.jobs()
            .map(|job| (job.id().clone(), job.status()))
            .collect()
    }

    pub fn holds_slot(&self, job_id: &JobId) -> bool {
        self.find(job_id).is_some_and(|a| a.slot_held)
    }

    /// Mark the job's slot as given back. Returns `true` only the first time,
    /// so the caller releases each slot at most once.
    pub fn take_slot(&mut self, job_id: &JobId) -> bool {
        match self.attempts.iter_mut().find(|a| a.job.id() == job_id) {
            Some(attempt) if attempt.slot_held => {
                attempt.slot_held = false;
                true
            }
            _ => false,
        }
    }

    fn find(&self, job_id: &JobId) -> Option<&JobAttempt<S>> {
        self.attempts.iter().find(|a| a.job.id() == job_id)
    }

    fn insert(&mut self, job: AsyncJob<S>, attempt: u32) {
        self.attempts.retain(|a| a.job.id() != job.id());
        self.attempts.push(JobAttempt {
            job,
            attempt,
            slot_held: true,
        });
    }
}

impl<S: core::fmt::Debug> core::fmt::Display for AsyncPartition<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "AsyncPartition(stream_slice={:?}, attempt_per_job={{", self.stream_slice)?;
        for (i, a) in self.attempts.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", a.job.id(), a.attempt)?;
        }
        f.write_str("})")
    }
}
