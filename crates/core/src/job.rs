//! A single attempt at executing a slice on the remote system.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::id::JobId;
use crate::status::JobStatus;

/// How long a job may stay `Running` before it is reported as timed out.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Deadline for a running job. Only ticks while the job is `Running`.
#[derive(Debug, Clone)]
struct JobTimer {
    timeout: Duration,
    started_at: Option<Instant>,
}

impl JobTimer {
    fn started(timeout: Duration) -> Self {
        Self {
            timeout,
            started_at: Some(Instant::now()),
        }
    }

    fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    fn stop(&mut self) {
        self.started_at = None;
    }

    fn has_timed_out(&self) -> bool {
        self.started_at
            .map(|started| started.elapsed() >= self.timeout)
            .unwrap_or(false)
    }
}

/// One remote asynchronous job.
///
/// The job owns the slice parameters that produced it so a failed attempt can
/// be restarted with the same input. Its status is only changed through
/// [`AsyncJob::update_status`], which repositories call while refreshing.
#[derive(Debug, Clone)]
pub struct AsyncJob<S> {
    id: JobId,
    parameters: S,
    status: JobStatus,
    timer: JobTimer,
    created_at: DateTime<Utc>,
}

impl<S> AsyncJob<S> {
    /// A freshly started job, `Running` with the default timeout.
    pub fn new(id: impl Into<JobId>, parameters: S) -> Self {
        Self::with_timeout(id, parameters, DEFAULT_JOB_TIMEOUT)
    }

    pub fn with_timeout(id: impl Into<JobId>, parameters: S, timeout: Duration) -> Self {
        Self {
            id: id.into(),
            parameters,
            status: JobStatus::Running,
            timer: JobTimer::started(timeout),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn parameters(&self) -> &S {
        &self.parameters
    }

    /// Wall-clock time since the job was started remotely.
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    /// Current status; a `Running` job past its deadline reads as `TimedOut`.
    pub fn status(&self) -> JobStatus {
        if self.timer.has_timed_out() {
            return JobStatus::TimedOut;
        }
        self.status
    }

    /// Record the status last observed on the remote system.
    pub fn update_status(&mut self, status: JobStatus) {
        if status == JobStatus::Running {
            if self.status != JobStatus::Running {
                self.timer.start();
            }
        } else {
            self.timer.stop();
        }
        self.status = status;
    }
}
