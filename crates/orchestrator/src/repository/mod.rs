//! Transport boundary to the remote job API.

use serde::{Deserialize, Serialize};

use asyncjob_core::{AsyncJob, JobId};

pub mod in_memory;

pub use in_memory::InMemoryJobRepository;

/// Lazily produced records of one job.
pub type RecordStream<'a, T> = Box<dyn Iterator<Item = Result<T, RepositoryError>> + 'a>;

/// Coarse classification of repository failures.
///
/// Callers pick the categories that abort a whole run (see
/// [`crate::OrchestratorConfig::break_on`]); everything else is accumulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Config,
    Authentication,
    RateLimited,
    Transport,
    Remote,
    Internal,
}

/// Repository error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("remote API error: {0}")]
    Remote(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RepositoryError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RepositoryError::Config(_) => ErrorCategory::Config,
            RepositoryError::Authentication(_) => ErrorCategory::Authentication,
            RepositoryError::RateLimited(_) => ErrorCategory::RateLimited,
            RepositoryError::Transport(_) => ErrorCategory::Transport,
            RepositoryError::NotFound(_) | RepositoryError::Remote(_) => ErrorCategory::Remote,
            RepositoryError::Internal(_) => ErrorCategory::Internal,
        }
    }
}

/// Remote job API abstraction.
///
/// Implementations own the wire protocol: how a slice becomes a job request,
/// how statuses are polled and how results are downloaded.
pub trait JobRepository: Send + Sync {
    /// Opaque description of one unit of work.
    type Slice: Clone + std::fmt::Debug;
    /// One record produced by a completed job.
    type Record;

    /// Submit a job for `slice`.
    fn start(&self, slice: &Self::Slice) -> Result<AsyncJob<Self::Slice>, RepositoryError>;

    /// Refresh the status of every given job in one call.
    fn update_jobs_status(
        &self,
        jobs: &mut [&mut AsyncJob<Self::Slice>],
    ) -> Result<(), RepositoryError>;

    /// Stream the records produced by a completed job.
    fn fetch_records<'a>(
        &'a self,
        job: &'a AsyncJob<Self::Slice>,
    ) -> Result<RecordStream<'a, Self::Record>, RepositoryError>;

    /// Remove the job's remote artifacts once its records are consumed.
    fn delete(&self, job: &AsyncJob<Self::Slice>) -> Result<(), RepositoryError>;

    /// Cancel a running or timed out job.
    fn abort(&self, job: &AsyncJob<Self::Slice>) -> Result<(), RepositoryError>;
}
