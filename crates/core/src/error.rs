//! Error model for the job/partition layer.

use thiserror::Error;

use crate::id::JobId;

/// Result type used across the core layer.
pub type PartitionResult<T> = Result<T, PartitionError>;

/// Contract violations raised by [`crate::AsyncPartition`].
///
/// These are programming errors on the caller's side (replacing a job that is
/// not tracked, or retrying past the attempt bound), not runtime conditions of
/// the remote system.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// The job to replace is not part of the partition.
    #[error("could not find job {0} to replace")]
    JobNotFound(JobId),

    /// The job has already been attempted the maximum number of times.
    #[error("max attempt reached for job {job_id} in partition {slice}")]
    MaxAttemptsReached { job_id: JobId, slice: String },

    /// A partition must contain at least one job.
    #[error("a partition needs at least one job (slice {0})")]
    Empty(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid job identifier: {0:?}")]
    InvalidJobId(String),
}

impl PartitionError {
    pub fn max_attempts(job_id: JobId, slice: impl core::fmt::Debug) -> Self {
        Self::MaxAttemptsReached {
            job_id,
            slice: format!("{slice:?}"),
        }
    }
}
