//! Orchestrator error model.

use thiserror::Error;

use asyncjob_core::{JobId, JobStatus, PartitionError};

use crate::repository::RepositoryError;
use crate::tracker::TrackerError;

/// Terminal failure of an orchestration run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Invalid setup, detected before any job is started.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Starting a job failed with a category configured to abort the run.
    #[error("breaking error while starting jobs: {0}")]
    Breaking(#[source] RepositoryError),

    /// A partition exhausted its attempts.
    #[error(
        "at least one job could not be completed for slice {slice}; job statuses were: {}",
        render_statuses(.statuses)
    )]
    PartitionFailed {
        slice: String,
        statuses: Vec<(JobId, JobStatus)>,
    },

    /// Some jobs could not be started; the rest of the run went through.
    #[error("run incomplete, {count} error(s) while starting jobs:\n{details}")]
    Incomplete { count: usize, details: String },

    /// Refreshing job statuses failed.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Partition(#[from] PartitionError),
}

impl OrchestratorError {
    /// The repository error behind a breaking or refresh failure.
    pub fn repository_error(&self) -> Option<&RepositoryError> {
        match self {
            OrchestratorError::Breaking(e) | OrchestratorError::Repository(e) => Some(e),
            _ => None,
        }
    }
}

fn render_statuses(statuses: &[(JobId, JobStatus)]) -> String {
    let entries: Vec<String> = statuses
        .iter()
        .map(|(id, status)| format!("{id}: {status}"))
        .collect();
    format!("{{{}}}", entries.join(", "))
}
