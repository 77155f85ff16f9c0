//! Remote job status model.

use serde::{Deserialize, Serialize};

/// Status of one remote asynchronous job.
///
/// This set is closed. Code that dispatches on every status must be revisited
/// whenever a variant is added or removed; the orchestrator checks its own
/// known-status list against [`JobStatus::ALL`] when it is built.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted and still being processed remotely
    Running,
    /// Finished; records can be fetched
    Completed,
    /// Finished with an error on the remote side
    Failed,
    /// Did not finish before its deadline
    TimedOut,
}

impl JobStatus {
    /// Every status, in declaration order.
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::TimedOut,
    ];

    /// Statuses for which the job is replaced by a new attempt.
    pub fn is_retriable(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::TimedOut)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::TimedOut => "TIMED_OUT",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn all_lists_each_variant_once() {
        let unique: HashSet<_> = JobStatus::ALL.iter().collect();
        assert_eq!(unique.len(), JobStatus::ALL.len());
    }

    #[test]
    fn only_failed_and_timed_out_are_retriable() {
        let retriable: Vec<_> = JobStatus::ALL
            .into_iter()
            .filter(JobStatus::is_retriable)
            .collect();
        assert_eq!(retriable, vec![JobStatus::Failed, JobStatus::TimedOut]);
    }

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&JobStatus::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
        assert_eq!(JobStatus::TimedOut.to_string(), "TIMED_OUT");
    }
}
