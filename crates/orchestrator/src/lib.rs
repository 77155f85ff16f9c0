//! `asyncjob-orchestrator`
//!
//! Drives remote asynchronous jobs through submission, polling, retry and
//! completion under a global concurrency limit.
//!
//! ## Components
//!
//! - `JobTracker`: bounds the number of in-flight jobs (slots)
//! - `JobRepository`: transport to the remote job API
//! - `JobOrchestrator`: the polling loop, yielding completed partitions
//! - `fetch_records`: reads and cleans up the output of a completed partition

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod records;
pub mod repository;
pub mod slices;
pub mod tracker;

pub use config::OrchestratorConfig;
pub use error::OrchestratorError;
pub use orchestrator::{JobOrchestrator, OrchestratorStats};
pub use records::{PartitionRecords, fetch_records};
pub use repository::{
    ErrorCategory, InMemoryJobRepository, JobRepository, RecordStream, RepositoryError,
};
pub use slices::SliceQueue;
pub use tracker::{InMemoryJobTracker, JobTracker, SlotKey, SlotReservation, TrackerError};
