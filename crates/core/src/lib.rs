//! `asyncjob-core`: model of remote asynchronous jobs.
//!
//! This crate contains the pure data model (no IO): job identifiers, the
//! closed [`JobStatus`] set, single job attempts and the [`AsyncPartition`]
//! that groups the attempts made for one slice of work.

pub mod error;
pub mod id;
pub mod job;
pub mod partition;
pub mod status;

pub use error::{PartitionError, PartitionResult};
pub use id::JobId;
pub use job::{AsyncJob, DEFAULT_JOB_TIMEOUT};
pub use partition::{AsyncPartition, MAX_ATTEMPTS};
pub use status::JobStatus;
