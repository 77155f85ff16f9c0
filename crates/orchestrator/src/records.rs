//! Record extraction for completed partitions.

use std::iter::FusedIterator;

use tracing::debug;

use asyncjob_core::{AsyncJob, AsyncPartition};

use crate::repository::{JobRepository, RecordStream, RepositoryError};

/// Stream the records of every job of `partition`, deleting each job's remote
/// artifacts once its records are drained.
///
/// Jobs are read one after the other. Only call this on partitions yielded as
/// completed by the orchestrator.
pub fn fetch_records<'a, R>(
    repository: &'a R,
    partition: &'a AsyncPartition<R::Slice>,
) -> PartitionRecords<'a, R>
where
    R: JobRepository + ?Sized,
{
    PartitionRecords {
        repository,
        jobs: partition.jobs().collect::<Vec<_>>().into_iter(),
        current: None,
        done: false,
    }
}

/// Lazy record sequence of one partition. Fuses after the first error.
pub struct PartitionRecords<'a, R>
where
    R: JobRepository + ?Sized,
{
    repository: &'a R,
    jobs: std::vec::IntoIter<&'a AsyncJob<R::Slice>>,
    current: Option<(&'a AsyncJob<R::Slice>, RecordStream<'a, R::Record>)>,
    done: bool,
}

impl<'a, R> PartitionRecords<'a, R>
where
    R: JobRepository + ?Sized,
{
    fn fail(&mut self, err: RepositoryError) -> Option<Result<R::Record, RepositoryError>> {
        self.done = true;
        self.current = None;
        Some(Err(err))
    }
}

impl<'a, R> Iterator for PartitionRecords<'a, R>
where
    R: JobRepository + ?Sized,
{
    type Item = Result<R::Record, RepositoryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if let Some((job, stream)) = self.current.as_mut() {
                let job: &'a AsyncJob<R::Slice> = *job;
                match stream.next() {
                    Some(Ok(record)) => return Some(Ok(record)),
                    Some(Err(err)) => return self.fail(err),
                    None => {
                        self.current = None;
                        if let Err(err) = self.repository.delete(job) {
                            return self.fail(err);
                        }
                        debug!(job_id = %job.id(), "job records consumed and deleted");
                        continue;
                    }
                }
            }

            let Some(job) = self.jobs.next() else {
                self.done = true;
                return None;
            };
            match self.repository.fetch_records(job) {
                Ok(stream) => self.current = Some((job, stream)),
                Err(err) => return self.fail(err),
            }
        }
    }
}

impl<'a, R> FusedIterator for PartitionRecords<'a, R> where R: JobRepository + ?Sized {}
