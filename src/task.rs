use crate::error::JobError;

use futures_util::future::BoxFuture;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Unique identifier of a submitted job.
pub type JobId = u64;

/// The work a job performs: it borrows the execution context for the whole
/// run and receives a token that is cancelled when the job is cancelled.
pub type JobTask<C, R, E> =
  Box<dyn for<'a> FnOnce(&'a mut C, CancellationToken) -> BoxFuture<'a, Result<R, E>> + Send + 'static>;

/// Lifecycle position of a job. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobState {
  Queued,
  Admitted,
  Settled,
}

pub(crate) type ResultSender<R, E> = oneshot::Sender<Result<R, JobError<E>>>;

/// A job waiting in the admission queue.
pub(crate) struct QueuedJob<C, R, E> {
  pub(crate) job_id: JobId,
  pub(crate) task: JobTask<C, R, E>,
  pub(crate) token: CancellationToken,
  pub(crate) result_sender: ResultSender<R, E>,
}

/// Bookkeeping for an admitted job. The context itself lives with the job's
/// driver, which hands it back to the pool on settle.
#[derive(Debug)]
pub(crate) struct ActiveJob {
  pub(crate) token: CancellationToken,
}
