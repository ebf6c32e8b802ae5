use crate::error::{JobError, PoolError};
use crate::task::JobId;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Caller-side completion handle of a job submitted to a
/// [`ContextPool`](crate::ContextPool).
///
/// The job's outcome is observed exactly once through [`JobHandle::await_result`].
#[derive(Debug)]
pub struct JobHandle<R, E> {
  pub(crate) job_id: JobId,
  pub(crate) cancellation_token: CancellationToken,
  pub(crate) result_receiver: oneshot::Receiver<Result<R, JobError<E>>>,
}

impl<R, E> JobHandle<R, E> {
  /// Returns the unique ID of this job.
  pub fn id(&self) -> JobId {
    self.job_id
  }

  /// Checks if cancellation has been signalled to this job's token.
  pub fn is_cancellation_requested(&self) -> bool {
    self.cancellation_token.is_cancelled()
  }

  /// Signals cooperative cancellation to the job's task.
  ///
  /// A job that is still queued keeps its place until it reaches the head,
  /// where it fails with `PoolError::Cancelled` without a context being
  /// created. [`ContextPool::cancel`](crate::ContextPool::cancel) removes it
  /// from the queue right away.
  pub fn cancel(&self) {
    tracing::debug!(job_id = %self.job_id, "JobHandle: Cancellation requested.");
    self.cancellation_token.cancel();
  }

  /// Awaits the job's settlement.
  ///
  /// # Errors
  /// - `JobError::Task(e)` if the task returned `Err(e)`.
  /// - `JobError::Pool(PoolError::ContextCreation(_))` if no context could be created.
  /// - `JobError::Pool(PoolError::Cancelled)` if the job was removed from the queue.
  /// - `JobError::Pool(PoolError::PoolClosed)` if shutdown rejected the queued job.
  /// - `JobError::Pool(PoolError::TaskPanicked)` if the task panicked.
  pub async fn await_result(self) -> Result<R, JobError<E>> {
    match self.result_receiver.await {
      Ok(outcome) => outcome,
      Err(recv_error) => {
        tracing::warn!(job_id = %self.job_id, "Result channel receive error: {}", recv_error);
        Err(JobError::Pool(PoolError::ResultChannelError(format!(
          "Job (id: {}) result channel unexpectedly closed: {}",
          self.job_id, recv_error
        ))))
      }
    }
  }
}
