use thiserror::Error;

/// Error type returned by a [`ContextProvider`](crate::ContextProvider) when it
/// fails to create or tear down an execution context.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the pool itself, independent of what a job computes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
  #[error("Invalid pool configuration: {0}")]
  InvalidConfig(String),

  #[error("Failed to create an execution context: {0}")]
  ContextCreation(String),

  #[error("Pool is shutting down or already shut down")]
  PoolClosed,

  #[error("Pool queue is full (capacity {capacity})")]
  QueueFull { capacity: usize },

  #[error("Job was cancelled before it was admitted")]
  Cancelled,

  #[error("Submitted job panicked")]
  TaskPanicked,

  #[error("Job result channel error (pool dropped the job without resolving it): {0}")]
  ResultChannelError(String),
}

/// The outcome error of a single job: either the pool failed the job, or the
/// job's own task returned an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError<E> {
  #[error(transparent)]
  Pool(#[from] PoolError),

  #[error("Job task failed: {0}")]
  Task(E),
}

impl<E> JobError<E> {
  /// Returns the pool-level error, if this is not a task failure.
  pub fn as_pool_error(&self) -> Option<&PoolError> {
    match self {
      JobError::Pool(e) => Some(e),
      JobError::Task(_) => None,
    }
  }

  /// Returns the task's own error, if the task is what failed.
  pub fn into_task_error(self) -> Option<E> {
    match self {
      JobError::Task(e) => Some(e),
      JobError::Pool(_) => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn queue_full_message_names_capacity() {
    let err = PoolError::QueueFull { capacity: 3 };
    assert_eq!(err.to_string(), "Pool queue is full (capacity 3)");
  }

  #[test]
  fn pool_errors_display_transparently_through_job_error() {
    let err: JobError<String> = PoolError::PoolClosed.into();
    assert_eq!(err.to_string(), PoolError::PoolClosed.to_string());
    assert_eq!(err.as_pool_error(), Some(&PoolError::PoolClosed));
    assert_eq!(err.into_task_error(), None);
  }

  #[test]
  fn task_error_is_kept_verbatim() {
    let err: JobError<String> = JobError::Task("shader compile failed".to_string());
    assert_eq!(err.to_string(), "Job task failed: shader compile failed");
    assert_eq!(err.as_pool_error(), None);
    assert_eq!(err.into_task_error(), Some("shader compile failed".to_string()));
  }
}
