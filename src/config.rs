use crate::error::PoolError;

const DEFAULT_POOL_NAME: &str = "context_pool";

/// Construction-time options of a [`ContextPool`](crate::ContextPool).
///
/// Immutable once the pool has been built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
  /// Name used in logs and completion events.
  pub name: String,
  /// Hard ceiling on simultaneously existing execution contexts.
  pub max_concurrency: usize,
  /// Maximum number of jobs waiting for a slot. `None` means unbounded.
  /// When the limit is reached, `submit` fails fast with `QueueFull`.
  pub queue_capacity: Option<usize>,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      name: DEFAULT_POOL_NAME.to_string(),
      max_concurrency: 1,
      queue_capacity: None,
    }
  }
}

impl PoolConfig {
  pub fn new(name: &str, max_concurrency: usize) -> Self {
    Self {
      name: name.to_string(),
      max_concurrency,
      queue_capacity: None,
    }
  }

  /// Bounds the admission queue.
  pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
    self.queue_capacity = Some(capacity);
    self
  }

  pub fn validate(&self) -> Result<(), PoolError> {
    if self.max_concurrency == 0 {
      return Err(PoolError::InvalidConfig(
        "max_concurrency must be greater than 0".to_string(),
      ));
    }
    if self.queue_capacity == Some(0) {
      return Err(PoolError::InvalidConfig(
        "queue_capacity must be greater than 0 when set".to_string(),
      ));
    }
    Ok(())
  }
}
