/// Counters describing everything a pool has done since construction.
///
/// Obtained as a snapshot through [`ContextPool::stats`](crate::ContextPool::stats).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
  /// Jobs accepted by `submit`.
  pub submitted: u64,
  /// Jobs that received a context and started running.
  pub admitted: u64,
  pub succeeded: u64,
  /// Jobs whose task returned an error.
  pub failed: u64,
  pub panicked: u64,
  /// Queued jobs removed by `cancel`.
  pub cancelled: u64,
  /// Queued jobs rejected by shutdown.
  pub rejected: u64,
  pub context_creation_failures: u64,
  pub contexts_created: u64,
  pub contexts_destroyed: u64,
  /// Teardown calls that returned an error or panicked. The slot is freed anyway.
  pub teardown_failures: u64,
  /// Highest number of simultaneously admitted jobs observed.
  pub peak_active: usize,
}

impl PoolStats {
  /// Jobs accepted but not yet resolved in any way.
  pub fn outstanding(&self) -> u64 {
    self.submitted
      - self.succeeded
      - self.failed
      - self.panicked
      - self.cancelled
      - self.rejected
      - self.context_creation_failures
  }

  pub(crate) fn record_admission(&mut self, active_now: usize) {
    self.admitted += 1;
    self.contexts_created += 1;
    self.peak_active = self.peak_active.max(active_now);
  }
}
