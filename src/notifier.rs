use crate::error::{JobError, PoolError};
use crate::task::JobId;

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, info_span, trace, Instrument};

// --- Public Event Structs for Handlers ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCompletionStatus {
  Success,
  TaskFailed,
  Panicked,
  /// Removed from the queue by `cancel`.
  Cancelled,
  ContextCreationFailed,
  /// Rejected from the queue because the pool shut down.
  Rejected,
  PoolErrorOccurred,
}

impl<R, E> From<&Result<R, JobError<E>>> for JobCompletionStatus {
  fn from(result: &Result<R, JobError<E>>) -> Self {
    match result {
      Ok(_) => JobCompletionStatus::Success,
      Err(JobError::Task(_)) => JobCompletionStatus::TaskFailed,
      Err(JobError::Pool(PoolError::TaskPanicked)) => JobCompletionStatus::Panicked,
      Err(JobError::Pool(PoolError::Cancelled)) => JobCompletionStatus::Cancelled,
      Err(JobError::Pool(PoolError::ContextCreation(_))) => JobCompletionStatus::ContextCreationFailed,
      Err(JobError::Pool(PoolError::PoolClosed)) => JobCompletionStatus::Rejected,
      Err(JobError::Pool(_)) => JobCompletionStatus::PoolErrorOccurred,
    }
  }
}

#[derive(Debug, Clone)]
pub struct JobCompletionInfo {
  pub job_id: JobId,
  pub pool_name: Arc<String>,
  pub status: JobCompletionStatus,
  pub completion_time: SystemTime,
}

type CompletionHandler = Arc<dyn Fn(JobCompletionInfo) + Send + Sync + 'static>;

/// Fans job completion events out to registered handlers.
///
/// The worker task is started when the first handler is added. Until then
/// events are not produced at all. The worker stops once the notifier (the
/// only sender) is dropped together with its pool.
pub(crate) struct CompletionNotifier {
  pool_name: Arc<String>,
  tokio_handle: TokioHandle,
  handlers: Arc<RwLock<Vec<CompletionHandler>>>,
  enabled: AtomicBool,
  event_tx: UnboundedSender<JobCompletionInfo>,
  event_rx_for_init: Mutex<Option<UnboundedReceiver<JobCompletionInfo>>>,
}

impl fmt::Debug for CompletionNotifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CompletionNotifier")
      .field("pool_name", &self.pool_name)
      .field("handler_count", &self.handlers.read().len())
      .field("enabled", &self.enabled.load(Ordering::Acquire))
      .finish()
  }
}

impl CompletionNotifier {
  pub(crate) fn new(pool_name: Arc<String>, tokio_handle: TokioHandle) -> Self {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    Self {
      pool_name,
      tokio_handle,
      handlers: Arc::new(RwLock::new(Vec::new())),
      enabled: AtomicBool::new(false),
      event_tx,
      event_rx_for_init: Mutex::new(Some(event_rx)),
    }
  }

  pub(crate) fn add_handler(&self, handler: impl Fn(JobCompletionInfo) + Send + Sync + 'static) {
    self.ensure_worker_started();

    let mut handlers_guard = self.handlers.write();
    handlers_guard.push(Arc::new(handler));
    info!(pool_name = %*self.pool_name, "Notifier: Added new completion handler. Total handlers: {}", handlers_guard.len());
  }

  /// Queues an event for the handlers. No-op until a handler has been added.
  pub(crate) fn notify(&self, job_id: JobId, status: JobCompletionStatus) {
    if !self.enabled.load(Ordering::Acquire) {
      return;
    }
    let event = JobCompletionInfo {
      job_id,
      pool_name: self.pool_name.clone(),
      status,
      completion_time: SystemTime::now(),
    };
    if self.event_tx.send(event).is_err() {
      trace!(pool_name = %*self.pool_name, %job_id, "Notification worker gone, dropping completion event.");
    }
  }

  /// Starts the worker on first use. `enabled` is flipped while the receiver
  /// slot is still locked, so a concurrent caller that finds the slot empty
  /// always observes events as enabled.
  fn ensure_worker_started(&self) {
    let mut rx_slot = self.event_rx_for_init.lock();
    let rx_to_use = match rx_slot.take() {
      Some(rx) => rx,
      None => return,
    };
    info!(pool_name = %*self.pool_name, "First completion handler added. Starting notification worker.");

    self.enabled.store(true, Ordering::Release);
    self.tokio_handle.spawn(
      Self::run_notification_worker_loop(rx_to_use, self.handlers.clone(), self.tokio_handle.clone())
        .instrument(info_span!("notification_worker_loop", pool_name = %*self.pool_name)),
    );
  }

  async fn run_notification_worker_loop(
    mut event_rx: UnboundedReceiver<JobCompletionInfo>,
    handlers: Arc<RwLock<Vec<CompletionHandler>>>,
    tokio_handle_for_spawning_handlers: TokioHandle,
  ) {
    info!("Notification worker started.");

    while let Some(event) = event_rx.recv().await {
      // Clone the list so no lock is held while handlers are being spawned.
      let handlers_snapshot: Vec<CompletionHandler> = handlers.read().clone();
      debug!(
        job_id = %event.job_id,
        status = ?event.status,
        "Dispatching notification to {} handlers.",
        handlers_snapshot.len()
      );

      for handler in handlers_snapshot {
        let event_for_handler = event.clone();
        tokio_handle_for_spawning_handlers.spawn(async move {
          let job_id = event_for_handler.job_id;
          let pool_name = event_for_handler.pool_name.clone();
          let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            handler(event_for_handler);
          }));
          if result.is_err() {
            error!(
              "A completion handler panicked during execution. Pool: {}, Job ID: {}",
              pool_name, job_id
            );
          }
        });
      }
    }

    info!("Notification worker stopped (all senders dropped).");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_follows_outcome() {
    let ok: Result<u8, JobError<String>> = Ok(1);
    assert_eq!(JobCompletionStatus::from(&ok), JobCompletionStatus::Success);

    let task_err: Result<u8, JobError<String>> = Err(JobError::Task("boom".to_string()));
    assert_eq!(JobCompletionStatus::from(&task_err), JobCompletionStatus::TaskFailed);

    let cases = [
      (PoolError::TaskPanicked, JobCompletionStatus::Panicked),
      (PoolError::Cancelled, JobCompletionStatus::Cancelled),
      (PoolError::ContextCreation("oom".to_string()), JobCompletionStatus::ContextCreationFailed),
      (PoolError::PoolClosed, JobCompletionStatus::Rejected),
      (PoolError::ResultChannelError("gone".to_string()), JobCompletionStatus::PoolErrorOccurred),
    ];
    for (pool_error, expected) in cases {
      let res: Result<u8, JobError<String>> = Err(JobError::Pool(pool_error));
      assert_eq!(JobCompletionStatus::from(&res), expected);
    }
  }

  #[tokio::test]
  async fn events_are_dropped_until_a_handler_exists() {
    let notifier = CompletionNotifier::new(Arc::new("quiet".to_string()), TokioHandle::current());
    notifier.notify(1, JobCompletionStatus::Success);
    assert!(!notifier.enabled.load(Ordering::Acquire));
    assert!(notifier.event_rx_for_init.lock().is_some());
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn every_registered_handler_sees_events_enabled() {
    let notifier = Arc::new(CompletionNotifier::new(Arc::new("racing".to_string()), TokioHandle::current()));
    let barrier = Arc::new(std::sync::Barrier::new(4));

    let registrations: Vec<_> = (0..4)
      .map(|_| {
        let notifier = notifier.clone();
        let barrier = barrier.clone();
        std::thread::spawn(move || {
          barrier.wait();
          notifier.add_handler(|_info: JobCompletionInfo| {});
          notifier.enabled.load(Ordering::Acquire)
        })
      })
      .collect();

    for registration in registrations {
      assert!(registration.join().unwrap());
    }
    assert!(notifier.event_rx_for_init.lock().is_none());
    assert_eq!(notifier.handlers.read().len(), 4);
  }
}
