use crate::config::PoolConfig;
use crate::context::ContextProvider;
use crate::error::{JobError, PoolError};
use crate::handle::JobHandle;
use crate::notifier::{CompletionNotifier, JobCompletionInfo, JobCompletionStatus};
use crate::stats::PoolStats;
use crate::task::{ActiveJob, JobId, JobState, JobTask, QueuedJob, ResultSender};

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_POOL_JOB_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Defines how the pool treats outstanding work when it shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Waits until every active and queued job has settled.
  /// Queued jobs keep being admitted while draining.
  Drain,
  /// Fails every queued job with `PoolError::PoolClosed` right away.
  /// Active jobs run to completion but are not waited for.
  RejectQueued,
}

/// Result of a [`ContextPool::cancel`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
  /// The job was still queued; it was removed and failed with `Cancelled`.
  Dequeued,
  /// The job was running; its cancellation token was triggered.
  Signalled,
  /// The job had already settled (or never belonged to this pool).
  AlreadySettled,
}

struct PoolState<C, R, E> {
  closed: bool,
  active: HashMap<JobId, ActiveJob>,
  queue: VecDeque<QueuedJob<C, R, E>>,
  stats: PoolStats,
}

/// A job that left the pool without ever running, to be resolved once the
/// state lock is released.
struct Rejection<R, E> {
  job_id: JobId,
  result_sender: ResultSender<R, E>,
  error: PoolError,
}

struct PoolInner<P: ContextProvider, R, E> {
  pool_name: Arc<String>,
  config: PoolConfig,
  provider: P,
  state: Mutex<PoolState<P::Context, R, E>>,
  tokio_handle: TokioHandle,
  /// Accepted jobs whose handles have not been resolved yet.
  outstanding: watch::Sender<usize>,
  notifier: CompletionNotifier,
}

/// Multiplexes jobs over at most `max_concurrency` execution contexts.
///
/// Jobs are admitted in submission order. Each admitted job gets a fresh
/// context from the pool's [`ContextProvider`]; the context is destroyed
/// exactly once when the job settles, before the freed slot is handed to the
/// next queued job.
pub struct ContextPool<P: ContextProvider, R, E> {
  inner: Arc<PoolInner<P, R, E>>,
}

impl<P, R, E> ContextPool<P, R, E>
where
  P: ContextProvider,
  R: Send + 'static,
  E: Send + 'static,
{
  pub fn new(config: PoolConfig, provider: P, tokio_handle: TokioHandle) -> Result<Arc<Self>, PoolError> {
    config.validate()?;

    let pool_name = Arc::new(config.name.clone());
    let (outstanding, _) = watch::channel(0usize);
    let notifier = CompletionNotifier::new(pool_name.clone(), tokio_handle.clone());

    info!(
      pool_name = %*pool_name,
      max_concurrency = config.max_concurrency,
      queue_capacity = ?config.queue_capacity,
      "Context pool created."
    );

    Ok(Arc::new(Self {
      inner: Arc::new(PoolInner {
        pool_name,
        config,
        provider,
        state: Mutex::new(PoolState {
          closed: false,
          active: HashMap::new(),
          queue: VecDeque::new(),
          stats: PoolStats::default(),
        }),
        tokio_handle,
        outstanding,
        notifier,
      }),
    }))
  }

  pub fn name(&self) -> &str {
    &self.inner.pool_name
  }

  pub fn max_concurrency(&self) -> usize {
    self.inner.config.max_concurrency
  }

  pub fn active_count(&self) -> usize {
    self.inner.state.lock().active.len()
  }

  /// Returns the current number of jobs waiting for a slot.
  pub fn queued_count(&self) -> usize {
    self.inner.state.lock().queue.len()
  }

  pub fn is_closed(&self) -> bool {
    self.inner.state.lock().closed
  }

  pub fn stats(&self) -> PoolStats {
    self.inner.state.lock().stats.clone()
  }

  /// Reports where a job is in its lifecycle. Ids that are neither queued nor
  /// active are reported as `Settled`.
  pub fn job_state(&self, job_id: JobId) -> JobState {
    let state = self.inner.state.lock();
    if state.active.contains_key(&job_id) {
      JobState::Admitted
    } else if state.queue.iter().any(|job| job.job_id == job_id) {
      JobState::Queued
    } else {
      JobState::Settled
    }
  }

  /// Registers a callback invoked (on its own Tokio task) for every job
  /// resolution that happens after registration.
  pub fn add_completion_handler(&self, handler: impl Fn(JobCompletionInfo) + Send + Sync + 'static) {
    self.inner.notifier.add_handler(handler);
  }

  /// Submits a job. Never waits: the job is either admitted right away,
  /// appended to the queue, or refused.
  ///
  /// The task borrows the job's context for its whole run. It also receives
  /// a token that is cancelled when cancellation is requested for the job.
  ///
  /// # Errors
  /// - `PoolError::PoolClosed` after shutdown has begun.
  /// - `PoolError::QueueFull` if the job would have to wait and the bounded
  ///   queue is at capacity.
  pub fn submit<F>(&self, task: F) -> Result<JobHandle<R, E>, PoolError>
  where
    F: for<'a> FnOnce(&'a mut P::Context, CancellationToken) -> BoxFuture<'a, Result<R, E>> + Send + 'static,
  {
    let inner = &self.inner;
    let job_id = NEXT_POOL_JOB_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let token = CancellationToken::new();
    let (result_tx, result_rx) = oneshot::channel::<Result<R, JobError<E>>>();

    let refill = {
      let mut state = inner.state.lock();
      if state.closed {
        warn!(pool_name = %*inner.pool_name, "Submit: Attempted to submit job to a pool that is shutting down or closed.");
        return Err(PoolError::PoolClosed);
      }

      let must_wait = !state.queue.is_empty() || state.active.len() >= inner.config.max_concurrency;
      if let Some(capacity) = inner.config.queue_capacity {
        if must_wait && state.queue.len() >= capacity {
          debug!(pool_name = %*inner.pool_name, %job_id, capacity, "Submit: Queue full, refusing job.");
          return Err(PoolError::QueueFull { capacity });
        }
      }

      state.stats.submitted += 1;
      inner.outstanding.send_modify(|n| *n += 1);

      let boxed_task: JobTask<P::Context, R, E> = Box::new(task);
      state.queue.push_back(QueuedJob {
        job_id,
        task: boxed_task,
        token: token.clone(),
        result_sender: result_tx,
      });
      trace!(pool_name = %*inner.pool_name, %job_id, queued = state.queue.len(), "Submit: Job appended to queue.");

      inner.fill_free_slots(&mut state)
    };

    inner.start_refill(refill);

    Ok(JobHandle {
      job_id,
      cancellation_token: token,
      result_receiver: result_rx,
    })
  }

  /// Cancels a job.
  ///
  /// A queued job is removed and fails with `PoolError::Cancelled` without a
  /// context ever being created for it. A running job only has its token
  /// cancelled; its context is torn down when the task returns.
  pub fn cancel(&self, handle: &JobHandle<R, E>) -> Result<CancelOutcome, PoolError> {
    self.cancel_job(handle.id())
  }

  /// Same as [`ContextPool::cancel`], addressed by job id.
  pub fn cancel_job(&self, job_id: JobId) -> Result<CancelOutcome, PoolError> {
    let inner = &self.inner;
    let dequeued = {
      let mut state = inner.state.lock();
      if state.closed {
        return Err(PoolError::PoolClosed);
      }

      if let Some(active_job) = state.active.get(&job_id) {
        debug!(pool_name = %*inner.pool_name, %job_id, "Cancel: Signalling cancellation to running job.");
        active_job.token.cancel();
        return Ok(CancelOutcome::Signalled);
      }

      match state.queue.iter().position(|job| job.job_id == job_id) {
        Some(index) => {
          state.stats.cancelled += 1;
          state.queue.remove(index)
        }
        None => None,
      }
    };

    match dequeued {
      Some(job) => {
        debug!(pool_name = %*inner.pool_name, %job_id, "Cancel: Removed queued job before admission.");
        job.token.cancel();
        inner.resolve_rejections(vec![Rejection {
          job_id,
          result_sender: job.result_sender,
          error: PoolError::Cancelled,
        }]);
        Ok(CancelOutcome::Dequeued)
      }
      None => {
        trace!(pool_name = %*inner.pool_name, %job_id, "Cancel: Job already settled or unknown.");
        Ok(CancelOutcome::AlreadySettled)
      }
    }
  }

  /// Stops accepting new jobs.
  ///
  /// With [`ShutdownMode::Drain`] this resolves once every accepted job has
  /// settled. With [`ShutdownMode::RejectQueued`] queued jobs fail with
  /// `PoolError::PoolClosed` immediately and running jobs finish on their own.
  /// Calling it again is allowed.
  pub async fn shutdown(&self, mode: ShutdownMode) -> Result<(), PoolError> {
    let inner = &self.inner;
    let rejections = {
      let mut state = inner.state.lock();
      if state.closed {
        info!(pool_name = %*inner.pool_name, "Shutdown already in progress or completed (mode: {:?}).", mode);
      } else {
        info!(pool_name = %*inner.pool_name, "Initiating explicit pool shutdown (mode: {:?}).", mode);
        state.closed = true;
      }
      match mode {
        ShutdownMode::Drain => Vec::new(),
        ShutdownMode::RejectQueued => inner.take_queue_for_rejection(&mut state),
      }
    };
    inner.resolve_rejections(rejections);

    if mode == ShutdownMode::Drain {
      info!(pool_name = %*inner.pool_name, "Drain: Waiting for outstanding jobs to settle.");
      let mut outstanding_rx = inner.outstanding.subscribe();
      // The sender lives in `inner`, which we hold, so this cannot observe a closed channel.
      let _ = outstanding_rx.wait_for(|outstanding| *outstanding == 0).await;
      info!(pool_name = %*inner.pool_name, "Drain: All jobs settled.");
    }

    info!(pool_name = %*inner.pool_name, "Pool shutdown ({:?}) completed.", mode);
    Ok(())
  }
}

/// Jobs that left the queue during one refill: the ones admitted with a fresh
/// context, and the ones resolved without ever running.
struct Refill<P, R, E>
where
  P: ContextProvider,
  R: Send + 'static,
  E: Send + 'static,
{
  admitted: Vec<PendingDriver<P, R, E>>,
  rejections: Vec<Rejection<R, E>>,
}

/// An admitted job whose driver has not been spawned yet.
struct PendingDriver<P, R, E>
where
  P: ContextProvider,
  R: Send + 'static,
  E: Send + 'static,
{
  job: AdmittedJob<P, R, E>,
  task: JobTask<P::Context, R, E>,
  token: CancellationToken,
}

/// Owns an admitted job's context and result sender until the job settles.
///
/// If the driver future is dropped before its task returns (its runtime shut
/// down, or the spawn was refused), dropping this still destroys the context,
/// frees the slot and resolves the handle.
struct AdmittedJob<P, R, E>
where
  P: ContextProvider,
  R: Send + 'static,
  E: Send + 'static,
{
  inner: Arc<PoolInner<P, R, E>>,
  job_id: JobId,
  context: Option<P::Context>,
  result_sender: Option<ResultSender<R, E>>,
}

impl<P, R, E> AdmittedJob<P, R, E>
where
  P: ContextProvider,
  R: Send + 'static,
  E: Send + 'static,
{
  fn finish(mut self, outcome: Result<R, JobError<E>>) {
    self.settle_once(outcome);
  }

  fn settle_once(&mut self, outcome: Result<R, JobError<E>>) {
    if let (Some(context), Some(result_sender)) = (self.context.take(), self.result_sender.take()) {
      self.inner.settle(self.job_id, context, outcome, result_sender);
    }
  }
}

impl<P, R, E> Drop for AdmittedJob<P, R, E>
where
  P: ContextProvider,
  R: Send + 'static,
  E: Send + 'static,
{
  fn drop(&mut self) {
    if self.context.is_none() {
      return;
    }
    warn!(
      pool_name = %*self.inner.pool_name,
      job_id = %self.job_id,
      "Job driver dropped before its task returned. Tearing down its context."
    );
    let job_id = self.job_id;
    self.settle_once(Err(JobError::Pool(PoolError::ResultChannelError(format!(
      "driver of job {} was dropped before the task returned",
      job_id
    )))));
  }
}

impl<P, R, E> PoolInner<P, R, E>
where
  P: ContextProvider,
  R: Send + 'static,
  E: Send + 'static,
{
  /// Admits queued jobs from the head while slots are free. Must be called
  /// with the state lock held; the returned [`Refill`] is started with
  /// [`PoolInner::start_refill`] once the lock is released. Jobs that were
  /// cancelled through their handle while queued, or whose context could not
  /// be created, are rejected and do not occupy a slot.
  fn fill_free_slots(self: &Arc<Self>, state: &mut PoolState<P::Context, R, E>) -> Refill<P, R, E> {
    let mut refill = Refill {
      admitted: Vec::new(),
      rejections: Vec::new(),
    };

    while state.active.len() < self.config.max_concurrency {
      let Some(job) = state.queue.pop_front() else {
        break;
      };

      if job.token.is_cancelled() {
        debug!(pool_name = %*self.pool_name, job_id = %job.job_id, "Skipping queued job cancelled through its handle.");
        state.stats.cancelled += 1;
        refill.rejections.push(Rejection {
          job_id: job.job_id,
          result_sender: job.result_sender,
          error: PoolError::Cancelled,
        });
        continue;
      }

      let created = std::panic::catch_unwind(AssertUnwindSafe(|| self.provider.create()));
      let context = match created {
        Ok(Ok(context)) => context,
        Ok(Err(create_error)) => {
          error!(pool_name = %*self.pool_name, job_id = %job.job_id, "Context creation failed: {}", create_error);
          state.stats.context_creation_failures += 1;
          refill.rejections.push(Rejection {
            job_id: job.job_id,
            result_sender: job.result_sender,
            error: PoolError::ContextCreation(create_error.to_string()),
          });
          continue;
        }
        Err(_panic_payload) => {
          error!(pool_name = %*self.pool_name, job_id = %job.job_id, "Context factory panicked.");
          state.stats.context_creation_failures += 1;
          refill.rejections.push(Rejection {
            job_id: job.job_id,
            result_sender: job.result_sender,
            error: PoolError::ContextCreation("context factory panicked".to_string()),
          });
          continue;
        }
      };

      state.active.insert(job.job_id, ActiveJob { token: job.token.clone() });
      let active_now = state.active.len();
      state.stats.record_admission(active_now);
      debug!(
        pool_name = %*self.pool_name,
        job_id = %job.job_id,
        active = active_now,
        queued = state.queue.len(),
        "Admitted job with a fresh context."
      );

      let QueuedJob {
        job_id,
        task,
        token,
        result_sender,
      } = job;
      refill.admitted.push(PendingDriver {
        job: AdmittedJob {
          inner: self.clone(),
          job_id,
          context: Some(context),
          result_sender: Some(result_sender),
        },
        task,
        token,
      });
    }

    refill
  }

  /// Spawns the drivers of newly admitted jobs and fails the rejected ones.
  /// Called without the state lock held.
  fn start_refill(&self, refill: Refill<P, R, E>) {
    for pending in refill.admitted {
      let job_id = pending.job.job_id;
      self.tokio_handle.spawn(
        Self::drive_job(pending.job, pending.task, pending.token)
          .instrument(info_span!("pool_job", pool_name = %*self.pool_name, %job_id)),
      );
    }
    self.resolve_rejections(refill.rejections);
  }

  /// Runs an admitted job's task outside the lock, then settles it.
  async fn drive_job(mut admitted: AdmittedJob<P, R, E>, task: JobTask<P::Context, R, E>, token: CancellationToken) {
    let job_id = admitted.job_id;
    let pool_name = admitted.inner.pool_name.clone();

    let execution = match admitted.context.as_mut() {
      Some(context_ref) => {
        AssertUnwindSafe(async move { task(context_ref, token).await })
          .catch_unwind()
          .await
      }
      None => return,
    };

    let outcome: Result<R, JobError<E>> = match execution {
      Ok(Ok(value)) => {
        trace!(pool_name = %*pool_name, %job_id, "Job task succeeded.");
        Ok(value)
      }
      Ok(Err(task_error)) => {
        debug!(pool_name = %*pool_name, %job_id, "Job task returned an error.");
        Err(JobError::Task(task_error))
      }
      Err(_panic_payload) => {
        error!(pool_name = %*pool_name, %job_id, "Job task panicked during execution.");
        Err(JobError::Pool(PoolError::TaskPanicked))
      }
    };

    admitted.finish(outcome);
  }

  /// Destroys the context, frees the slot, refills it from the queue, and
  /// only then resolves the job's handle.
  fn settle(
    self: &Arc<Self>,
    job_id: JobId,
    context: P::Context,
    outcome: Result<R, JobError<E>>,
    result_sender: ResultSender<R, E>,
  ) {
    let status = JobCompletionStatus::from(&outcome);

    let refill = {
      let mut state = self.state.lock();

      let teardown = std::panic::catch_unwind(AssertUnwindSafe(|| self.provider.destroy(context)));
      state.stats.contexts_destroyed += 1;
      match teardown {
        Ok(Ok(())) => trace!(pool_name = %*self.pool_name, %job_id, "Context destroyed."),
        Ok(Err(destroy_error)) => {
          state.stats.teardown_failures += 1;
          error!(pool_name = %*self.pool_name, %job_id, "Context teardown failed: {}. Slot is released anyway.", destroy_error);
        }
        Err(_panic_payload) => {
          state.stats.teardown_failures += 1;
          error!(pool_name = %*self.pool_name, %job_id, "Context teardown panicked. Slot is released anyway.");
        }
      }

      state.active.remove(&job_id);
      match status {
        JobCompletionStatus::Success => state.stats.succeeded += 1,
        JobCompletionStatus::Panicked => state.stats.panicked += 1,
        _ => state.stats.failed += 1,
      }
      debug!(
        pool_name = %*self.pool_name,
        %job_id,
        active = state.active.len(),
        queued = state.queue.len(),
        "Job settled, slot released."
      );

      self.fill_free_slots(&mut state)
    };

    self.start_refill(refill);

    if result_sender.send(outcome).is_err() {
      warn!(pool_name = %*self.pool_name, %job_id, "Result receiver for job was dropped. Job outcome may have been lost.");
    }
    self.notifier.notify(job_id, status);
    self.outstanding.send_modify(|n| *n -= 1);
  }
}

impl<P: ContextProvider, R, E> PoolInner<P, R, E> {
  fn take_queue_for_rejection(&self, state: &mut PoolState<P::Context, R, E>) -> Vec<Rejection<R, E>> {
    if !state.queue.is_empty() {
      info!(pool_name = %*self.pool_name, "Rejecting {} queued jobs.", state.queue.len());
    }
    state.stats.rejected += state.queue.len() as u64;
    state
      .queue
      .drain(..)
      .map(|job| {
        job.token.cancel();
        Rejection {
          job_id: job.job_id,
          result_sender: job.result_sender,
          error: PoolError::PoolClosed,
        }
      })
      .collect()
  }

  /// Fails jobs that never ran. Called without the state lock held.
  fn resolve_rejections(&self, rejections: Vec<Rejection<R, E>>) {
    for rejection in rejections {
      let outcome: Result<R, JobError<E>> = Err(JobError::Pool(rejection.error));
      let status = JobCompletionStatus::from(&outcome);
      if rejection.result_sender.send(outcome).is_err() {
        trace!(pool_name = %*self.pool_name, job_id = %rejection.job_id, "Rejected job's receiver already dropped.");
      }
      self.notifier.notify(rejection.job_id, status);
      self.outstanding.send_modify(|n| *n -= 1);
    }
  }
}

impl<P: ContextProvider, R, E> Drop for ContextPool<P, R, E> {
  fn drop(&mut self) {
    let inner = &self.inner;
    let rejections = {
      let mut state = inner.state.lock();
      if state.closed {
        trace!(pool_name = %*inner.pool_name, "Drop: Shutdown already in progress or completed.");
        return;
      }
      warn!(
        pool_name = %*inner.pool_name,
        "ContextPool dropped without explicit shutdown. Rejecting queued jobs; active jobs will finish on their own."
      );
      state.closed = true;
      inner.take_queue_for_rejection(&mut state)
    };
    inner.resolve_rejections(rejections);
  }
}
