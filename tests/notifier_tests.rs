use context_pool::{
  context_fns, BoxError, ContextPool, FnContextProvider, JobCompletionInfo, JobCompletionStatus, JobError,
  PoolConfig, PoolError, ShutdownMode,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle as TokioHandle;
use tokio::time::sleep;

type CounterContext = u32;
type CreateFn = fn() -> Result<CounterContext, BoxError>;
type DestroyFn = fn(CounterContext) -> Result<(), BoxError>;
type NotifierTestPool = ContextPool<FnContextProvider<CounterContext, CreateFn, DestroyFn>, String, String>;

fn create_counter() -> Result<CounterContext, BoxError> {
  Ok(0)
}

fn destroy_counter(_context: CounterContext) -> Result<(), BoxError> {
  Ok(())
}

fn new_pool(pool_name: &str, max_concurrency: usize) -> Arc<NotifierTestPool> {
  let provider = context_fns(create_counter as CreateFn, destroy_counter as DestroyFn);
  ContextPool::new(PoolConfig::new(pool_name, max_concurrency), provider, TokioHandle::current()).unwrap()
}

// Helper to initialize tracing for tests
fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,context_pool=trace"));
    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

// Helper for collecting notifications in tests
fn create_collecting_handler() -> (
  Arc<Mutex<Vec<JobCompletionInfo>>>,
  impl Fn(JobCompletionInfo) + Send + Sync + 'static,
) {
  let collected_notifications = Arc::new(Mutex::new(Vec::new()));
  let collected_notifications_clone = collected_notifications.clone();
  let handler = move |info: JobCompletionInfo| {
    tracing::debug!(
      "Test Collecting Handler: Received notification for job_id: {}, status: {:?}",
      info.job_id,
      info.status
    );
    collected_notifications_clone.lock().unwrap().push(info);
  };
  (collected_notifications, handler)
}

#[tokio::test]
async fn test_completion_notifier_success() {
  setup_tracing_for_test();
  let pool_name = "test_notifier_success";
  let pool = new_pool(pool_name, 1);
  let (notifications, handler) = create_collecting_handler();
  pool.add_completion_handler(handler);

  let handle = pool
    .submit(|ctx, _token| {
      Box::pin(async move {
        *ctx += 1;
        Ok::<_, String>(format!("rendered with {}", ctx))
      })
    })
    .unwrap();
  let job_id = handle.id();

  assert_eq!(handle.await_result().await, Ok("rendered with 1".to_string()));
  // Short sleep to allow the notifier worker to dispatch.
  sleep(Duration::from_millis(20)).await;
  pool.shutdown(ShutdownMode::Drain).await.unwrap();

  let notifs = notifications.lock().unwrap();
  assert_eq!(notifs.len(), 1);
  let info = &notifs[0];
  assert_eq!(info.job_id, job_id);
  assert_eq!(*info.pool_name, pool_name);
  assert_eq!(info.status, JobCompletionStatus::Success);
  assert!(info.completion_time <= std::time::SystemTime::now());
}

#[tokio::test]
async fn test_completion_notifier_task_failure_and_panic() {
  setup_tracing_for_test();
  let pool = new_pool("test_notifier_failures", 2);
  let (notifications, handler) = create_collecting_handler();
  pool.add_completion_handler(handler);

  let failing = pool
    .submit(|_ctx, _token| Box::pin(async move { Err::<String, _>("no data".to_string()) }))
    .unwrap();
  let panicking = pool
    .submit(|_ctx, _token| {
      Box::pin(async move {
        let should_panic = true;
        if should_panic {
          panic!("notifier test panic");
        }
        Ok::<String, String>(String::new())
      })
    })
    .unwrap();
  let failing_id = failing.id();
  let panicking_id = panicking.id();

  assert_eq!(failing.await_result().await, Err(JobError::Task("no data".to_string())));
  assert_eq!(panicking.await_result().await, Err(JobError::Pool(PoolError::TaskPanicked)));
  sleep(Duration::from_millis(20)).await;

  let notifs = notifications.lock().unwrap();
  assert_eq!(notifs.len(), 2);
  let status_of = |id| notifs.iter().find(|info| info.job_id == id).map(|info| info.status);
  assert_eq!(status_of(failing_id), Some(JobCompletionStatus::TaskFailed));
  assert_eq!(status_of(panicking_id), Some(JobCompletionStatus::Panicked));
}

#[tokio::test]
async fn test_completion_notifier_reports_jobs_that_never_ran() {
  setup_tracing_for_test();
  let pool = new_pool("test_notifier_never_ran", 1);
  let (notifications, handler) = create_collecting_handler();
  pool.add_completion_handler(handler);

  let blocker = pool
    .submit(|_ctx, _token| {
      Box::pin(async move {
        sleep(Duration::from_millis(50)).await;
        Ok::<_, String>("blocker".to_string())
      })
    })
    .unwrap();
  let cancelled = pool
    .submit(|_ctx, _token| Box::pin(async move { Ok::<_, String>("cancelled".to_string()) }))
    .unwrap();
  let rejected = pool
    .submit(|_ctx, _token| Box::pin(async move { Ok::<_, String>("rejected".to_string()) }))
    .unwrap();
  let cancelled_id = cancelled.id();
  let rejected_id = rejected.id();

  pool.cancel(&cancelled).unwrap();
  pool.shutdown(ShutdownMode::RejectQueued).await.unwrap();

  assert_eq!(cancelled.await_result().await, Err(JobError::Pool(PoolError::Cancelled)));
  assert_eq!(rejected.await_result().await, Err(JobError::Pool(PoolError::PoolClosed)));
  assert_eq!(blocker.await_result().await, Ok("blocker".to_string()));
  sleep(Duration::from_millis(20)).await;

  let notifs = notifications.lock().unwrap();
  assert_eq!(notifs.len(), 3);
  let status_of = |id| notifs.iter().find(|info| info.job_id == id).map(|info| info.status);
  assert_eq!(status_of(cancelled_id), Some(JobCompletionStatus::Cancelled));
  assert_eq!(status_of(rejected_id), Some(JobCompletionStatus::Rejected));
}

#[tokio::test]
async fn test_panicking_handler_does_not_block_other_handlers() {
  setup_tracing_for_test();
  let pool = new_pool("test_notifier_handler_panic", 1);
  pool.add_completion_handler(|_info: JobCompletionInfo| panic!("handler intentionally panicked"));
  let (notifications, handler) = create_collecting_handler();
  pool.add_completion_handler(handler);

  for round in 0..3 {
    let handle = pool
      .submit(move |_ctx, _token| Box::pin(async move { Ok::<_, String>(format!("round {}", round)) }))
      .unwrap();
    handle.await_result().await.unwrap();
  }
  sleep(Duration::from_millis(20)).await;

  assert_eq!(notifications.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_no_events_before_first_handler() {
  setup_tracing_for_test();
  let pool = new_pool("test_notifier_late_handler", 1);

  let early = pool
    .submit(|_ctx, _token| Box::pin(async move { Ok::<_, String>("early".to_string()) }))
    .unwrap();
  early.await_result().await.unwrap();

  let (notifications, handler) = create_collecting_handler();
  pool.add_completion_handler(handler);
  let late = pool
    .submit(|_ctx, _token| Box::pin(async move { Ok::<_, String>("late".to_string()) }))
    .unwrap();
  let late_id = late.id();
  late.await_result().await.unwrap();
  sleep(Duration::from_millis(20)).await;

  let notifs = notifications.lock().unwrap();
  assert_eq!(notifs.len(), 1);
  assert_eq!(notifs[0].job_id, late_id);
}
