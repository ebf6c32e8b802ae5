use context_pool::{context_fns, BoxError, ContextPool, JobHandle, PoolConfig, ShutdownMode};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Shutdown Modes Example ---");

  for mode in [ShutdownMode::Drain, ShutdownMode::RejectQueued] {
    run_with_mode(mode).await;
  }

  info!("--- Shutdown Modes Example End ---");
}

async fn run_with_mode(mode: ShutdownMode) {
  info!("Running five 500ms jobs over two contexts, then shutting down with {:?}", mode);

  let provider = context_fns(|| Ok::<Vec<u8>, BoxError>(vec![0u8; 1024]), |_buffer: Vec<u8>| Ok(()));
  let pool: Arc<ContextPool<_, usize, String>> = ContextPool::new(
    PoolConfig::new("shutdown_pool", 2).with_queue_capacity(8),
    provider,
    Handle::current(),
  )
  .expect("valid pool configuration");

  // Jobs 0 and 1 start right away; 2, 3 and 4 wait in the queue.
  let mut handles: Vec<JobHandle<usize, String>> = Vec::new();
  for i in 0..5 {
    let handle = pool
      .submit(move |buffer, _token| {
        Box::pin(async move {
          buffer[0] = i as u8;
          tokio::time::sleep(Duration::from_millis(500)).await;
          Ok::<_, String>(i)
        })
      })
      .expect("pool accepts jobs before shutdown");
    handles.push(handle);
  }

  tokio::time::sleep(Duration::from_millis(100)).await;
  info!("Active: {}, queued: {}", pool.active_count(), pool.queued_count());

  pool.shutdown(mode).await.expect("shutdown failed");
  info!("shutdown({:?}) returned", mode);

  match pool.submit(|_buffer, _token| Box::pin(async move { Ok::<_, String>(99) })) {
    Ok(_) => tracing::error!("LATE SUBMISSION SUCCEEDED (UNEXPECTED!)"),
    Err(e) => info!("Late submission correctly failed: {}", e),
  }

  for handle in handles {
    let job_id = handle.id();
    match handle.await_result().await {
      Ok(result) => info!("Job {} result: {}", job_id, result),
      Err(e) => info!("Job {} error: {}", job_id, e),
    }
  }
}
