use context_pool::{context_fns, BoxError, ContextPool, JobHandle, PoolConfig, ShutdownMode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

/// Stand-in for an expensive rendering surface.
#[derive(Debug)]
struct RenderSurface {
  id: usize,
  frames: u32,
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Concurrency Limit Example (Limit: 2) ---");

  let next_surface_id = Arc::new(AtomicUsize::new(0));
  let provider = context_fns(
    move || {
      let id = next_surface_id.fetch_add(1, Ordering::SeqCst);
      info!("Creating render surface {}", id);
      Ok::<_, BoxError>(RenderSurface { id, frames: 0 })
    },
    |surface: RenderSurface| {
      info!("Destroying render surface {} after {} frame(s)", surface.id, surface.frames);
      Ok(())
    },
  );

  let concurrency_limit = 2;
  let pool: Arc<ContextPool<_, String, String>> = ContextPool::new(
    PoolConfig::new("concurrency_pool", concurrency_limit),
    provider,
    Handle::current(),
  )
  .expect("valid pool configuration");

  let num_jobs = 5;
  let mut handles: Vec<JobHandle<String, String>> = Vec::new();

  info!(
    "Submitting {} jobs, each takes 1 sec. With concurrency {}, this should take ~{} secs.",
    num_jobs,
    concurrency_limit,
    (num_jobs as f32 / concurrency_limit as f32).ceil()
  );

  for i in 0..num_jobs {
    let submitted = pool.submit(move |surface, _token| {
      Box::pin(async move {
        info!("Job {} rendering on surface {}", i, surface.id);
        tokio::time::sleep(Duration::from_secs(1)).await;
        surface.frames += 1;
        Ok::<_, String>(format!("Job {} finished on surface {}", i, surface.id))
      })
    });
    match submitted {
      Ok(handle) => handles.push(handle),
      Err(e) => tracing::error!("Failed to submit job {}: {:?}", i, e),
    }
  }

  info!("Active: {}, queued: {}", pool.active_count(), pool.queued_count());

  for handle in handles {
    let job_id = handle.id();
    match handle.await_result().await {
      Ok(result) => info!("Job {} main: Received result: {}", job_id, result),
      Err(e) => info!("Job {} main: Received error: {:?}", job_id, e),
    }
  }

  info!("All jobs processed. Shutting down.");
  pool.shutdown(ShutdownMode::Drain).await.expect("Pool shutdown failed");
  info!("Pool stats: {:?}", pool.stats());
  info!("--- Concurrency Limit Example End ---");
}
