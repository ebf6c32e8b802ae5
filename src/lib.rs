//! A Tokio-based pool that multiplexes short-lived jobs over a hard ceiling of
//! expensive execution contexts, with FIFO queuing, cooperative cancellation
//! and drain-aware shutdown.

mod config;
mod context;
mod error;
mod handle;
mod manager;
mod notifier;
mod stats;
mod task;

pub use config::PoolConfig;
pub use context::{context_fns, ContextProvider, FnContextProvider};
pub use error::{BoxError, JobError, PoolError};
pub use handle::JobHandle;
pub use manager::{CancelOutcome, ContextPool, ShutdownMode};
pub use notifier::{JobCompletionInfo, JobCompletionStatus};
pub use stats::PoolStats;
pub use task::{JobId, JobState, JobTask};

// Re-exported so callers can name the task signature without extra dependencies.
pub use futures_util::future::BoxFuture;
pub use tokio_util::sync::CancellationToken;
