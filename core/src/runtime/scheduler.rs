// skein/src/runtime/scheduler.rs

//! The pool lane. Parallel steps are handed to a `TaskScheduler`, which runs
//! them on background threads in no particular order.

use super::config::DispatcherConfig;
use crate::core::guard::panic_message;
use crate::error::SkeinResult;
use tracing::{event, Level};

/// A unit of work handed to a lane.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs on background threads.
///
/// Implementations must not run the job inline on the calling thread: a worker
/// submits its next job while still inside the previous one.
pub trait TaskScheduler: Send + Sync {
  fn spawn(&self, job: Job);
}

/// Default scheduler, backed by a dedicated rayon thread pool.
pub struct RayonScheduler {
  pool: rayon::ThreadPool,
}

impl RayonScheduler {
  pub fn new(config: &DispatcherConfig) -> SkeinResult<Self> {
    let prefix = config.thread_name_prefix.clone();
    // Jobs guard user code; a panic that still escapes a job is only logged.
    let mut builder = rayon::ThreadPoolBuilder::new()
      .thread_name(move |index| format!("{}-{}", prefix, index))
      .panic_handler(|payload| {
        event!(Level::ERROR, message = %panic_message(payload.as_ref()), "Pool job panicked.");
      });
    if let Some(threads) = config.pool_threads {
      builder = builder.num_threads(threads);
    }
    let pool = builder.build()?;
    event!(
      Level::DEBUG,
      threads = pool.current_num_threads(),
      prefix = %config.thread_name_prefix,
      "Worker pool started."
    );
    Ok(Self { pool })
  }

  pub fn threads(&self) -> usize {
    self.pool.current_num_threads()
  }
}

impl TaskScheduler for RayonScheduler {
  fn spawn(&self, job: Job) {
    self.pool.spawn(job);
  }
}

/// Runs parallel steps on a tokio runtime's blocking pool, for hosts that
/// already own a runtime.
#[cfg(feature = "tokio")]
pub struct TokioScheduler {
  handle: tokio::runtime::Handle,
}

#[cfg(feature = "tokio")]
impl TokioScheduler {
  pub fn new(handle: tokio::runtime::Handle) -> Self {
    Self { handle }
  }

  /// Uses the runtime the caller is running in. Panics outside a runtime, as
  /// `Handle::current` does.
  pub fn current() -> Self {
    Self::new(tokio::runtime::Handle::current())
  }
}

#[cfg(feature = "tokio")]
impl TaskScheduler for TokioScheduler {
  fn spawn(&self, job: Job) {
    // Detached; completion is observed through the pipeline, not the handle.
    drop(self.handle.spawn_blocking(job));
  }
}
