// skein/src/runtime/mod.rs

//! The `Dispatcher`: the two execution lanes plus the escalation sink.
//!
//! One dispatcher is shared by any number of pipelines. Serial steps wait in
//! its cooperative queue until a host thread calls `pump` (or a `wait` drains
//! it inline); parallel steps go straight to its `TaskScheduler`. Failures no
//! handler recovered from wait in the escalation queue until the next `pump`
//! or `wait` settles them.

pub mod config;
pub(crate) mod queue;
pub mod scheduler;

use crate::core::control::Lane;
use crate::core::step::{self, StepDescriptor};
use crate::core::value::boxed;
use crate::error::{SkeinResult, UnhandledFailure};
use crate::operation::{Deferred, Operation};
use crate::orchestrator::Orchestrator;
use crate::pipeline::execution::Worker;
use config::DispatcherConfig;
use parking_lot::Mutex;
use queue::CooperativeQueue;
use scheduler::{Job, RayonScheduler, TaskScheduler};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{event, instrument, Level};

/// A failure that no handler recovered from, parked with the worker whose
/// lineage it ended so a later settle can still recover it.
pub(crate) struct Escalation {
  pub(crate) orchestrator: Arc<Orchestrator>,
  pub(crate) worker: Worker,
  pub(crate) origin: usize,
  pub(crate) error: anyhow::Error,
}

impl Escalation {
  /// Retries recovery; returns the error if it is still unhandled.
  fn settle(self) -> Option<anyhow::Error> {
    let Escalation {
      orchestrator,
      worker,
      origin,
      error,
    } = self;
    orchestrator.retry_escalation(worker, origin, error)
  }
}

struct DispatcherInner {
  config: DispatcherConfig,
  serial: CooperativeQueue,
  escalations: Mutex<VecDeque<Escalation>>,
  scheduler: Arc<dyn TaskScheduler>,
  pipelines: Mutex<Vec<Weak<Orchestrator>>>,
  next_pipeline: AtomicU64,
}

/// Entry point of the engine. Cheap to clone; clones share the same queues
/// and pool.
#[derive(Clone)]
pub struct Dispatcher {
  inner: Arc<DispatcherInner>,
}

impl fmt::Debug for Dispatcher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Dispatcher")
      .field("config", &self.inner.config)
      .field("pending_serial", &self.pending_serial())
      .field("pending_escalations", &self.inner.escalations.lock().len())
      .finish()
  }
}

impl Dispatcher {
  /// Builds a dispatcher whose parallel steps run on a dedicated rayon pool.
  pub fn new(config: DispatcherConfig) -> SkeinResult<Self> {
    config.validate()?;
    let scheduler = RayonScheduler::new(&config)?;
    Ok(Self::with_scheduler(config, Arc::new(scheduler)))
  }

  pub fn with_scheduler(config: DispatcherConfig, scheduler: Arc<dyn TaskScheduler>) -> Self {
    event!(Level::DEBUG, config = ?config, "Dispatcher created.");
    Self {
      inner: Arc::new(DispatcherInner {
        config,
        serial: CooperativeQueue::new(),
        escalations: Mutex::new(VecDeque::new()),
        scheduler,
        pipelines: Mutex::new(Vec::new()),
        next_pipeline: AtomicU64::new(1),
      }),
    }
  }

  pub fn config(&self) -> &DispatcherConfig {
    &self.inner.config
  }

  // --- Pipeline sources ---

  /// Starts a pipeline whose first stage runs `f` on the cooperative queue.
  pub fn run<T, F>(&self, f: F) -> Operation<T>
  where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
  {
    self.start(StepDescriptor::Serial(step::root(f)))
  }

  /// Starts a pipeline whose first stage runs `f` on the pool.
  pub fn run_async<T, F>(&self, f: F) -> Operation<T>
  where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
  {
    self.start(StepDescriptor::Parallel(step::root(f)))
  }

  fn start<T: Send + 'static>(&self, root: StepDescriptor) -> Operation<T> {
    let orchestrator = Orchestrator::new(self);
    let position = orchestrator.append(root);
    orchestrator.start_root(boxed(()));
    Operation::new(orchestrator, position)
  }

  /// A pipeline whose root value is supplied later through the `Deferred`.
  pub fn deferred<T: Send + 'static>(&self) -> (Deferred<T>, Operation<T>) {
    let orchestrator = Orchestrator::new(self);
    orchestrator.expect_root();
    (Deferred::new(Arc::clone(&orchestrator)), Operation::new(orchestrator, 0))
  }

  /// A pipeline whose root value is already known.
  pub fn resolved<T: Send + 'static>(&self, value: T) -> Operation<T> {
    let orchestrator = Orchestrator::new(self);
    orchestrator.start_root(boxed(value));
    Operation::new(orchestrator, 0)
  }

  // --- Host loop ---

  /// Runs pending serial steps on the calling thread, then settles escalated
  /// failures. Returns how many serial steps ran, or every failure that is
  /// still unhandled (their pipelines are aborted).
  #[instrument(name = "Dispatcher::pump", skip_all, err(Display))]
  pub fn pump(&self) -> SkeinResult<usize> {
    let ran = self.inner.serial.drain(self.inner.config.max_serial_per_pump);
    let failures = self.settle_escalations(None);
    if !failures.is_empty() {
      event!(Level::ERROR, count = failures.len(), "Pump surfaced unhandled failures.");
      return Err(UnhandledFailure::new(failures).into());
    }
    Ok(ran)
  }

  pub fn pending_serial(&self) -> usize {
    self.inner.serial.len()
  }

  /// Pipelines that are still referenced by a handle or a worker.
  pub fn live_pipelines(&self) -> usize {
    self
      .inner
      .pipelines
      .lock()
      .iter()
      .filter(|pipeline| pipeline.strong_count() > 0)
      .count()
  }

  /// Aborts every live pipeline and drops queued serial steps and escalated
  /// failures. Pool tasks already running finish, but their results are
  /// discarded. The dispatcher stays usable for new pipelines.
  #[instrument(name = "Dispatcher::shutdown", skip_all)]
  pub fn shutdown(&self) {
    let pipelines: Vec<Arc<Orchestrator>> = std::mem::take(&mut *self.inner.pipelines.lock())
      .into_iter()
      .filter_map(|pipeline| pipeline.upgrade())
      .collect();
    for pipeline in &pipelines {
      pipeline.abort();
    }
    let dropped_jobs = self.inner.serial.clear();
    let dropped_escalations = std::mem::take(&mut *self.inner.escalations.lock());
    event!(
      Level::INFO,
      pipelines = pipelines.len(),
      dropped_jobs,
      dropped_escalations = dropped_escalations.len(),
      "Dispatcher shut down."
    );
  }

  // --- Crate-internal plumbing ---

  pub(crate) fn next_pipeline_id(&self) -> u64 {
    self.inner.next_pipeline.fetch_add(1, Ordering::Relaxed)
  }

  pub(crate) fn track(&self, orchestrator: &Arc<Orchestrator>) {
    let mut pipelines = self.inner.pipelines.lock();
    pipelines.retain(|pipeline| pipeline.strong_count() > 0);
    pipelines.push(Arc::downgrade(orchestrator));
  }

  pub(crate) fn submit(&self, lane: Lane, job: Job) {
    match lane {
      Lane::Cooperative => self.inner.serial.push(job),
      Lane::Pool => self.inner.scheduler.spawn(job),
    }
  }

  pub(crate) fn notify(&self) {
    self.inner.serial.notify();
  }

  /// Drains the cooperative queue completely; used by `wait`, which must
  /// make progress without a host pump.
  pub(crate) fn drain_serial(&self) -> usize {
    self.inner.serial.drain(None)
  }

  pub(crate) fn park_until(&self, ready: impl Fn() -> bool) {
    self.inner.serial.park_until(ready);
  }

  pub(crate) fn escalate(&self, escalation: Escalation) {
    self.inner.escalations.lock().push_back(escalation);
  }

  /// Retries recovery for queued escalations, all of them or only those of
  /// `owner`. Returns the failures that are still unhandled and aborts their
  /// pipelines. Aborting waits for the whole batch, so sibling failures of
  /// one pipeline are all reported.
  pub(crate) fn settle_escalations(&self, owner: Option<&Arc<Orchestrator>>) -> Vec<anyhow::Error> {
    let pending: Vec<Escalation> = {
      let mut queue = self.inner.escalations.lock();
      match owner {
        None => queue.drain(..).collect(),
        Some(owner) => {
          let (mine, others): (Vec<Escalation>, Vec<Escalation>) = queue
            .drain(..)
            .partition(|escalation| Arc::ptr_eq(&escalation.orchestrator, owner));
          queue.extend(others);
          mine
        }
      }
    };
    if !pending.is_empty() {
      event!(Level::DEBUG, count = pending.len(), "Settling escalated failures.");
    }
    let mut failures = Vec::new();
    let mut failed: Vec<Arc<Orchestrator>> = Vec::new();
    for escalation in pending {
      let orchestrator = Arc::clone(&escalation.orchestrator);
      if let Some(error) = escalation.settle() {
        failures.push(error);
        if !failed.iter().any(|seen| Arc::ptr_eq(seen, &orchestrator)) {
          failed.push(orchestrator);
        }
      }
    }
    for orchestrator in failed {
      event!(Level::WARN, pipeline = orchestrator.id(), "Aborting pipeline after unhandled failure.");
      orchestrator.abort();
    }
    failures
  }
}
