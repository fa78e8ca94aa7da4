// skein/src/orchestrator.rs

//! Defines the `Orchestrator`, the shared state of one pipeline.
//!
//! Every `Operation` handle and every worker of a pipeline points at the same
//! orchestrator. It owns the program, the registry of live workers and the
//! catch tables, and it routes failures: handle-level catches first, then the
//! pipeline-wide `on_error` handlers, then the dispatcher's escalation queue.

use crate::core::cancel::Ticket;
use crate::core::control::LineageOutcome;
use crate::core::step::StepDescriptor;
use crate::core::value::Value;
use crate::error::{SkeinError, SkeinResult, UnhandledFailure};
use crate::pipeline::catch::CatchContext;
use crate::pipeline::definition::Program;
use crate::pipeline::execution::{Worker, WorkerId};
use crate::pipeline::merge::MergeOrganizer;
use crate::registry::{Settle, WorkerRegistry};
use crate::runtime::{Dispatcher, Escalation};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{event, instrument, Level};

/// Where a failure ended up after the catch tables were consulted.
enum Recovery {
  /// A handle-level catch at `position` produced a substitute stage value.
  Substitute { position: usize, value: Value },
  /// An `on_error` handler observed the failure; the lineage ends here.
  Handled,
  Unhandled,
  /// A handler panicked; the panic replaces the failure being handled.
  HandlerPanicked(anyhow::Error),
}

pub(crate) struct Orchestrator {
  id: u64,
  dispatcher: Dispatcher,
  program: Program,
  registry: Mutex<WorkerRegistry>,
  catches: CatchContext<()>,
  handle_catches: RwLock<HashMap<usize, Arc<CatchContext<Value>>>>,
  next_worker: AtomicU64,
}

impl Orchestrator {
  pub(crate) fn new(dispatcher: &Dispatcher) -> Arc<Self> {
    let orchestrator = Arc::new(Self {
      id: dispatcher.next_pipeline_id(),
      dispatcher: dispatcher.clone(),
      program: Program::new(),
      registry: Mutex::new(WorkerRegistry::new()),
      catches: CatchContext::new(),
      handle_catches: RwLock::new(HashMap::new()),
      next_worker: AtomicU64::new(1),
    });
    dispatcher.track(&orchestrator);
    event!(Level::DEBUG, pipeline = orchestrator.id, "Pipeline created.");
    orchestrator
  }

  pub(crate) fn id(&self) -> u64 {
    self.id
  }

  pub(crate) fn dispatcher(&self) -> &Dispatcher {
    &self.dispatcher
  }

  pub(crate) fn next_worker_id(&self) -> WorkerId {
    self.next_worker.fetch_add(1, Ordering::Relaxed)
  }

  pub(crate) fn live_workers(&self) -> usize {
    self.registry.lock().live_count()
  }

  // --- Building ---

  /// Appends `step` and wakes every worker parked at the old tail. Returns
  /// the position of the stage the new step produces.
  ///
  /// The append and the collection of parked workers happen under the
  /// registry lock, so a worker either sees the new step before parking or is
  /// parked in time to be woken here.
  pub(crate) fn append(self: &Arc<Self>, step: StepDescriptor) -> usize {
    let kind = step.kind();
    let (position, woken) = {
      let mut registry = self.registry.lock();
      let index = self.program.append(step);
      if registry.is_aborted() {
        event!(
          Level::WARN,
          pipeline = self.id,
          position = index + 1,
          "Step appended to an aborted pipeline; it will never run."
        );
      }
      (index + 1, registry.wake_parked())
    };
    event!(
      Level::DEBUG,
      pipeline = self.id,
      position,
      %kind,
      woken = woken.len(),
      "Step appended."
    );
    for worker in woken {
      worker.resume(self);
    }
    position
  }

  fn handle_context(&self, position: usize) -> Arc<CatchContext<Value>> {
    Arc::clone(self.handle_catches.write().entry(position).or_default())
  }

  pub(crate) fn catch_at<E, F>(&self, position: usize, handler: F)
  where
    E: StdError + Send + Sync + 'static,
    F: Fn(&E) -> Value + Send + Sync + 'static,
  {
    self.handle_context(position).register::<E, F>(handler);
  }

  pub(crate) fn catch_any_at<F>(&self, position: usize, handler: F)
  where
    F: Fn(&anyhow::Error) -> Value + Send + Sync + 'static,
  {
    self.handle_context(position).register_any(handler);
  }

  pub(crate) fn on_error<E, F>(&self, handler: F)
  where
    E: StdError + Send + Sync + 'static,
    F: Fn(&E) + Send + Sync + 'static,
  {
    self.catches.register::<E, F>(handler);
  }

  pub(crate) fn on_any_error<F>(&self, handler: F)
  where
    F: Fn(&anyhow::Error) + Send + Sync + 'static,
  {
    self.catches.register_any(handler);
  }

  // --- Driving workers ---

  /// Registers a root that will arrive later through a `Deferred`.
  pub(crate) fn expect_root(&self) {
    self.registry.lock().expect_root();
  }

  pub(crate) fn start_root(self: &Arc<Self>, input: Value) {
    let worker = Worker::new(self.next_worker_id(), 0, Some(input));
    self.registry.lock().root_arrived(worker.id);
    event!(Level::DEBUG, pipeline = self.id, worker = worker.id, "Root lineage started.");
    worker.resume(self);
  }

  pub(crate) fn reject_root(self: &Arc<Self>, error: anyhow::Error) {
    let worker = Worker::new(self.next_worker_id(), 0, None);
    self.registry.lock().root_arrived(worker.id);
    event!(Level::DEBUG, pipeline = self.id, worker = worker.id, "Root lineage rejected.");
    self.throw_exception(worker, 0, error);
  }

  /// Hands back the step at the worker's cursor, or parks the worker at the
  /// tail. Returns `None` when the worker was parked or retired.
  pub(crate) fn next_step(&self, worker: Worker) -> Option<(Worker, Arc<StepDescriptor>)> {
    let mut registry = self.registry.lock();
    if registry.is_aborted() {
      registry.retire(worker.id, LineageOutcome::Aborted);
      return None;
    }
    if let Some(step) = self.program.get(worker.cursor) {
      registry.set_running(worker.id);
      return Some((worker, step));
    }
    event!(
      Level::TRACE,
      pipeline = self.id,
      worker = worker.id,
      position = worker.cursor,
      program_len = self.program.len(),
      "Worker parked at the tail of the program."
    );
    registry.park(worker);
    drop(registry);
    self.dispatcher.notify();
    None
  }

  /// Records that the worker's step is in flight. Returns `false` (and retires
  /// the worker) if the pipeline has been aborted.
  pub(crate) fn mark_dispatched(&self, id: WorkerId, ticket: &Ticket) -> bool {
    let mut registry = self.registry.lock();
    if registry.is_aborted() {
      registry.retire(id, LineageOutcome::Aborted);
      return false;
    }
    registry.dispatch(id, ticket.clone());
    true
  }

  /// Swaps a branching worker for its siblings in one registry update, so the
  /// pipeline never looks settled in between.
  pub(crate) fn hand_off(&self, parent: WorkerId, siblings: &[Worker]) {
    let mut registry = self.registry.lock();
    if registry.is_aborted() {
      return;
    }
    for sibling in siblings {
      registry.set_running(sibling.id);
    }
    registry.retire(parent, LineageOutcome::Branched);
  }

  pub(crate) fn retire(&self, id: WorkerId, outcome: LineageOutcome) {
    self.registry.lock().retire(id, outcome);
    self.dispatcher.notify();
  }

  // --- Failures ---

  /// Routes a failure raised by the step that would have produced stage
  /// `origin` (or by a deferred reject, `origin == 0`).
  pub(crate) fn throw_exception(self: &Arc<Self>, worker: Worker, origin: usize, error: anyhow::Error) {
    event!(
      Level::WARN,
      pipeline = self.id,
      worker = worker.id,
      origin,
      error = %error,
      "Step failed."
    );
    let error = match self.recover(&error, origin) {
      Recovery::Substitute { position, value } => return self.substitute(worker, origin, position, value),
      Recovery::Handled => return self.retire(worker.id, LineageOutcome::Failed),
      Recovery::Unhandled => error,
      Recovery::HandlerPanicked(panic) => {
        event!(
          Level::ERROR,
          pipeline = self.id,
          worker = worker.id,
          origin,
          error = %error,
          "Handler panicked while recovering a failure."
        );
        panic
      }
    };

    let worker_id = worker.id;
    {
      let mut registry = self.registry.lock();
      if registry.is_aborted() {
        registry.retire(worker_id, LineageOutcome::Aborted);
        return;
      }
      registry.escalate(worker_id);
      self.dispatcher.escalate(Escalation {
        orchestrator: Arc::clone(self),
        worker,
        origin,
        error,
      });
    }
    event!(
      Level::WARN,
      pipeline = self.id,
      worker = worker_id,
      origin,
      "No handler recovered the failure; escalated to the dispatcher."
    );
    self.dispatcher.notify();
  }

  /// Second chance for an escalated failure, taken when the dispatcher settles
  /// its escalation queue. Handlers registered since the failure are
  /// considered. Returns the error if it is still unhandled; the dispatcher
  /// aborts the pipeline once the whole batch is settled.
  pub(crate) fn retry_escalation(
    self: &Arc<Self>,
    worker: Worker,
    origin: usize,
    error: anyhow::Error,
  ) -> Option<anyhow::Error> {
    if self.is_aborted() {
      event!(
        Level::DEBUG,
        pipeline = self.id,
        worker = worker.id,
        "Escalated failure belongs to an aborted pipeline; dropping it."
      );
      return None;
    }
    match self.recover(&error, origin) {
      Recovery::Substitute { position, value } => {
        self.substitute(worker, origin, position, value);
        None
      }
      Recovery::Handled => {
        self.retire(worker.id, LineageOutcome::Failed);
        None
      }
      Recovery::Unhandled => {
        event!(
          Level::ERROR,
          pipeline = self.id,
          worker = worker.id,
          origin,
          error = %error,
          "Unhandled pipeline failure."
        );
        Some(error)
      }
      Recovery::HandlerPanicked(panic) => {
        event!(
          Level::ERROR,
          pipeline = self.id,
          worker = worker.id,
          origin,
          error = %error,
          "Handler panicked while retrying an escalated failure."
        );
        Some(panic)
      }
    }
  }

  /// Searches handle-level catches from `origin` forward, stopping before any
  /// step that reshapes the lineage. Falls back to the pipeline-wide handlers.
  fn recover(&self, error: &anyhow::Error, origin: usize) -> Recovery {
    let mut position = origin;
    loop {
      match self.handle_catch(position, error) {
        Ok(Some(value)) => return Recovery::Substitute { position, value },
        Ok(None) => {}
        Err(panic) => return Recovery::HandlerPanicked(panic),
      }
      match self.program.get(position) {
        Some(step) if !step.kind().reshapes_lineage() => position += 1,
        _ => break,
      }
    }
    match self.catches.handle(error) {
      Ok(Some(())) => Recovery::Handled,
      Ok(None) => Recovery::Unhandled,
      Err(panic) => Recovery::HandlerPanicked(panic),
    }
  }

  fn handle_catch(&self, position: usize, error: &anyhow::Error) -> anyhow::Result<Option<Value>> {
    let Some(context) = self.handle_catches.read().get(&position).cloned() else {
      return Ok(None);
    };
    context.handle(error)
  }

  /// Resumes a failed lineage with a substitute value at `position`.
  fn substitute(self: &Arc<Self>, mut worker: Worker, origin: usize, position: usize, value: Value) {
    // The failed step was a Branch, so the value stands in for its whole
    // output and the lineage continues as a group of one. The catch search
    // never crosses a Branch or Merge, so this group is closed by the same
    // Merge the branch would have been.
    let failed_branch = origin > 0
      && self
        .program
        .get(origin - 1)
        .map_or(false, |step| step.kind().is_branch());
    if failed_branch {
      worker.organizers.push(Arc::new(MergeOrganizer::new(1)));
    }
    event!(
      Level::DEBUG,
      pipeline = self.id,
      worker = worker.id,
      origin,
      position,
      "Failure recovered; lineage resumes with a substitute value."
    );
    worker.cursor = position;
    worker.input = Some(value);
    self.registry.lock().set_running(worker.id);
    worker.resume(self);
  }

  // --- Settling ---

  fn settle(&self) -> Settle {
    self.registry.lock().settle()
  }

  /// Blocks until every lineage is parked, pumping the cooperative queue on
  /// the calling thread meanwhile. Returns the values of the parked lineages.
  #[instrument(name = "Orchestrator::wait", skip_all, fields(pipeline = self.id), err(Display))]
  pub(crate) fn wait(self: &Arc<Self>) -> SkeinResult<Vec<Value>> {
    loop {
      self.dispatcher.drain_serial();
      let failures = self.dispatcher.settle_escalations(Some(self));
      if !failures.is_empty() {
        return Err(UnhandledFailure::new(failures).into());
      }
      match self.settle() {
        Settle::Aborted => return Err(SkeinError::Aborted),
        Settle::Idle => break,
        Settle::Busy | Settle::Escalated => {
          self.dispatcher.park_until(|| self.settle() != Settle::Busy);
        }
      }
    }

    let workers = self.registry.lock().take_parked();
    let values: Vec<Value> = workers.into_iter().filter_map(|worker| worker.input).collect();
    event!(Level::DEBUG, pipeline = self.id, values = values.len(), "Pipeline settled.");
    Ok(values)
  }

  /// Cancels every live lineage. Idempotent.
  pub(crate) fn abort(&self) {
    let dropped = {
      let mut registry = self.registry.lock();
      if registry.is_aborted() {
        return;
      }
      registry.cancel_all()
    };
    event!(
      Level::INFO,
      pipeline = self.id,
      parked = dropped.len(),
      "Pipeline aborted."
    );
    drop(dropped);
    self.dispatcher.notify();
  }

  pub(crate) fn is_aborted(&self) -> bool {
    self.registry.lock().is_aborted()
  }
}
