// skein/src/operation.rs

//! The typed surface of a pipeline: `Operation<T>` handles and `Deferred<T>`
//! sources.
//!
//! An `Operation<T>` stands for the value of one stage. Each combinator
//! appends a step to the pipeline's program and returns the handle of the
//! stage that step produces; the pipeline itself keeps running in the
//! background whether or not anyone holds a handle.

use crate::core::cancel::{CancellationToken, Ticket};
use crate::core::step::{self, StepDescriptor};
use crate::core::value::{boxed, downcast_value};
use crate::error::{SkeinError, SkeinResult};
use crate::orchestrator::Orchestrator;
use std::error::Error as StdError;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{event, Level};

/// Handle to one stage of a pipeline, producing values of type `T`.
///
/// Every handle accepts exactly one continuation (`then*`, `wait`,
/// `wait_all`). Continuing a handle twice is a programming error and panics.
/// Catch and error handlers may be attached freely.
#[must_use = "an operation does nothing useful unless it is continued or waited on"]
pub struct Operation<T> {
  orchestrator: Arc<Orchestrator>,
  position: usize,
  continued: AtomicBool,
  _marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for Operation<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Operation")
      .field("pipeline", &self.orchestrator.id())
      .field("position", &self.position)
      .field("value_type", &std::any::type_name::<T>())
      .field("continued", &self.continued.load(Ordering::Acquire))
      .finish()
  }
}

impl<T: Send + 'static> Operation<T> {
  pub(crate) fn new(orchestrator: Arc<Orchestrator>, position: usize) -> Self {
    Self {
      orchestrator,
      position,
      continued: AtomicBool::new(false),
      _marker: PhantomData,
    }
  }

  /// Position of this stage in the pipeline; 0 is the root value of a
  /// deferred or resolved pipeline.
  pub fn position(&self) -> usize {
    self.position
  }

  pub fn is_aborted(&self) -> bool {
    self.orchestrator.is_aborted()
  }

  /// Live workers of the pipeline, running or parked.
  pub fn live_workers(&self) -> usize {
    self.orchestrator.live_workers()
  }

  /// Cancels every lineage of the pipeline. Steps already running finish but
  /// their results are discarded; nothing further is dispatched.
  pub fn abort(&self) {
    self.orchestrator.abort();
  }

  #[track_caller]
  fn claim(&self) {
    if self.continued.swap(true, Ordering::AcqRel) {
      panic!("{}", SkeinError::AlreadyContinued { position: self.position });
    }
  }

  #[track_caller]
  fn continue_with<U: Send + 'static>(&self, step: StepDescriptor) -> Operation<U> {
    self.claim();
    let position = self.orchestrator.append(step);
    Operation::new(Arc::clone(&self.orchestrator), position)
  }

  // --- Continuations ---

  /// Runs `f` on the cooperative queue.
  #[track_caller]
  pub fn then<U, F>(&self, f: F) -> Operation<U>
  where
    U: Send + 'static,
    F: Fn(T) -> anyhow::Result<U> + Send + Sync + 'static,
  {
    self.continue_with(StepDescriptor::Serial(step::transform(
      move |input: T, _: &CancellationToken| f(input),
    )))
  }

  /// Runs `f` on the pool.
  #[track_caller]
  pub fn then_async<U, F>(&self, f: F) -> Operation<U>
  where
    U: Send + 'static,
    F: Fn(T) -> anyhow::Result<U> + Send + Sync + 'static,
  {
    self.continue_with(StepDescriptor::Parallel(step::transform(
      move |input: T, _: &CancellationToken| f(input),
    )))
  }

  /// Runs `f` on the pool with a token that flips once the pipeline is
  /// aborted.
  #[track_caller]
  pub fn then_async_cancellable<U, F>(&self, f: F) -> Operation<U>
  where
    U: Send + 'static,
    F: Fn(T, &CancellationToken) -> anyhow::Result<U> + Send + Sync + 'static,
  {
    self.continue_with(StepDescriptor::Parallel(step::transform(f)))
  }

  /// Fans the value out: every element `f` yields continues as its own
  /// lineage until the next `then_merge*`.
  #[track_caller]
  pub fn then_branch<U, I, F>(&self, f: F) -> Operation<U>
  where
    U: Send + 'static,
    I: IntoIterator<Item = U>,
    F: Fn(T) -> anyhow::Result<I> + Send + Sync + 'static,
  {
    self.continue_with(StepDescriptor::Branch(step::fan_out(
      move |input: T, _: &CancellationToken| f(input),
    )))
  }

  #[track_caller]
  pub fn then_branch_async<U, I, F>(&self, f: F) -> Operation<U>
  where
    U: Send + 'static,
    I: IntoIterator<Item = U>,
    F: Fn(T) -> anyhow::Result<I> + Send + Sync + 'static,
  {
    self.continue_with(StepDescriptor::BranchParallel(step::fan_out(
      move |input: T, _: &CancellationToken| f(input),
    )))
  }

  /// Gathers the values of every lineage spawned by the innermost open
  /// Branch, in completion order, and runs `f` once over them.
  #[track_caller]
  pub fn then_merge<U, F>(&self, f: F) -> Operation<U>
  where
    U: Send + 'static,
    F: Fn(Vec<T>) -> anyhow::Result<U> + Send + Sync + 'static,
  {
    self.continue_with(StepDescriptor::Merge(step::fan_in(
      move |inputs: Vec<T>, _: &CancellationToken| f(inputs),
    )))
  }

  #[track_caller]
  pub fn then_merge_async<U, F>(&self, f: F) -> Operation<U>
  where
    U: Send + 'static,
    F: Fn(Vec<T>) -> anyhow::Result<U> + Send + Sync + 'static,
  {
    self.continue_with(StepDescriptor::MergeParallel(step::fan_in(
      move |inputs: Vec<T>, _: &CancellationToken| f(inputs),
    )))
  }

  // --- Recovery ---

  /// Recovers failures of type `E` raised at or before this stage (back to
  /// the nearest Branch or Merge) by substituting the handler's value for
  /// this stage.
  pub fn catch<E, F>(self, handler: F) -> Self
  where
    E: StdError + Send + Sync + 'static,
    F: Fn(&E) -> T + Send + Sync + 'static,
  {
    self.orchestrator.catch_at::<E, _>(self.position, move |error: &E| boxed(handler(error)));
    self
  }

  /// Like `catch`, but matches every failure.
  pub fn catch_any<F>(self, handler: F) -> Self
  where
    F: Fn(&anyhow::Error) -> T + Send + Sync + 'static,
  {
    self.orchestrator.catch_any_at(self.position, move |error: &anyhow::Error| boxed(handler(error)));
    self
  }

  /// Observes failures of type `E` anywhere in the pipeline that no catch
  /// recovered. The failed lineage ends without a value.
  pub fn on_error<E, F>(self, handler: F) -> Self
  where
    E: StdError + Send + Sync + 'static,
    F: Fn(&E) + Send + Sync + 'static,
  {
    self.orchestrator.on_error::<E, F>(handler);
    self
  }

  /// Like `on_error`, but matches every failure.
  pub fn on_any_error<F>(self, handler: F) -> Self
  where
    F: Fn(&anyhow::Error) + Send + Sync + 'static,
  {
    self.orchestrator.on_any_error(handler);
    self
  }

  // --- Settling ---

  /// Blocks until the pipeline settles and returns the single value parked at
  /// this stage. Serial steps run on the calling thread while waiting.
  #[track_caller]
  pub fn wait(self) -> SkeinResult<T> {
    let mut values = self.wait_all()?;
    match values.len() {
      1 => values.pop().ok_or(SkeinError::NoValue),
      0 => Err(SkeinError::NoValue),
      count => Err(SkeinError::AmbiguousValue { count }),
    }
  }

  /// Like `wait`, but returns the values of every lineage parked at this
  /// stage, in no particular order.
  #[track_caller]
  pub fn wait_all(self) -> SkeinResult<Vec<T>> {
    self.claim();
    let values = self.orchestrator.wait()?;
    values.into_iter().map(downcast_value::<T>).collect()
  }
}

struct DeferredShared {
  orchestrator: Arc<Orchestrator>,
  ticket: Ticket,
}

impl Drop for DeferredShared {
  fn drop(&mut self) {
    if self.ticket.try_resolve() {
      event!(
        Level::WARN,
        pipeline = self.orchestrator.id(),
        "Deferred dropped without being resolved; rejecting its pipeline."
      );
      self.orchestrator.reject_root(SkeinError::Abandoned.into());
    }
  }
}

/// The producing side of `Dispatcher::deferred`. Resolves (or rejects) the
/// root of its pipeline exactly once.
///
/// Clones share one resolution. Dropping the last clone without resolving
/// rejects the pipeline with `SkeinError::Abandoned`.
#[must_use = "dropping an unresolved deferred rejects its pipeline"]
pub struct Deferred<T> {
  shared: Arc<DeferredShared>,
  _marker: PhantomData<fn(T)>,
}

impl<T> Clone for Deferred<T> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
      _marker: PhantomData,
    }
  }
}

impl<T> fmt::Debug for Deferred<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Deferred")
      .field("pipeline", &self.shared.orchestrator.id())
      .field("resolved", &self.shared.ticket.is_resolved())
      .finish()
  }
}

impl<T: Send + 'static> Deferred<T> {
  pub(crate) fn new(orchestrator: Arc<Orchestrator>) -> Self {
    Self {
      shared: Arc::new(DeferredShared {
        orchestrator,
        ticket: Ticket::new(),
      }),
      _marker: PhantomData,
    }
  }

  pub fn resolve(&self, value: T) -> SkeinResult<()> {
    if !self.shared.ticket.try_resolve() {
      return Err(SkeinError::AlreadyResolved);
    }
    self.shared.orchestrator.start_root(boxed(value));
    Ok(())
  }

  pub fn reject<E>(&self, error: E) -> SkeinResult<()>
  where
    E: Into<anyhow::Error>,
  {
    if !self.shared.ticket.try_resolve() {
      return Err(SkeinError::AlreadyResolved);
    }
    self.shared.orchestrator.reject_root(error.into());
    Ok(())
  }

  pub fn is_resolved(&self) -> bool {
    self.shared.ticket.is_resolved()
  }
}
