// skein/src/core/step.rs

//! Defines `StepDescriptor`, one immutable stage of a pipeline program, and the
//! wrappers that erase a typed transform into one that works on opaque values.

use super::cancel::CancellationToken;
use super::control::{Lane, StepKind};
use super::value::{boxed, downcast_value, Value};
use crate::error::{SkeinError, SkeinResult};
use parking_lot::Mutex;
use std::sync::Arc;

pub(crate) type Transform = Arc<dyn Fn(Value, &CancellationToken) -> anyhow::Result<Value> + Send + Sync>;
pub(crate) type FanOut = Arc<dyn Fn(Value, &CancellationToken) -> anyhow::Result<Vec<Value>> + Send + Sync>;
pub(crate) type FanIn = Arc<dyn Fn(Vec<Value>, &CancellationToken) -> anyhow::Result<Value> + Send + Sync>;

/// What a worker hands to a step.
pub(crate) enum Payload {
  One(Value),
  Gathered(Vec<Value>),
}

/// What a step hands back to its worker.
pub(crate) enum StepOutput {
  One(Value),
  Fanned(Vec<Value>),
}

/// One stage of a pipeline. Shared by every lineage of the pipeline, so the
/// transforms are `Fn` and may run many times (once per sibling after a Branch).
#[derive(Clone)]
pub(crate) enum StepDescriptor {
  Serial(Transform),
  Parallel(Transform),
  Branch(FanOut),
  BranchParallel(FanOut),
  Merge(FanIn),
  MergeParallel(FanIn),
}

impl StepDescriptor {
  pub(crate) fn kind(&self) -> StepKind {
    match self {
      StepDescriptor::Serial(_) => StepKind::Serial,
      StepDescriptor::Parallel(_) => StepKind::Parallel,
      StepDescriptor::Branch(_) => StepKind::Branch,
      StepDescriptor::BranchParallel(_) => StepKind::BranchParallel,
      StepDescriptor::Merge(_) => StepKind::Merge,
      StepDescriptor::MergeParallel(_) => StepKind::MergeParallel,
    }
  }

  pub(crate) fn lane(&self) -> Lane {
    self.kind().lane()
  }

  pub(crate) fn invoke(&self, payload: Payload, token: &CancellationToken) -> anyhow::Result<StepOutput> {
    match (self, payload) {
      (StepDescriptor::Serial(f) | StepDescriptor::Parallel(f), Payload::One(value)) => {
        f(value, token).map(StepOutput::One)
      }
      (StepDescriptor::Branch(f) | StepDescriptor::BranchParallel(f), Payload::One(value)) => {
        f(value, token).map(StepOutput::Fanned)
      }
      (StepDescriptor::Merge(f) | StepDescriptor::MergeParallel(f), Payload::Gathered(values)) => {
        f(values, token).map(StepOutput::One)
      }
      (step, _) => Err(
        SkeinError::Internal(format!("payload shape does not fit a {} step", step.kind())).into(),
      ),
    }
  }
}

impl std::fmt::Debug for StepDescriptor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StepDescriptor").field("kind", &self.kind()).finish()
  }
}

// --- Typed -> erased wrappers ---

pub(crate) fn transform<T, U, F>(f: F) -> Transform
where
  T: Send + 'static,
  U: Send + 'static,
  F: Fn(T, &CancellationToken) -> anyhow::Result<U> + Send + Sync + 'static,
{
  Arc::new(move |value, token| {
    let input = downcast_value::<T>(value)?;
    f(input, token).map(boxed)
  })
}

pub(crate) fn fan_out<T, U, I, F>(f: F) -> FanOut
where
  T: Send + 'static,
  U: Send + 'static,
  I: IntoIterator<Item = U>,
  F: Fn(T, &CancellationToken) -> anyhow::Result<I> + Send + Sync + 'static,
{
  Arc::new(move |value, token| {
    let input = downcast_value::<T>(value)?;
    let elements = f(input, token)?;
    Ok(elements.into_iter().map(boxed).collect())
  })
}

pub(crate) fn fan_in<T, U, F>(f: F) -> FanIn
where
  T: Send + 'static,
  U: Send + 'static,
  F: Fn(Vec<T>, &CancellationToken) -> anyhow::Result<U> + Send + Sync + 'static,
{
  Arc::new(move |values, token| {
    let inputs = values
      .into_iter()
      .map(downcast_value::<T>)
      .collect::<SkeinResult<Vec<T>>>()?;
    f(inputs, token).map(boxed)
  })
}

/// Wraps the root producer of `Dispatcher::run`. Only the root worker ever
/// runs step 0, so the closure is taken on first use.
pub(crate) fn root<U, F>(f: F) -> Transform
where
  U: Send + 'static,
  F: FnOnce() -> anyhow::Result<U> + Send + 'static,
{
  let slot = Mutex::new(Some(f));
  Arc::new(move |_unit, _token| {
    let producer = slot.lock().take();
    match producer {
      Some(f) => f().map(boxed),
      None => Err(SkeinError::Internal("root step invoked twice".to_string()).into()),
    }
  })
}
