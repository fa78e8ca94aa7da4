// skein/src/error.rs
use anyhow::Error as AnyhowError;
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkeinError {
  #[error("Operation at position {position} was already continued; each stage accepts exactly one continuation")]
  AlreadyContinued { position: usize },

  #[error("Deferred value was already resolved")]
  AlreadyResolved,

  #[error("Deferred value was dropped without being resolved")]
  Abandoned,

  #[error("Pipeline was aborted")]
  Aborted,

  #[error("Type mismatch while reading a stage value (expected {expected_type})")]
  TypeMismatch { expected_type: String },

  #[error("User callback panicked: {message}")]
  Panicked { message: String },

  #[error("Pipeline settled without producing a value")]
  NoValue,

  #[error("Pipeline settled with {count} values where exactly one was expected")]
  AmbiguousValue { count: usize },

  #[error(transparent)]
  Unhandled(#[from] UnhandledFailure),

  #[error("Configuration error: {0}")]
  Config(String),

  #[error("Failed to build the worker pool: {0}")]
  PoolBuild(#[from] rayon::ThreadPoolBuildError),

  #[error("Internal skein error: {0}")]
  Internal(String),
}

impl SkeinError {
  /// Caller-side misuse, as opposed to a failure raised at run time.
  ///
  /// `Aborted` is not counted: `wait` also returns it when the escalation
  /// sink tore the pipeline down after an unhandled failure.
  pub fn is_contract_violation(&self) -> bool {
    matches!(self, SkeinError::AlreadyContinued { .. } | SkeinError::AlreadyResolved)
  }
}

/// Failures that no handler recovered from by the time they reached the
/// escalation sink. Several sibling lineages of one pipeline may fail before
/// the sink runs, so every failure is kept.
#[derive(Debug)]
pub struct UnhandledFailure {
  failures: Vec<AnyhowError>,
}

impl UnhandledFailure {
  pub(crate) fn new(failures: Vec<AnyhowError>) -> Self {
    Self { failures }
  }

  pub fn failures(&self) -> &[AnyhowError] {
    &self.failures
  }

  pub fn first(&self) -> Option<&AnyhowError> {
    self.failures.first()
  }

  pub fn into_failures(self) -> Vec<AnyhowError> {
    self.failures
  }

  /// Finds the first failure that is, or was caused by, an `E`.
  pub fn downcast_ref<E>(&self) -> Option<&E>
  where
    E: StdError + Send + Sync + 'static,
  {
    self.failures.iter().find_map(crate::pipeline::catch::find_cause::<E>)
  }
}

impl fmt::Display for UnhandledFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.failures.as_slice() {
      [] => write!(f, "Unhandled pipeline failure"),
      [only] => write!(f, "Unhandled pipeline failure: {}", only),
      [first, rest @ ..] => write!(
        f,
        "Unhandled pipeline failure: {} (and {} more)",
        first,
        rest.len()
      ),
    }
  }
}

impl StdError for UnhandledFailure {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    self
      .failures
      .first()
      .map(|err| -> &(dyn StdError + 'static) { err.as_ref() })
  }
}

pub type SkeinResult<T, E = SkeinError> = std::result::Result<T, E>;
