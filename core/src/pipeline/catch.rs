// skein/src/pipeline/catch.rs

//! Typed error recovery tables.
//!
//! A `CatchContext` is an ordered list of handlers, each bound to one error
//! type. Handlers are tried in registration order and the first whose type
//! matches the failure runs; the rest are skipped.

use crate::core::guard::run_guarded;
use parking_lot::RwLock;
use std::error::Error as StdError;
use std::sync::Arc;
use tracing::{event, Level};

type Matcher<R> = Box<dyn Fn(&anyhow::Error) -> Option<R> + Send + Sync>;

struct CatchEntry<R> {
  error_type: &'static str,
  matcher: Matcher<R>,
}

/// Finds an `E` in `err` or anywhere in its chain of sources.
///
/// A specific failure that carries a more general one as its `#[source]` is
/// therefore caught by a handler written for the general one.
pub(crate) fn find_cause<E>(err: &anyhow::Error) -> Option<&E>
where
  E: StdError + Send + Sync + 'static,
{
  err
    .downcast_ref::<E>()
    .or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<E>()))
}

/// Ordered (error type, handler) table. `R` is what a matching handler yields:
/// a substitute stage value for handle-level contexts, `()` for the
/// pipeline-wide one.
pub(crate) struct CatchContext<R> {
  entries: RwLock<Vec<Arc<CatchEntry<R>>>>,
}

impl<R> Default for CatchContext<R> {
  fn default() -> Self {
    Self {
      entries: RwLock::new(Vec::new()),
    }
  }
}

impl<R: 'static> CatchContext<R> {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn register<E, F>(&self, handler: F)
  where
    E: StdError + Send + Sync + 'static,
    F: Fn(&E) -> R + Send + Sync + 'static,
  {
    let matcher: Matcher<R> = Box::new(move |err: &anyhow::Error| find_cause::<E>(err).map(&handler));
    self.push(std::any::type_name::<E>(), matcher);
  }

  pub(crate) fn register_any<F>(&self, handler: F)
  where
    F: Fn(&anyhow::Error) -> R + Send + Sync + 'static,
  {
    self.push("anyhow::Error", Box::new(move |err: &anyhow::Error| Some(handler(err))));
  }

  fn push(&self, error_type: &'static str, matcher: Matcher<R>) {
    self.entries.write().push(Arc::new(CatchEntry { error_type, matcher }));
    event!(Level::DEBUG, %error_type, "Catch handler registered.");
  }

  /// Runs the first matching handler. Handlers run outside the table lock so
  /// one may register further handlers. A panicking handler stops the search
  /// and comes back as a `SkeinError::Panicked` failure.
  pub(crate) fn handle(&self, err: &anyhow::Error) -> anyhow::Result<Option<R>> {
    let snapshot: Vec<Arc<CatchEntry<R>>> = self.entries.read().clone();
    for entry in &snapshot {
      let recovered = run_guarded("catch handler", || Ok((entry.matcher)(err)))?;
      if recovered.is_some() {
        event!(Level::DEBUG, error_type = entry.error_type, error = %err, "Failure matched a catch handler.");
        return Ok(recovered);
      }
    }
    Ok(None)
  }
}
