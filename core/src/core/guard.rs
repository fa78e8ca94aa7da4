// skein/src/core/guard.rs

//! Panic containment for user code: step transforms and catch handlers both
//! run through `run_guarded`, so a panic becomes an ordinary failure instead
//! of unwinding through a pool thread or the host's `pump`.

use crate::error::SkeinError;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{event, Level};

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  payload
    .downcast_ref::<&str>()
    .map(|message| message.to_string())
    .or_else(|| payload.downcast_ref::<String>().cloned())
    .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Runs `f`, turning a panic into `SkeinError::Panicked`. `what` names the
/// kind of callback for the log.
pub(crate) fn run_guarded<R>(what: &'static str, f: impl FnOnce() -> anyhow::Result<R>) -> anyhow::Result<R> {
  match panic::catch_unwind(AssertUnwindSafe(f)) {
    Ok(result) => result,
    Err(payload) => {
      let message = panic_message(payload.as_ref());
      event!(Level::ERROR, callback = what, %message, "User callback panicked.");
      Err(SkeinError::Panicked { message }.into())
    }
  }
}
