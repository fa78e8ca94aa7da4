// skein/src/core/cancel.rs

//! Single-use resolution flags.
//!
//! Every dispatched step and every `Deferred` owns a `Ticket`. Normal completion
//! and cancellation race to claim it; whoever claims first wins and the loser
//! becomes a silent no-op, so a continuation runs at most once without taking a
//! lock on the hot path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub(crate) struct Ticket(Arc<AtomicBool>);

impl Ticket {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Returns `true` for the first caller only.
  pub(crate) fn try_resolve(&self) -> bool {
    self
      .0
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  pub(crate) fn is_resolved(&self) -> bool {
    self.0.load(Ordering::Acquire)
  }
}

/// Handed to parallel transforms registered with `then_async_cancellable`.
///
/// Cancellation is cooperative: a long-running transform should poll
/// `is_cancelled` and return early once it flips. Whatever it returns after
/// cancellation is discarded.
#[derive(Debug, Clone)]
pub struct CancellationToken {
  ticket: Ticket,
}

impl CancellationToken {
  pub(crate) fn new(ticket: Ticket) -> Self {
    Self { ticket }
  }

  pub fn is_cancelled(&self) -> bool {
    self.ticket.is_resolved()
  }
}
