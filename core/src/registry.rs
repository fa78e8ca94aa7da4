// skein/src/registry.rs

//! Defines `WorkerRegistry`, the per-pipeline record of live workers.
//!
//! Every worker that has not reached a terminal state has exactly one slot
//! here. Parked workers are stored in their slot, so the registry doubles as
//! the queue of workers waiting for the program to grow.

use crate::core::cancel::Ticket;
use crate::core::control::LineageOutcome;
use crate::pipeline::execution::{Worker, WorkerId};
use std::collections::BTreeMap;
use tracing::{event, Level};

pub(crate) enum Slot {
  /// Walking inline between dispatches (fold, skip, hand-off).
  Running,
  /// A transform is queued or executing; the ticket decides who resolves it.
  Dispatched(Ticket),
  /// Out of steps; waiting for an append.
  Parked(Worker),
  /// An unhandled failure waits in the dispatcher's escalation queue.
  Escalated,
}

/// Coarse state of a whole pipeline, as seen by `wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settle {
  /// Some worker is running or dispatched, or a deferred root has not arrived.
  Busy,
  /// Every live worker is parked (or none is left).
  Idle,
  /// Nothing is running, but an escalated failure still needs settling.
  Escalated,
  Aborted,
}

#[derive(Default)]
pub(crate) struct WorkerRegistry {
  slots: BTreeMap<WorkerId, Slot>,
  pending_roots: usize,
  aborted: bool,
}

impl WorkerRegistry {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn is_aborted(&self) -> bool {
    self.aborted
  }

  pub(crate) fn live_count(&self) -> usize {
    self.slots.len()
  }

  /// A deferred root that has not been resolved yet keeps the pipeline busy.
  pub(crate) fn expect_root(&mut self) {
    self.pending_roots += 1;
  }

  pub(crate) fn root_arrived(&mut self, id: WorkerId) {
    self.pending_roots = self.pending_roots.saturating_sub(1);
    if !self.aborted {
      self.slots.insert(id, Slot::Running);
    }
  }

  pub(crate) fn set_running(&mut self, id: WorkerId) {
    if !self.aborted {
      self.slots.insert(id, Slot::Running);
    }
  }

  pub(crate) fn dispatch(&mut self, id: WorkerId, ticket: Ticket) {
    self.slots.insert(id, Slot::Dispatched(ticket));
  }

  pub(crate) fn park(&mut self, worker: Worker) {
    self.slots.insert(worker.id, Slot::Parked(worker));
  }

  pub(crate) fn escalate(&mut self, id: WorkerId) {
    self.slots.insert(id, Slot::Escalated);
  }

  pub(crate) fn retire(&mut self, id: WorkerId, outcome: LineageOutcome) {
    if self.slots.remove(&id).is_some() {
      event!(Level::TRACE, worker = id, ?outcome, live = self.slots.len(), "Worker retired.");
    }
  }

  fn parked_ids(&self) -> Vec<WorkerId> {
    self
      .slots
      .iter()
      .filter(|(_, slot)| matches!(slot, Slot::Parked(_)))
      .map(|(id, _)| *id)
      .collect()
  }

  /// Moves every parked worker back to `Running` and hands it out to resume.
  pub(crate) fn wake_parked(&mut self) -> Vec<Worker> {
    self
      .parked_ids()
      .into_iter()
      .filter_map(|id| match self.slots.insert(id, Slot::Running) {
        Some(Slot::Parked(worker)) => Some(worker),
        _ => None,
      })
      .collect()
  }

  /// Removes every parked worker; their lineages are complete.
  pub(crate) fn take_parked(&mut self) -> Vec<Worker> {
    let workers: Vec<Worker> = self
      .parked_ids()
      .into_iter()
      .filter_map(|id| match self.slots.remove(&id) {
        Some(Slot::Parked(worker)) => Some(worker),
        _ => None,
      })
      .collect();
    for worker in &workers {
      event!(Level::TRACE, worker = worker.id, outcome = ?LineageOutcome::Completed, "Worker retired.");
    }
    workers
  }

  /// Marks the pipeline aborted and cancels every slot. Dispatched steps lose
  /// their ticket race; parked workers are returned so the caller can drop
  /// their values outside the registry lock.
  pub(crate) fn cancel_all(&mut self) -> Vec<Worker> {
    self.aborted = true;
    self.pending_roots = 0;
    let mut parked = Vec::new();
    for (_, slot) in std::mem::take(&mut self.slots) {
      match slot {
        Slot::Dispatched(ticket) => {
          ticket.try_resolve();
        }
        Slot::Parked(worker) => parked.push(worker),
        Slot::Running | Slot::Escalated => {}
      }
    }
    parked
  }

  pub(crate) fn settle(&self) -> Settle {
    if self.aborted {
      return Settle::Aborted;
    }
    let mut escalated = false;
    for slot in self.slots.values() {
      match slot {
        Slot::Running | Slot::Dispatched(_) => return Settle::Busy,
        Slot::Escalated => escalated = true,
        Slot::Parked(_) => {}
      }
    }
    if self.pending_roots > 0 {
      Settle::Busy
    } else if escalated {
      Settle::Escalated
    } else {
      Settle::Idle
    }
  }
}
