// skein/src/pipeline/execution.rs

//! Contains the `Worker`, the state machine that walks one lineage of a pipeline
//! through the shared program.
//!
//! A worker never blocks. It reads the step at its cursor, dispatches the step
//! to the cooperative queue or the pool, and is moved into the dispatched job.
//! When the job completes it advances the cursor and resumes. When the cursor
//! reaches the tail of the program the worker parks in the registry until an
//! append wakes it.

use crate::core::cancel::{CancellationToken, Ticket};
use crate::core::control::LineageOutcome;
use crate::core::guard::run_guarded;
use crate::core::step::{Payload, StepDescriptor, StepOutput};
use crate::core::value::Value;
use crate::error::SkeinError;
use crate::orchestrator::Orchestrator;
use crate::pipeline::merge::MergeOrganizer;
use crate::runtime::scheduler::Job;
use std::sync::Arc;
use tracing::{event, Level};

pub(crate) type WorkerId = u64;

pub(crate) struct Worker {
  pub(crate) id: WorkerId,
  /// Index of the next step to run. Equals the position of the stage whose
  /// value `input` holds.
  pub(crate) cursor: usize,
  /// `None` only for a vacant lineage: the placeholder a zero-element Branch
  /// leaves behind so the matching Merge still fires.
  pub(crate) input: Option<Value>,
  /// Innermost open Branch last.
  pub(crate) organizers: Vec<Arc<MergeOrganizer<Value>>>,
  /// Branches a vacant worker has skipped into without a matching Merge yet.
  pub(crate) skip_depth: usize,
}

impl Worker {
  pub(crate) fn new(id: WorkerId, cursor: usize, input: Option<Value>) -> Self {
    Self {
      id,
      cursor,
      input,
      organizers: Vec::new(),
      skip_depth: 0,
    }
  }

  /// Runs inline work (vacant skipping, merge contributions) until the worker
  /// dispatches a step, folds into a merge, parks, or finds the pipeline
  /// aborted.
  pub(crate) fn resume(self, orchestrator: &Arc<Orchestrator>) {
    let mut worker = self;
    loop {
      let Some((mut current, step)) = orchestrator.next_step(worker) else {
        return;
      };
      let kind = step.kind();
      match current.input.take() {
        None => {
          if kind.is_branch() {
            current.skip_depth += 1;
          } else if kind.is_merge() {
            if current.skip_depth == 0 {
              let gathered = current
                .organizers
                .pop()
                .and_then(|organizer| organizer.take_result())
                .unwrap_or_default();
              event!(
                Level::DEBUG,
                worker = current.id,
                position = current.cursor,
                "Vacant lineage reached its merge; firing with an empty aggregate."
              );
              return current.dispatch(orchestrator, step, Payload::Gathered(gathered));
            }
            current.skip_depth -= 1;
          }
          current.cursor += 1;
          worker = current;
        }
        Some(value) if kind.is_merge() => return current.fold(orchestrator, step, value),
        Some(value) => return current.dispatch(orchestrator, step, Payload::One(value)),
      }
    }
  }

  /// Contributes `value` to the innermost open organizer. The contribution
  /// that fills it carries the aggregate into the merge transform; every
  /// other contributor's lineage ends here.
  fn fold(mut self, orchestrator: &Arc<Orchestrator>, step: Arc<StepDescriptor>, value: Value) {
    // A Merge with no preceding Branch is a group of one.
    let organizer = self
      .organizers
      .pop()
      .unwrap_or_else(|| Arc::new(MergeOrganizer::new(1)));

    if !organizer.merge(value) {
      event!(
        Level::TRACE,
        worker = self.id,
        position = self.cursor,
        collected = organizer.collected_count(),
        expected = organizer.expected_count(),
        "Contribution recorded; lineage folds into its merge."
      );
      orchestrator.retire(self.id, LineageOutcome::Folded);
      return;
    }

    match organizer.take_result() {
      Some(gathered) => self.dispatch(orchestrator, step, Payload::Gathered(gathered)),
      None => {
        let origin = self.cursor + 1;
        orchestrator.throw_exception(
          self,
          origin,
          SkeinError::Internal("merge aggregate was already released".to_string()).into(),
        );
      }
    }
  }

  fn dispatch(self, orchestrator: &Arc<Orchestrator>, step: Arc<StepDescriptor>, payload: Payload) {
    let ticket = Ticket::new();
    if !orchestrator.mark_dispatched(self.id, &ticket) {
      return;
    }
    let lane = step.lane();
    event!(
      Level::TRACE,
      worker = self.id,
      position = self.cursor,
      kind = %step.kind(),
      ?lane,
      "Step dispatched."
    );
    let owner = Arc::clone(orchestrator);
    let job: Job = Box::new(move || self.execute(&owner, &step, payload, ticket));
    orchestrator.dispatcher().submit(lane, job);
  }

  fn execute(mut self, orchestrator: &Arc<Orchestrator>, step: &StepDescriptor, payload: Payload, ticket: Ticket) {
    if ticket.is_resolved() {
      event!(Level::TRACE, worker = self.id, position = self.cursor, "Step cancelled before it started.");
      return;
    }

    let token = CancellationToken::new(ticket.clone());
    let outcome = run_guarded("step", || step.invoke(payload, &token));

    if !ticket.try_resolve() {
      event!(
        Level::DEBUG,
        worker = self.id,
        position = self.cursor,
        "Step finished after its pipeline was aborted; result discarded."
      );
      return;
    }

    self.cursor += 1;
    match outcome {
      Ok(StepOutput::One(value)) => {
        self.input = Some(value);
        self.resume(orchestrator);
      }
      Ok(StepOutput::Fanned(elements)) => self.branch(orchestrator, elements),
      Err(error) => {
        let origin = self.cursor;
        orchestrator.throw_exception(self, origin, error);
      }
    }
  }

  /// Replaces this worker with one sibling per element, all sharing a fresh
  /// organizer sized to the element count.
  fn branch(mut self, orchestrator: &Arc<Orchestrator>, elements: Vec<Value>) {
    let organizer = Arc::new(MergeOrganizer::new(elements.len()));
    event!(
      Level::DEBUG,
      worker = self.id,
      position = self.cursor,
      siblings = elements.len(),
      "Branch fanned out."
    );

    if elements.is_empty() {
      self.organizers.push(organizer);
      self.input = None;
      self.resume(orchestrator);
      return;
    }

    let siblings: Vec<Worker> = elements
      .into_iter()
      .map(|element| {
        let mut organizers = self.organizers.clone();
        organizers.push(Arc::clone(&organizer));
        Worker {
          id: orchestrator.next_worker_id(),
          cursor: self.cursor,
          input: Some(element),
          organizers,
          skip_depth: 0,
        }
      })
      .collect();

    orchestrator.hand_off(self.id, &siblings);
    for sibling in siblings {
      sibling.resume(orchestrator);
    }
  }
}
