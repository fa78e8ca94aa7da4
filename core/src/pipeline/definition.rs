// skein/src/pipeline/definition.rs

//! Contains the `Program`, the ordered step list shared by every lineage of one
//! pipeline.

use crate::core::step::StepDescriptor;
use parking_lot::RwLock;
use std::sync::Arc;

/// Append-only sequence of step descriptors.
///
/// Entries are never removed, reordered, or replaced, so a worker holding an
/// index can always read the same step back. Appends may happen while workers
/// are reading; the orchestrator pairs every append with waking the workers
/// parked at the old tail.
#[derive(Debug, Default)]
pub(crate) struct Program {
  steps: RwLock<Vec<Arc<StepDescriptor>>>,
}

impl Program {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Appends a step and returns its index.
  pub(crate) fn append(&self, step: StepDescriptor) -> usize {
    let mut steps = self.steps.write();
    steps.push(Arc::new(step));
    steps.len() - 1
  }

  pub(crate) fn get(&self, index: usize) -> Option<Arc<StepDescriptor>> {
    self.steps.read().get(index).cloned()
  }

  pub(crate) fn len(&self) -> usize {
    self.steps.read().len()
  }
}
