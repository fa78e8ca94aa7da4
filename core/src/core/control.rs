// skein/src/core/control.rs

//! Defines the shape of pipeline steps, where they run, and how a lineage ends.

use std::fmt;

/// The six kinds of pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
  /// One value in, one value out, on the cooperative queue.
  Serial,
  /// One value in, one value out, on the thread pool.
  Parallel,
  /// One value in, a sequence out; each element continues as its own lineage.
  Branch,
  /// `Branch`, with the fan-out transform run on the thread pool.
  BranchParallel,
  /// The collected values of a sibling group in, one value out.
  Merge,
  /// `Merge`, with the fan-in transform run on the thread pool.
  MergeParallel,
}

impl StepKind {
  pub fn lane(self) -> Lane {
    match self {
      StepKind::Serial | StepKind::Branch | StepKind::Merge => Lane::Cooperative,
      StepKind::Parallel | StepKind::BranchParallel | StepKind::MergeParallel => Lane::Pool,
    }
  }

  pub fn is_branch(self) -> bool {
    matches!(self, StepKind::Branch | StepKind::BranchParallel)
  }

  pub fn is_merge(self) -> bool {
    matches!(self, StepKind::Merge | StepKind::MergeParallel)
  }

  /// Branch and Merge steps change how many lineages carry the pipeline.
  pub fn reshapes_lineage(self) -> bool {
    self.is_branch() || self.is_merge()
  }
}

impl fmt::Display for StepKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      StepKind::Serial => "serial",
      StepKind::Parallel => "parallel",
      StepKind::Branch => "branch",
      StepKind::BranchParallel => "branch_parallel",
      StepKind::Merge => "merge",
      StepKind::MergeParallel => "merge_parallel",
    };
    f.write_str(name)
  }
}

/// Execution context a step's transform is handed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
  /// The single-consumer queue drained by `Dispatcher::pump` or by `wait`.
  Cooperative,
  /// The dispatcher's `TaskScheduler`.
  Pool,
}

/// Why a worker left the live registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineageOutcome {
  /// Its value was consumed by `wait`.
  Completed,
  /// Handed execution to the siblings it spawned at a Branch.
  Branched,
  /// Contributed to a merge that another sibling completed.
  Folded,
  /// Failed; a pipeline-wide handler observed the failure.
  Failed,
  /// Cancelled by `abort`, shutdown, or an unhandled failure.
  Aborted,
}
