// src/lib.rs

//! Skein: an in-process task orchestration engine.
//!
//! Skein lets you build multi-stage pipelines that mix:
//!  - Serial steps, run one at a time on a host thread that pumps the
//!    dispatcher's cooperative queue.
//!  - Parallel steps, run on a worker pool.
//!  - Branch and merge steps that fan a value out into sibling lineages and
//!    gather them back.
//!  - Typed error recovery, at a stage (`catch`) or pipeline-wide (`on_error`).
//!  - Cooperative cancellation of a whole pipeline (`abort`).
//!
//! Pipelines may be extended while their first stages are already running;
//! lineages that run out of steps park until the next step is appended.

pub mod core;
pub mod error;
pub mod operation;
pub(crate) mod orchestrator;
pub mod pipeline;
pub(crate) mod registry;
pub mod runtime;

// --- Re-exports for the Public API ---

pub use crate::core::cancel::CancellationToken;
pub use crate::core::control::{Lane, LineageOutcome, StepKind};

pub use crate::operation::{Deferred, Operation};
pub use crate::pipeline::merge::MergeOrganizer;

pub use crate::runtime::config::DispatcherConfig;
#[cfg(feature = "tokio")]
pub use crate::runtime::scheduler::TokioScheduler;
pub use crate::runtime::scheduler::{Job, RayonScheduler, TaskScheduler};
pub use crate::runtime::Dispatcher;

pub use crate::error::{SkeinError, SkeinResult, UnhandledFailure};

/*
    Core Workflow:
    1. Create a `Dispatcher` (one per process is typical) from a `DispatcherConfig`.
    2. Start a pipeline with `dispatcher.run(..)`, `run_async(..)`, `resolved(..)`
       or `deferred()`.
    3. Chain `.then(..)`, `.then_async(..)`, `.then_branch(..)`, `.then_merge(..)`.
       Each call consumes the handle's one continuation and returns the next handle.
    4. Attach `.catch::<E, _>(..)` to substitute a value for a failed stage, or
       `.on_error::<E, _>(..)` to observe failures pipeline-wide.
    5. Either call `.wait()` on the last handle (serial steps run inline), or let
       the host loop call `dispatcher.pump()` periodically.
*/
