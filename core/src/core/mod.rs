// skein/src/core/mod.rs

pub mod cancel;
pub mod control;
pub(crate) mod guard;
pub(crate) mod step;
pub(crate) mod value;

// Re-export key types for easier access from other skein modules (and lib.rs)
pub use cancel::CancellationToken;
pub use control::{Lane, LineageOutcome, StepKind};
