// skein/src/pipeline/mod.rs

pub(crate) mod catch;
pub(crate) mod definition;
pub(crate) mod execution;
pub mod merge;

pub use merge::MergeOrganizer;
