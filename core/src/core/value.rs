// skein/src/core/value.rs

//! The opaque value slot carried between stages.
//!
//! Stage values are only ever forwarded, never inspected, so they travel as
//! `Box<dyn Any + Send>` and are downcast back to the handle's type at the
//! typed boundary (`Operation<T>` and the transform wrappers in `step.rs`).

use crate::error::{SkeinError, SkeinResult};
use std::any::Any;

pub(crate) type Value = Box<dyn Any + Send>;

pub(crate) fn boxed<T: Send + 'static>(value: T) -> Value {
  Box::new(value)
}

pub(crate) fn downcast_value<T: 'static>(value: Value) -> SkeinResult<T> {
  match value.downcast::<T>() {
    Ok(typed) => Ok(*typed),
    // A mismatch means an internal wiring bug: typed handles only ever attach
    // transforms whose input matches the previous stage's output.
    Err(_) => Err(SkeinError::TypeMismatch {
      expected_type: std::any::type_name::<T>().to_string(),
    }),
  }
}
