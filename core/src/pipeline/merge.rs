// skein/src/pipeline/merge.rs

//! Defines `MergeOrganizer`, the fan-in point shared by the siblings a Branch
//! spawned.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{event, Level};

#[derive(Debug)]
struct Collected<V> {
  values: Vec<V>,
  count: usize,
}

/// Collects one contribution per sibling of a fixed-size group and releases
/// the aggregate exactly once, when the group is full.
///
/// Contributions are kept in arrival order; nothing maps them back to the
/// branch position that produced them.
#[derive(Debug)]
pub struct MergeOrganizer<V> {
  expected: usize,
  collected: Mutex<Collected<V>>,
  released: AtomicBool,
}

impl<V> MergeOrganizer<V> {
  /// An organizer expecting `expected` contributions. With `expected == 0` it
  /// is complete from the start and releases an empty aggregate.
  pub fn new(expected: usize) -> Self {
    Self {
      expected,
      collected: Mutex::new(Collected {
        values: Vec::with_capacity(expected),
        count: 0,
      }),
      released: AtomicBool::new(false),
    }
  }

  pub fn expected_count(&self) -> usize {
    self.expected
  }

  pub fn collected_count(&self) -> usize {
    self.collected.lock().count
  }

  /// Records a contribution. Returns `true` for exactly the contribution that
  /// fills the group; every other call, including any past the expected count,
  /// returns `false`.
  pub fn merge(&self, value: V) -> bool {
    let mut collected = self.collected.lock();
    if collected.count >= self.expected {
      event!(
        Level::ERROR,
        expected = self.expected,
        "Contribution arrived after the merge group was already full; dropping it."
      );
      return false;
    }
    collected.values.push(value);
    collected.count += 1;
    collected.count == self.expected
  }

  pub fn is_complete(&self) -> bool {
    self.collected.lock().count >= self.expected
  }

  /// Takes the aggregate. `Some` exactly once, and only after completion.
  pub fn take_result(&self) -> Option<Vec<V>> {
    let mut collected = self.collected.lock();
    if collected.count < self.expected {
      return None;
    }
    if self
      .released
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      return None;
    }
    Some(std::mem::take(&mut collected.values))
  }
}
