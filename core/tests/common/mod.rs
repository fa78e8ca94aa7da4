// tests/common/mod.rs
#![allow(dead_code)] // Allow unused code in this common test module

use skein::{Dispatcher, DispatcherConfig};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::thread;
use std::time::{Duration, Instant};
use tracing::Level;

// --- Common Error Types for Tests ---
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("Invalid operation: {0}")]
pub struct InvalidOperation(pub String);

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("Bad argument: {0}")]
pub struct ArgumentError(pub String);

/// A more specific error that carries the general `ArgumentError` as its source.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("Out of range: {detail}")]
pub struct OutOfRange {
  pub detail: String,
  #[source]
  pub base: ArgumentError,
}

impl OutOfRange {
  pub fn new(detail: &str) -> Self {
    Self {
      detail: detail.to_string(),
      base: ArgumentError(format!("argument {} rejected", detail)),
    }
  }
}

// --- Dispatcher helpers ---
pub fn test_config() -> DispatcherConfig {
  DispatcherConfig::default()
    .with_pool_threads(4)
    .with_thread_name_prefix("skein-test")
}

pub fn dispatcher() -> Dispatcher {
  Dispatcher::new(test_config()).expect("test dispatcher should build")
}

/// Pumps until `done` holds or the timeout elapses. Returns whether `done` held.
pub fn pump_until(dispatcher: &Dispatcher, timeout: Duration, done: impl Fn() -> bool) -> bool {
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    dispatcher.pump().expect("pump should not surface failures here");
    if done() {
      return true;
    }
    thread::sleep(Duration::from_millis(2));
  }
  done()
}

// --- Helper for Tracing Setup (call once per test run if needed) ---
use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer() // Important for tests to capture output
    .try_init()
    .ok(); // Allow multiple initializations in tests (ok if fails)
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

// --- Atomic counters for checking execution counts ---
pub fn counter() -> Arc<AtomicUsize> {
  Arc::new(AtomicUsize::new(0))
}

pub fn bump(counter: &Arc<AtomicUsize>) -> usize {
  counter.fetch_add(1, Ordering::SeqCst) + 1
}

pub fn count(counter: &Arc<AtomicUsize>) -> usize {
  counter.load(Ordering::SeqCst)
}
