// tests/cancellation_tests.rs
mod common;

use common::*;
use serial_test::serial;
use skein::SkeinError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
#[serial]
fn test_abort_before_parallel_step_completes_stops_continuation() {
  setup_tracing();
  let dispatcher = dispatcher();
  let continued = counter();

  let c = continued.clone();
  let op = dispatcher
    .run_async(|| {
      thread::sleep(Duration::from_millis(80));
      Ok(1)
    })
    .then(move |x: i32| {
      bump(&c);
      Ok(x + 1)
    });

  op.abort();
  assert!(op.is_aborted());

  // Give the pool step time to finish; its result must be discarded.
  thread::sleep(Duration::from_millis(160));
  assert_eq!(dispatcher.pump().unwrap(), 0);
  assert_eq!(count(&continued), 0);
  assert_eq!(op.live_workers(), 0);
  assert!(matches!(op.wait(), Err(SkeinError::Aborted)));
}

#[test]
#[serial]
fn test_abort_after_completion_is_harmless() {
  setup_tracing();
  let dispatcher = dispatcher();
  let ran = counter();

  let r = ran.clone();
  let op = dispatcher.run(move || {
    bump(&r);
    Ok("done")
  });
  dispatcher.pump().unwrap();
  assert_eq!(count(&ran), 1);

  op.abort();
  op.abort();
  assert!(op.is_aborted());
  assert_eq!(dispatcher.pump().unwrap(), 0);
  assert_eq!(count(&ran), 1);
}

#[test]
#[serial]
fn test_queued_serial_step_is_skipped_after_abort() {
  setup_tracing();
  let dispatcher = dispatcher();
  let ran = counter();

  let r = ran.clone();
  let op = dispatcher.run(move || {
    bump(&r);
    Ok(1)
  });
  assert_eq!(dispatcher.pending_serial(), 1);

  op.abort();
  // The job is still drained, but finds its ticket claimed and does nothing.
  assert_eq!(dispatcher.pump().unwrap(), 1);
  assert_eq!(count(&ran), 0);
}

#[test]
#[serial]
fn test_cancellation_token_observes_abort() {
  setup_tracing();
  let dispatcher = dispatcher();
  let started = Arc::new(AtomicBool::new(false));
  let observed = Arc::new(AtomicBool::new(false));

  let s = started.clone();
  let o = observed.clone();
  let op = dispatcher.resolved(()).then_async_cancellable(move |_: (), token| {
    s.store(true, Ordering::SeqCst);
    for _ in 0..400 {
      if token.is_cancelled() {
        o.store(true, Ordering::SeqCst);
        return Ok(false);
      }
      thread::sleep(Duration::from_millis(5));
    }
    Ok(true)
  });

  assert!(pump_until(&dispatcher, Duration::from_secs(2), || started.load(Ordering::SeqCst)));
  op.abort();
  assert!(pump_until(&dispatcher, Duration::from_secs(2), || observed.load(Ordering::SeqCst)));
  assert!(matches!(op.wait(), Err(SkeinError::Aborted)));
}

#[test]
#[serial]
fn test_append_after_abort_never_runs() {
  setup_tracing();
  let dispatcher = dispatcher();
  let ran = counter();

  let first = dispatcher.resolved(1);
  first.abort();

  let r = ran.clone();
  let next = first.then(move |x: i32| {
    bump(&r);
    Ok(x + 1)
  });
  assert!(matches!(next.wait(), Err(SkeinError::Aborted)));
  assert_eq!(count(&ran), 0);
}

#[test]
#[serial]
fn test_abort_cancels_every_sibling() {
  setup_tracing();
  let dispatcher = dispatcher();
  let finished = counter();

  let f = finished.clone();
  let op = dispatcher
    .run(|| Ok(vec![50u64, 50, 50, 50]))
    .then_branch(|delays: Vec<u64>| Ok(delays))
    .then_async(|ms: u64| {
      thread::sleep(Duration::from_millis(ms));
      Ok(ms)
    })
    .then(move |ms: u64| {
      bump(&f);
      Ok(ms)
    });

  // Run the root and the branch so the siblings are in flight on the pool.
  dispatcher.pump().unwrap();
  assert_eq!(op.live_workers(), 4);
  op.abort();
  assert_eq!(op.live_workers(), 0);

  thread::sleep(Duration::from_millis(120));
  dispatcher.pump().unwrap();
  assert_eq!(count(&finished), 0);
}

#[test]
#[serial]
fn test_shutdown_aborts_live_pipelines_and_clears_queue() {
  setup_tracing();
  let dispatcher = dispatcher();
  let ran = counter();

  let r = ran.clone();
  let op = dispatcher.run(move || {
    bump(&r);
    Ok(1)
  });
  let (_deferred, pending) = dispatcher.deferred::<i32>();
  assert_eq!(dispatcher.pending_serial(), 1);

  dispatcher.shutdown();
  assert_eq!(dispatcher.pending_serial(), 0);
  assert!(op.is_aborted());
  assert!(pending.is_aborted());
  assert_eq!(count(&ran), 0);

  // The dispatcher itself stays usable.
  assert_eq!(dispatcher.run(|| Ok(9)).wait().unwrap(), 9);
}
