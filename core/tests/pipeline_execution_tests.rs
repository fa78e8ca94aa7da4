// tests/pipeline_execution_tests.rs
mod common; // Reference the common module

use common::*;
use parking_lot::Mutex;
use serial_test::serial;
use skein::{DispatcherConfig, Dispatcher, SkeinError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
#[serial]
fn test_serial_chain_produces_value() {
  setup_tracing();
  let dispatcher = dispatcher();
  let result = dispatcher.run(|| Ok(1)).then(|x: i32| Ok(x + 1)).wait();
  assert_eq!(result.unwrap(), 2);
}

#[test]
#[serial]
fn test_steps_run_once_each_in_order() {
  setup_tracing();
  let dispatcher = dispatcher();
  let visits = Arc::new(Mutex::new(Vec::new()));

  let v1 = visits.clone();
  let v2 = visits.clone();
  let v3 = visits.clone();
  let v4 = visits.clone();
  let result = dispatcher
    .run(move || {
      v1.lock().push("root");
      Ok(String::from("a"))
    })
    .then(move |s: String| {
      v2.lock().push("serial");
      Ok(s + "b")
    })
    .then_async(move |s: String| {
      v3.lock().push("parallel");
      Ok(s + "c")
    })
    .then(move |s: String| {
      v4.lock().push("serial_again");
      Ok(s.len())
    })
    .wait();

  assert_eq!(result.unwrap(), 3);
  assert_eq!(*visits.lock(), vec!["root", "serial", "parallel", "serial_again"]);
}

#[test]
#[serial]
fn test_run_async_root_runs_on_pool() {
  setup_tracing();
  let dispatcher = dispatcher();
  let result = dispatcher
    .run_async(|| Ok(thread::current().name().map(String::from)))
    .wait()
    .unwrap();
  let name = result.expect("pool threads are named");
  assert!(name.starts_with("skein-test-"), "unexpected thread name {}", name);
}

#[test]
#[serial]
fn test_serial_steps_wait_for_pump() {
  setup_tracing();
  let dispatcher = dispatcher();
  let ran = counter();

  let r1 = ran.clone();
  let r2 = ran.clone();
  let op = dispatcher
    .run(move || {
      bump(&r1);
      Ok(10)
    })
    .then(move |x: i32| {
      bump(&r2);
      Ok(x * 2)
    });

  // Nothing runs until the queue is pumped.
  assert_eq!(dispatcher.pending_serial(), 1);
  assert_eq!(count(&ran), 0);

  // Jobs queued while draining are drained in the same pump.
  assert_eq!(dispatcher.pump().unwrap(), 2);
  assert_eq!(count(&ran), 2);
  assert_eq!(dispatcher.pending_serial(), 0);
  assert_eq!(op.wait().unwrap(), 20);
}

#[test]
#[serial]
fn test_pump_respects_max_serial_per_pump() {
  setup_tracing();
  let config = DispatcherConfig::default()
    .with_pool_threads(2)
    .with_max_serial_per_pump(1);
  let dispatcher = Dispatcher::new(config).unwrap();

  let op = dispatcher.run(|| Ok(1)).then(|x: i32| Ok(x + 1)).then(|x: i32| Ok(x + 1));

  assert_eq!(dispatcher.pump().unwrap(), 1);
  assert_eq!(dispatcher.pending_serial(), 1);
  assert_eq!(dispatcher.pump().unwrap(), 1);
  assert_eq!(dispatcher.pump().unwrap(), 1);
  assert_eq!(dispatcher.pump().unwrap(), 0);
  assert_eq!(op.wait().unwrap(), 3);
}

#[test]
#[serial]
fn test_pipeline_extended_after_first_stage_completed() {
  setup_tracing();
  let dispatcher = dispatcher();
  let first = dispatcher.run(|| Ok(5));

  dispatcher.pump().unwrap();
  // The root lineage is parked at the tail, waiting for more steps.
  assert_eq!(first.live_workers(), 1);

  let second = first.then(|x: i32| Ok(x * 3));
  let third = second.then_async(|x: i32| Ok(x - 1));
  assert_eq!(third.wait().unwrap(), 14);
}

#[test]
#[serial]
fn test_resolved_source() {
  setup_tracing();
  let dispatcher = dispatcher();
  let op = dispatcher.resolved(String::from("skein"));
  assert_eq!(op.position(), 0);
  let len = op.then(|s: String| Ok(s.len()));
  assert_eq!(len.position(), 1);
  assert_eq!(len.wait().unwrap(), 5);
}

#[test]
#[serial]
fn test_deferred_resolved_from_another_thread() {
  setup_tracing();
  let dispatcher = dispatcher();
  let (deferred, op) = dispatcher.deferred::<u32>();
  let doubled = op.then(|x: u32| Ok(x * 2));

  let producer = thread::spawn(move || {
    thread::sleep(Duration::from_millis(30));
    deferred.resolve(21).unwrap();
  });

  assert_eq!(doubled.wait().unwrap(), 42);
  producer.join().unwrap();
}

#[test]
#[serial]
fn test_deferred_second_resolution_is_rejected() {
  setup_tracing();
  let dispatcher = dispatcher();
  let (deferred, op) = dispatcher.deferred::<i32>();

  assert!(!deferred.is_resolved());
  deferred.resolve(1).unwrap();
  assert!(deferred.is_resolved());

  let second = deferred.resolve(2);
  assert!(matches!(second, Err(SkeinError::AlreadyResolved)));
  let rejected = deferred.reject(InvalidOperation("late".to_string()));
  assert!(matches!(rejected, Err(SkeinError::AlreadyResolved)));
  assert!(SkeinError::AlreadyResolved.is_contract_violation());

  // The second resolution had no effect: exactly one value, the first one.
  assert_eq!(op.wait_all().unwrap(), vec![1]);
}

#[test]
#[serial]
fn test_dropped_deferred_rejects_pipeline() {
  setup_tracing();
  let dispatcher = dispatcher();
  let (deferred, op) = dispatcher.deferred::<i32>();
  let clone = deferred.clone();
  drop(deferred);
  // One clone is still alive; nothing happened yet.
  assert_eq!(dispatcher.pending_serial(), 0);
  drop(clone);

  match op.then(|x: i32| Ok(x + 1)).wait() {
    Err(SkeinError::Unhandled(failure)) => {
      assert!(matches!(failure.downcast_ref::<SkeinError>(), Some(SkeinError::Abandoned)));
    }
    other => panic!("Expected an unhandled Abandoned failure, got {:?}", other),
  }
}

#[test]
#[serial]
#[should_panic(expected = "already continued")]
fn test_continuing_a_handle_twice_panics() {
  setup_tracing();
  let dispatcher = dispatcher();
  let op = dispatcher.run(|| Ok(1));
  let _first = op.then(|x: i32| Ok(x + 1));
  let _second = op.then(|x: i32| Ok(x + 2));
}

#[test]
#[serial]
#[should_panic(expected = "already continued")]
fn test_waiting_on_a_continued_handle_panics() {
  setup_tracing();
  let dispatcher = dispatcher();
  let op = dispatcher.run(|| Ok(1));
  let _next = op.then(|x: i32| Ok(x + 1));
  let _ = op.wait();
}

#[test]
#[serial]
fn test_wait_requires_exactly_one_value() {
  setup_tracing();
  let dispatcher = dispatcher();

  let many = dispatcher.run(|| Ok(vec![1, 2, 3])).then_branch(|v: Vec<i32>| Ok(v));
  match many.wait() {
    Err(SkeinError::AmbiguousValue { count }) => assert_eq!(count, 3),
    other => panic!("Expected AmbiguousValue, got {:?}", other),
  }

  let mut all = dispatcher
    .run(|| Ok(vec![1, 2, 3]))
    .then_branch(|v: Vec<i32>| Ok(v))
    .then(|x: i32| Ok(x * 10))
    .wait_all()
    .unwrap();
  all.sort();
  assert_eq!(all, vec![10, 20, 30]);

  let none = dispatcher.run(|| Ok(Vec::<i32>::new())).then_branch(|v: Vec<i32>| Ok(v));
  assert!(matches!(none.wait(), Err(SkeinError::NoValue)));
}

#[test]
#[serial]
fn test_wait_inside_serial_step_pumps_reentrantly() {
  setup_tracing();
  let dispatcher = dispatcher();
  let inner_dispatcher = dispatcher.clone();

  let result = dispatcher
    .run(|| Ok(2))
    .then(move |x: i32| {
      // A serial step blocking on another pipeline keeps the cooperative
      // queue moving from inside its own job.
      let inner = inner_dispatcher.run(move || Ok(x * 100)).then(|y: i32| Ok(y + 1));
      Ok(inner.wait()?)
    })
    .wait();
  assert_eq!(result.unwrap(), 201);
}

#[test]
#[serial]
fn test_independent_pipelines_share_one_dispatcher() {
  setup_tracing();
  let dispatcher = dispatcher();
  let a = dispatcher.run(|| Ok(1)).then_async(|x: i32| Ok(x + 1));
  let b = dispatcher.run_async(|| Ok("b")).then(|s: &'static str| Ok(s.to_uppercase()));
  assert!(dispatcher.live_pipelines() >= 2);

  assert_eq!(b.wait().unwrap(), "B");
  assert_eq!(a.wait().unwrap(), 2);
}

/// Waits on `wait` from a helper thread so a lost wake-up fails the test
/// instead of hanging it.
fn wait_with_timeout<T: Send + 'static>(op: skein::Operation<T>, timeout: Duration) -> Option<skein::SkeinResult<T>> {
  let (tx, rx) = std::sync::mpsc::channel();
  thread::spawn(move || {
    let _ = tx.send(op.wait());
  });
  rx.recv_timeout(timeout).ok()
}

#[test]
#[serial]
fn test_append_racing_a_parking_worker_never_loses_the_wakeup() {
  setup_tracing();
  let dispatcher = dispatcher();

  for i in 0..200u64 {
    let root = dispatcher.run_async(move || Ok(i));
    // Lands the append before, during or after the root parks at the tail.
    thread::sleep(Duration::from_micros((i % 7) * 20));
    let next = if i % 2 == 0 {
      root.then_async(|x: u64| Ok(x + 1))
    } else {
      root.then(|x: u64| Ok(x + 1))
    };
    match wait_with_timeout(next, Duration::from_secs(5)) {
      Some(result) => assert_eq!(result.unwrap(), i + 1),
      None => panic!("Expected iteration {} to settle, but wait never returned", i),
    }
  }
}

#[test]
#[serial]
fn test_merge_appended_while_siblings_park() {
  setup_tracing();
  let dispatcher = dispatcher();

  for i in 0..50u64 {
    let siblings = dispatcher
      .run_async(move || Ok(vec![i, i + 1, i + 2]))
      .then_branch_async(|values: Vec<u64>| Ok(values));
    thread::sleep(Duration::from_micros((i % 5) * 30));
    let total = siblings.then_merge(|values: Vec<u64>| Ok(values.iter().sum::<u64>()));
    match wait_with_timeout(total, Duration::from_secs(5)) {
      Some(result) => assert_eq!(result.unwrap(), 3 * i + 3),
      None => panic!("Expected iteration {} to settle, but wait never returned", i),
    }
  }
}
