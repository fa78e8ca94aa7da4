// tests/scheduler_tests.rs
mod common;

use common::*;
use serial_test::serial;
use skein::{Dispatcher, Job, TaskScheduler};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::thread;

/// Runs every job on a fresh named thread and counts spawns.
struct ThreadPerJob {
  spawned: Arc<AtomicUsize>,
}

impl TaskScheduler for ThreadPerJob {
  fn spawn(&self, job: Job) {
    bump(&self.spawned);
    thread::Builder::new()
      .name("thread-per-job".to_string())
      .spawn(job)
      .expect("spawn test thread");
  }
}

#[test]
#[serial]
fn test_custom_scheduler_runs_parallel_steps() {
  setup_tracing();
  let spawned = counter();
  let dispatcher = Dispatcher::with_scheduler(
    test_config(),
    Arc::new(ThreadPerJob {
      spawned: spawned.clone(),
    }),
  );

  let (value, name) = dispatcher
    .run_async(|| Ok(20))
    .then(|x: i32| Ok(x + 1))
    .then_async(|x: i32| Ok((x * 2, thread::current().name().map(String::from))))
    .wait()
    .unwrap();

  assert_eq!(value, 42);
  assert_eq!(name.as_deref(), Some("thread-per-job"));
  // Serial steps never reach the scheduler.
  assert_eq!(count(&spawned), 2);
}

#[test]
#[serial]
fn test_serial_steps_run_on_the_waiting_thread() {
  setup_tracing();
  let dispatcher = dispatcher();
  let caller = thread::current().id();

  let ran_on = dispatcher
    .run_async(|| Ok(()))
    .then(|_: ()| Ok(thread::current().id()))
    .wait()
    .unwrap();
  assert_eq!(ran_on, caller);
}

#[cfg(feature = "tokio")]
#[test]
#[serial]
fn test_tokio_scheduler_runs_parallel_steps() {
  use skein::TokioScheduler;

  setup_tracing();
  // Parallel steps go to the blocking pool, which runs without `block_on`.
  let runtime = tokio::runtime::Builder::new_current_thread()
    .thread_name("skein-tokio")
    .build()
    .unwrap();
  let dispatcher = Dispatcher::with_scheduler(test_config(), Arc::new(TokioScheduler::new(runtime.handle().clone())));

  let total = dispatcher
    .run_async(|| Ok(vec![1, 2, 3, 4]))
    .then_branch(|v: Vec<i32>| Ok(v))
    .then_async(|x: i32| Ok(x * x))
    .then_merge_async(|squares: Vec<i32>| Ok(squares.iter().sum::<i32>()))
    .wait();
  assert_eq!(total.unwrap(), 30);
}
