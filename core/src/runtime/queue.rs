// skein/src/runtime/queue.rs

//! The cooperative lane: a FIFO of serial jobs that only runs when a host
//! thread pumps it.

use super::scheduler::Job;
use parking_lot::{Condvar, Mutex, ReentrantMutex};
use std::collections::VecDeque;
use tracing::{event, Level};

pub(crate) struct CooperativeQueue {
  jobs: Mutex<VecDeque<Job>>,
  ready: Condvar,
  /// Serializes draining across threads. Reentrant so a serial transform that
  /// waits on another pipeline can keep pumping from inside its own job.
  pump: ReentrantMutex<()>,
}

impl CooperativeQueue {
  pub(crate) fn new() -> Self {
    Self {
      jobs: Mutex::new(VecDeque::new()),
      ready: Condvar::new(),
      pump: ReentrantMutex::new(()),
    }
  }

  pub(crate) fn push(&self, job: Job) {
    let mut jobs = self.jobs.lock();
    jobs.push_back(job);
    self.ready.notify_all();
  }

  pub(crate) fn len(&self) -> usize {
    self.jobs.lock().len()
  }

  /// Runs queued jobs in FIFO order on the calling thread, including jobs
  /// queued while draining, up to `limit` when one is given. Returns how many
  /// ran.
  pub(crate) fn drain(&self, limit: Option<usize>) -> usize {
    let _pump = self.pump.lock();
    let mut ran = 0;
    while limit.map_or(true, |limit| ran < limit) {
      // Pop in its own statement so the queue lock is released before the
      // job runs and possibly pushes more work.
      let next = self.jobs.lock().pop_front();
      let Some(job) = next else {
        break;
      };
      job();
      ran += 1;
    }
    if ran > 0 {
      event!(Level::TRACE, ran, "Cooperative queue drained.");
    }
    ran
  }

  /// Wakes every thread parked in `park_until`. Taking the queue lock orders
  /// the wake-up after any state change the sleeper's predicate reads.
  pub(crate) fn notify(&self) {
    let _jobs = self.jobs.lock();
    self.ready.notify_all();
  }

  /// Sleeps until `ready` holds or serial work is queued.
  pub(crate) fn park_until(&self, ready: impl Fn() -> bool) {
    let mut jobs = self.jobs.lock();
    while jobs.is_empty() && !ready() {
      self.ready.wait(&mut jobs);
    }
  }

  /// Drops every queued job. The jobs are dropped after the lock is released.
  pub(crate) fn clear(&self) -> usize {
    let dropped = std::mem::take(&mut *self.jobs.lock());
    dropped.len()
  }
}
