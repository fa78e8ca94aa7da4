// skein_core/examples/host_loop.rs

//! Drives serial steps from an explicit host loop instead of `wait`.

use skein::{Dispatcher, DispatcherConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Host Loop Example ---");
  let config = DispatcherConfig::from_env()?.with_max_serial_per_pump(2);
  let dispatcher = Dispatcher::new(config)?;

  let done = Arc::new(AtomicBool::new(false));
  let flag = done.clone();

  // The pipeline runs without anyone waiting on it; its last step reports back.
  let _pipeline = dispatcher
    .run(|| Ok((1..=8).collect::<Vec<u64>>()))
    .then_branch(|frames: Vec<u64>| Ok(frames))
    .then_async(|frame: u64| {
      thread::sleep(Duration::from_millis(5 * frame));
      Ok(frame * frame)
    })
    .then(|energy: u64| Ok(energy + 1))
    .then_merge(|energies: Vec<u64>| Ok(energies.iter().sum::<u64>()))
    .then(move |total: u64| {
      info!(total, "Frames processed.");
      flag.store(true, Ordering::SeqCst);
      Ok(total)
    });

  // A host "frame loop": pump a bounded number of serial steps per tick.
  let mut ticks = 0u32;
  while !done.load(Ordering::SeqCst) && ticks < 1_000 {
    match dispatcher.pump() {
      Ok(ran) if ran > 0 => info!(tick = ticks, ran, pending = dispatcher.pending_serial(), "Pumped."),
      Ok(_) => {}
      Err(e) => {
        error!(%e, "Pipeline failed.");
        break;
      }
    }
    ticks += 1;
    thread::sleep(Duration::from_millis(4));
  }

  dispatcher.shutdown();
  Ok(())
}
