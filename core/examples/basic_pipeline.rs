// skein_core/examples/basic_pipeline.rs

use skein::{Dispatcher, DispatcherConfig, SkeinResult};
use std::thread;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
struct Order {
  id: u32,
  items: Vec<(String, u32)>,
}

fn main() -> SkeinResult<()> {
  // Initialize tracing (optional, for demonstration)
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Basic Pipeline Example ---");

  // 1. One dispatcher owns the cooperative queue and the worker pool.
  let dispatcher = Dispatcher::new(DispatcherConfig::default().with_pool_threads(4))?;

  // 2. A serial root, a parallel step, and back to serial.
  let greeting = dispatcher
    .run(|| Ok(String::from("skein")))
    .then_async(|name: String| Ok(format!("hello, {}", name)))
    .then(|msg: String| Ok(msg.to_uppercase()))
    .wait()?;
  info!(%greeting, "Linear pipeline finished.");

  // 3. Fan out over an order's items, price each on the pool, and gather.
  let order = Order {
    id: 7,
    items: vec![("widget".into(), 3), ("gadget".into(), 1), ("gizmo".into(), 5)],
  };
  let order_id = order.id;
  let total = dispatcher
    .resolved(order)
    .then_branch(|order: Order| Ok(order.items))
    .then_async(|(name, quantity): (String, u32)| {
      // Simulate a slow price lookup.
      thread::sleep(Duration::from_millis(10 * quantity as u64));
      let unit_price = name.len() as u32 * 100;
      info!(%name, quantity, unit_price, "Priced item.");
      Ok(unit_price * quantity)
    })
    .then_merge(|line_totals: Vec<u32>| Ok(line_totals.iter().sum::<u32>()))
    .wait()?;
  info!(order_id, total, "Order priced.");

  // 4. A deferred root, resolved by another thread.
  let (deferred, op) = dispatcher.deferred::<u64>();
  let squared = op.then(|x: u64| Ok(x * x));
  let producer = thread::spawn(move || {
    thread::sleep(Duration::from_millis(20));
    deferred.resolve(12)
  });
  let result = squared.wait()?;
  info!(result, "Deferred pipeline finished.");
  if let Ok(resolution) = producer.join() {
    resolution?;
  }

  Ok(())
}
