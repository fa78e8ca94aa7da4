// skein_core/examples/error_handling.rs

use skein::{Dispatcher, DispatcherConfig, SkeinError};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
enum FetchError {
  #[error("Resource '{0}' not found")]
  NotFound(String),
  #[error("Upstream timed out after {0}ms")]
  Timeout(u64),
}

#[derive(Debug, thiserror::Error)]
#[error("Quota exceeded for tenant {tenant}")]
struct QuotaExceeded {
  tenant: String,
  #[source]
  cause: FetchError,
}

fn fetch(key: &str) -> anyhow::Result<String> {
  match key {
    "missing" => Err(FetchError::NotFound(key.to_string()).into()),
    "slow" => Err(FetchError::Timeout(250).into()),
    "quota" => Err(
      QuotaExceeded {
        tenant: "acme".to_string(),
        cause: FetchError::Timeout(0),
      }
      .into(),
    ),
    other => Ok(format!("payload for {}", other)),
  }
}

fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Error Handling Example ---");
  let dispatcher = Dispatcher::new(DispatcherConfig::default())?;

  // 1. A handle-level catch substitutes a value and the pipeline continues.
  let recovered = dispatcher
    .run_async(|| fetch("missing"))
    .catch::<FetchError, _>(|error| format!("fallback ({})", error))
    .then(|body: String| Ok(body.len()))
    .wait()?;
  info!(recovered, "Recovered with a fallback value.");

  // 2. Handlers match through the source chain: QuotaExceeded carries a FetchError.
  let through_source = dispatcher
    .run(|| fetch("quota"))
    .catch::<FetchError, _>(|cause| format!("caught via source: {}", cause))
    .wait()?;
  info!(%through_source, "Matched a wrapped error.");

  // 3. A pipeline-wide handler observes the failure; the lineage ends without a value.
  let observed = dispatcher
    .run(|| fetch("slow"))
    .on_error::<FetchError, _>(|error| warn!(%error, "Observed failure."))
    .wait();
  match observed {
    Err(SkeinError::NoValue) => info!("Observed failure ended the lineage."),
    other => warn!(?other, "Unexpected outcome."),
  }

  // 4. Nothing matches: the failure surfaces from wait and the pipeline aborts.
  match dispatcher.run(|| fetch("missing")).then(|s: String| Ok(s.len())).wait() {
    Err(SkeinError::Unhandled(failure)) => {
      let not_found = failure.downcast_ref::<FetchError>();
      info!(?not_found, %failure, "Unhandled failure surfaced.");
    }
    other => warn!(?other, "Unexpected outcome."),
  }

  // 5. A panicking transform fails its lineage instead of unwinding the caller.
  let panicked = dispatcher
    .run_async(|| -> anyhow::Result<u8> { panic!("corrupt input") })
    .catch::<SkeinError, _>(|_| 0)
    .wait()?;
  info!(panicked, "Panic converted into a recoverable failure.");

  Ok(())
}
