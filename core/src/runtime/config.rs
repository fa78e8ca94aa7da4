// skein/src/runtime/config.rs

use crate::error::{SkeinError, SkeinResult};
use std::env;
use std::str::FromStr;
use tracing::{event, Level};

pub const ENV_POOL_THREADS: &str = "SKEIN_POOL_THREADS";
pub const ENV_THREAD_PREFIX: &str = "SKEIN_THREAD_PREFIX";
pub const ENV_MAX_SERIAL_PER_PUMP: &str = "SKEIN_MAX_SERIAL_PER_PUMP";

const DEFAULT_THREAD_PREFIX: &str = "skein-worker";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
  /// Pool size for the default scheduler. `None` lets rayon pick (one thread
  /// per logical CPU).
  pub pool_threads: Option<usize>,
  pub thread_name_prefix: String,
  /// Upper bound on serial jobs run by one `Dispatcher::pump` call. `None`
  /// drains the queue, including jobs queued while draining.
  pub max_serial_per_pump: Option<usize>,
}

impl Default for DispatcherConfig {
  fn default() -> Self {
    Self {
      pool_threads: None,
      thread_name_prefix: DEFAULT_THREAD_PREFIX.to_string(),
      max_serial_per_pump: None,
    }
  }
}

impl DispatcherConfig {
  pub fn with_pool_threads(mut self, threads: usize) -> Self {
    self.pool_threads = Some(threads);
    self
  }

  pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.thread_name_prefix = prefix.into();
    self
  }

  pub fn with_max_serial_per_pump(mut self, limit: usize) -> Self {
    self.max_serial_per_pump = Some(limit);
    self
  }

  /// Reads the configuration from `SKEIN_*` environment variables, falling
  /// back to the defaults for any that are unset.
  pub fn from_env() -> SkeinResult<Self> {
    let defaults = Self::default();

    let pool_threads = parse_env::<usize>(ENV_POOL_THREADS)?;
    let thread_name_prefix = env::var(ENV_THREAD_PREFIX).unwrap_or(defaults.thread_name_prefix);
    let max_serial_per_pump = parse_env::<usize>(ENV_MAX_SERIAL_PER_PUMP)?;

    let config = Self {
      pool_threads,
      thread_name_prefix,
      max_serial_per_pump,
    };
    config.validate()?;
    event!(Level::DEBUG, config = ?config, "Dispatcher configuration loaded from environment.");
    Ok(config)
  }

  pub fn validate(&self) -> SkeinResult<()> {
    if self.pool_threads == Some(0) {
      return Err(SkeinError::Config(format!("{} must be at least 1", ENV_POOL_THREADS)));
    }
    if self.max_serial_per_pump == Some(0) {
      return Err(SkeinError::Config(format!(
        "{} must be at least 1",
        ENV_MAX_SERIAL_PER_PUMP
      )));
    }
    if self.thread_name_prefix.trim().is_empty() {
      return Err(SkeinError::Config("thread name prefix must not be empty".to_string()));
    }
    Ok(())
  }
}

fn parse_env<T>(var_name: &str) -> SkeinResult<Option<T>>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  match env::var(var_name) {
    Ok(raw) => raw
      .trim()
      .parse::<T>()
      .map(Some)
      .map_err(|e| SkeinError::Config(format!("Invalid {} value '{}': {}", var_name, raw, e))),
    Err(env::VarError::NotPresent) => Ok(None),
    Err(e) => Err(SkeinError::Config(format!("Unreadable environment variable '{}': {}", var_name, e))),
  }
}
