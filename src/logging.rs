//! File logging.
//!
//! Logs go to a daily rolling `octocache.log`. The filter comes from
//! `OCTOCACHE_LOG`, then the config file, then defaults to `info`.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV: &str = "OCTOCACHE_LOG";
const LOG_FILE: &str = "octocache.log";

fn filter(configured: Option<&str>) -> Result<EnvFilter> {
  match std::env::var(LOG_ENV) {
    Ok(directives) if !directives.is_empty() => EnvFilter::try_new(&directives)
      .map_err(|e| eyre!("Invalid {} filter '{}': {}", LOG_ENV, directives, e)),
    _ => EnvFilter::try_new(configured.unwrap_or("info"))
      .map_err(|e| eyre!("Invalid logging filter: {}", e)),
  }
}

/// Install the global subscriber. Keep the returned guard alive for the life
/// of the process or buffered lines are lost.
pub fn init(directory: &Path, configured: Option<&str>) -> Result<WorkerGuard> {
  std::fs::create_dir_all(directory).map_err(|e| {
    eyre!(
      "Failed to create log directory {}: {}",
      directory.display(),
      e
    )
  })?;

  let appender = tracing_appender::rolling::daily(directory, LOG_FILE);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(filter(configured)?)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .try_init()
    .map_err(|e| eyre!("Failed to install logger: {}", e))?;

  Ok(guard)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bad_configured_filter_is_rejected() {
    if std::env::var(LOG_ENV).is_ok() {
      return;
    }
    assert!(filter(Some("octocache=debug")).is_ok());
    assert!(filter(Some("octocache=verbose")).is_err());
  }
}
