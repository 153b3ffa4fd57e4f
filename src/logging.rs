//! Tracing setup: daily rolling log file plus warnings on stderr.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{filter::LevelFilter, fmt, EnvFilter};

use crate::config::LogConfig;

/// Filter directive used when neither TAJSYNC_LOG nor the config sets one
const DEFAULT_FILTER: &str = "tajsync=info";

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; keep it alive until exit.
pub fn init(config: &LogConfig) -> Result<WorkerGuard> {
  let dir = match &config.dir {
    Some(dir) => dir.clone(),
    None => default_log_dir()?,
  };
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let filter = EnvFilter::try_from_env("TAJSYNC_LOG")
    .or_else(|_| EnvFilter::try_new(config.level.as_deref().unwrap_or(DEFAULT_FILTER)))
    .map_err(|e| eyre!("Invalid log filter: {}", e))?;

  let appender = tracing_appender::rolling::daily(&dir, "tajsync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let file_layer = fmt::layer()
    .with_writer(writer)
    .with_ansi(false)
    .with_filter(filter);
  let stderr_layer = fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(false)
    .with_filter(LevelFilter::WARN);

  tracing_subscriber::registry()
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  tracing::debug!(dir = %dir.display(), "logging initialized");
  Ok(guard)
}

fn default_log_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("tajsync").join("logs"))
}
