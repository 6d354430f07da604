//! Tracing subscriber setup.
//!
//! Logs go to `<data dir>/fitout/fitout.log` so they never interleave with
//! command output, unless `--log-stderr` asks for them on the terminal.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Env var holding the filter directives, e.g. `FITOUT_LOG=fitout=debug`.
pub const LOG_ENV: &str = "FITOUT_LOG";

pub fn log_dir() -> Result<PathBuf> {
  dirs::data_dir()
    .map(|d| d.join("fitout"))
    .ok_or_else(|| eyre!("Could not determine data directory"))
}

fn env_filter() -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; keep it alive until exit.
pub fn init(log_stderr: bool) -> Result<Option<WorkerGuard>> {
  if log_stderr {
    tracing_subscriber::registry()
      .with(env_filter())
      .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
      .try_init()
      .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;
    return Ok(None);
  }

  let dir = log_dir()?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, "fitout.log"));
  tracing_subscriber::registry()
    .with(env_filter())
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false),
    )
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(Some(guard))
}
