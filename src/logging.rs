use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config;

/// Log to a daily file under the data directory, and to stderr when verbose.
///
/// Keep the returned guard alive for the whole process or buffered lines are lost.
pub fn init(verbose: bool) -> Result<WorkerGuard> {
  let log_dir = config::data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (file_writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "route80.log"));

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("route80=info"));
  let file_layer = fmt::layer().with_writer(file_writer).with_ansi(false);
  let stderr_layer = verbose.then(|| fmt::layer().with_writer(std::io::stderr));

  tracing_subscriber::registry()
    .with(filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
