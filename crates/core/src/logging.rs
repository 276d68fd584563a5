//! Logging setup shared by tools and tests

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Get the manila data directory (respects env vars)
pub fn data_dir() -> PathBuf {
  if let Ok(path) = std::env::var("MANILA_DATA_DIR") {
    return PathBuf::from(path);
  }

  dirs::data_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("manila")
}

/// Parse log level from config string
fn parse_log_level(level: &str) -> tracing::Level {
  match level.to_lowercase().as_str() {
    "off" | "error" => tracing::Level::ERROR,
    "warn" => tracing::Level::WARN,
    "info" => tracing::Level::INFO,
    "debug" => tracing::Level::DEBUG,
    "trace" => tracing::Level::TRACE,
    _ => tracing::Level::INFO,
  }
}

/// Initialize console logging (tools, tests)
pub fn init_console_logging() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
    .with_test_writer()
    .try_init();
}

/// Initialize file logging with config-driven level and rotation.
///
/// Returns the guard that must be kept alive for the duration of the program;
/// `None` means we fell back to console logging.
pub fn init_file_logging(config: &LogConfig) -> Option<WorkerGuard> {
  let level = parse_log_level(&config.level);
  let env_filter = EnvFilter::builder()
    .with_default_directive(level.into())
    .from_env_lossy();

  let log_dir = data_dir();
  if std::fs::create_dir_all(&log_dir).is_err() {
    init_console_logging();
    return None;
  }

  let file_appender = match config.rotation.as_str() {
    "hourly" => tracing_appender::rolling::hourly(&log_dir, "manila.log"),
    "never" => tracing_appender::rolling::never(&log_dir, "manila.log"),
    _ => tracing_appender::rolling::daily(&log_dir, "manila.log"),
  };

  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Some(guard)
}
