//! Logging setup for CLI commands and the node

use searchd::config::Config;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "searchd.log";

/// Initialize logging for client commands (console only, warnings and up)
pub fn init_cli_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
    .with_writer(std::io::stderr)
    .init();
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

/// Initialize logging for a serving node.
///
/// In foreground mode: Logs to console only with colors
/// In background mode: Logs to a rolling file under the data dir (no ANSI)
///
/// Returns the guard that must be kept alive for the duration of the program
pub fn init_node_logging(config: &Config, foreground: bool) -> Option<WorkerGuard> {
  let level = parse_log_level(&config.node.log_level);

  // RUST_LOG overrides the configured level
  let env_filter = EnvFilter::builder()
    .with_default_directive(level.into())
    .from_env_lossy();

  if foreground {
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_ansi(true)
      .init();
    None
  } else {
    let log_dir = config.node.data_dir();
    if std::fs::create_dir_all(&log_dir).is_err() {
      // Fall back to console-only logging
      init_cli_logging();
      return None;
    }

    let file_appender = match config.node.log_rotation.as_str() {
      "hourly" => tracing_appender::rolling::hourly(&log_dir, LOG_FILE_NAME),
      "never" => tracing_appender::rolling::never(&log_dir, LOG_FILE_NAME),
      _ => tracing_appender::rolling::daily(&log_dir, LOG_FILE_NAME),
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
}
