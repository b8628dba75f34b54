//! Logging setup for CLI commands and the MCP server.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Data directory for logs. `DOCSHELF_DATA_DIR` and `XDG_DATA_HOME`
/// override the platform default.
pub fn data_dir() -> PathBuf {
  if let Ok(dir) = std::env::var("DOCSHELF_DATA_DIR") {
    return PathBuf::from(dir);
  }
  if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
    return PathBuf::from(xdg).join("docshelf");
  }
  dirs::data_local_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("docshelf")
}

/// Console logging for interactive commands. RUST_LOG overrides.
pub fn init_cli_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
    .with_writer(std::io::stderr)
    .init();
}

/// File-only logging for the MCP server: stdout carries the protocol and
/// must never see a log line.
pub fn init_mcp_logging() -> Option<WorkerGuard> {
  let log_dir = data_dir().join("logs");
  if std::fs::create_dir_all(&log_dir).is_err() {
    init_cli_logging(); // stderr is still safe for MCP
    return None;
  }

  let appender = tracing_appender::rolling::daily(&log_dir, "docshelf.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Some(guard)
}
