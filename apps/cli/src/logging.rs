use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding a tracing filter directive.
pub const LOG_ENV: &str = "INCIPIT_LOG";

/// Installs a stderr layer plus a daily rolling file under `log_dir`.
/// The returned guard must be held until exit to flush the file writer.
pub fn init_logging(log_dir: &Path, verbosity: u8) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("create log directory {}", log_dir.display()))?;

    // Files look like incipit.log.2026-10-17
    let file_appender = tracing_appender::rolling::daily(log_dir, "incipit.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("install tracing subscriber")?;

    Ok(guard)
}
