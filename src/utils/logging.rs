//! Logging system initialization
//!
//! Sets up tracing-based logging with file output under the application
//! data directory and manual rotation at 5MB keeping 2 historical files.

use crate::error::{Result, ToolkitError};
use crate::utils::paths;
use std::io::ErrorKind;
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, EnvFilter};

/// Maximum log file size in bytes (5MB)
const MAX_LOG_SIZE: u64 = 5 * 1024 * 1024;

/// Initialize the logging system
///
/// Log level defaults to INFO but can be configured via `RUST_LOG`.
pub fn init_logging() -> Result<()> {
    let log_dir = paths::app_data_dir()?;
    std::fs::create_dir_all(&log_dir)?;

    let log_path = log_dir.join("mstoolkit.log");
    if log_path.exists() {
        check_and_rotate_log(&log_path)?;
    }

    // tracing_appender has no size-based rotation; rotation happens above,
    // once per process start.
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix("mstoolkit")
        .filename_suffix("log")
        .build(log_dir)
        .map_err(|e| {
            ToolkitError::Io(std::io::Error::new(
                ErrorKind::Other,
                format!("failed to create log appender: {e}"),
            ))
        })?;

    let subscriber = fmt()
        .with_writer(file_appender)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        ToolkitError::Io(std::io::Error::new(ErrorKind::Other, e.to_string()))
    })?;

    tracing::info!("mstoolkit v{} started", env!("CARGO_PKG_VERSION"));

    Ok(())
}

/// Check log file size and rotate if necessary
///
/// Rotation: `.log.2` deleted, `.log.1` -> `.log.2`, `.log` -> `.log.1`
fn check_and_rotate_log(log_path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(log_path)?;
    if metadata.len() <= MAX_LOG_SIZE {
        return Ok(());
    }

    let oldest = log_path.with_extension("log.2");
    if oldest.exists() {
        std::fs::remove_file(&oldest)?;
    }

    let previous = log_path.with_extension("log.1");
    if previous.exists() {
        std::fs::rename(&previous, &oldest)?;
    }

    std::fs::rename(log_path, &previous)?;
    Ok(())
}
