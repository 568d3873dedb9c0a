//! Logging setup for hosts embedding tabwright.
//!
//! The library itself only emits `tracing` events. A host calls [`init`]
//! once at startup to get a console layer plus daily-rolling files under
//! the tabwright data directory:
//!
//! - `tabwright.<date>.log`: everything the filter lets through
//! - `warnings.<date>.log`: warnings and errors only, which is where
//!   runtime load failures and in-memory fallbacks end up
//!
//! ```no_run
//! tabwright::logging::init().expect("logging");
//! tracing::info!("host started");
//! ```

use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer as _, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

const MAX_LOG_FILES: usize = 10;

/// `<data dir>/logs`, created if missing. `base` overrides the platform
/// data directory.
pub fn get_log_dir(base: Option<&Path>) -> Result<PathBuf> {
    let base = base.map_or_else(crate::config::default_data_dir, Path::to_path_buf);
    let log_dir = base.join("logs");

    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    }

    Ok(log_dir)
}

/// Installs the global subscriber with files under the platform data
/// directory.
///
/// # Errors
///
/// Fails when the log directory or appenders cannot be created, or when a
/// global subscriber is already set.
pub fn init() -> Result<()> {
    init_in(&get_log_dir(None)?)
}

/// Same as [`init`] with an explicit log directory.
///
/// # Errors
///
/// See [`init`].
pub fn init_in(log_dir: &Path) -> Result<()> {
    let all_logs = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .filename_prefix("tabwright")
        .filename_suffix("log")
        .build(log_dir)
        .context("Failed to create log file appender")?;

    let warnings = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .filename_prefix("warnings")
        .filename_suffix("log")
        .build(log_dir)
        .context("Failed to create warnings file appender")?;

    // Default to INFO, allow override with RUST_LOG
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Failed to create env filter")?;

    let stdout_layer = fmt::layer().with_target(true).compact();

    let all_logs_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(all_logs);

    let warnings_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(warnings)
        .with_filter(EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(all_logs_layer)
        .with(warnings_layer)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    tracing::info!(log_dir = %log_dir.display(), "Logging initialized");

    Ok(())
}

/// Path of today's main log file.
pub fn get_current_log_path(log_dir: &Path) -> PathBuf {
    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    log_dir.join(format!("tabwright.{today}.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_dir_under_base() -> Result<()> {
        let base = tempfile::tempdir()?;
        let log_dir = get_log_dir(Some(base.path()))?;
        assert!(log_dir.ends_with("logs"));
        assert!(log_dir.is_dir());
        let current = get_current_log_path(&log_dir);
        assert!(
            current
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("tabwright.") && n.ends_with(".log"))
        );
        Ok(())
    }
}
