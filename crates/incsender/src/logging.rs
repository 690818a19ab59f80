//! Tracing subscriber setup.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Rolling log file name prefix inside `LOG_DIR`.
pub const LOG_FILE_PREFIX: &str = "incsender";

/// Log files kept on disk, current one included.
pub const MAX_LOG_FILES: usize = 2;

/// Default filter directives for the given verbosity.
#[must_use]
pub fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "incsender=debug,notify=debug,info"
    } else {
        "incsender=info,notify=info,warn"
    }
}

/// Install the global subscriber.
///
/// Logs always go to stdout. With `log_dir` set they are also written to a
/// daily rolling file; the returned guard must be held until exit so buffered
/// lines are flushed.
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(LOG_FILE_PREFIX)
                .filename_suffix("log")
                .max_log_files(MAX_LOG_FILES)
                .build(dir)
                .context("Failed to create rolling log file")?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(file_layer)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
