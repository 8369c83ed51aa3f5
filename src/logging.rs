use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::NexaError;

/// Installs the global subscriber: console output plus, when enabled, JSON
/// lines in a daily-rotated file under `<work_dir>/logs`.
///
/// The returned guard flushes the file writer on drop and must be held by
/// `main` for as long as the process logs.
pub fn init(config: &LoggingConfig, work_dir: &Path) -> Result<Option<WorkerGuard>, NexaError> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
    };

    let console = fmt::Layer::new()
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let (file_layer, guard) = if config.file {
        let log_dir = work_dir.join("logs");
        fs::create_dir_all(&log_dir)?;

        let appender = tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix("nexa-node")
            .filename_suffix("log")
            .build(&log_dir)
            .map_err(|e| NexaError::Config(format!("Failed to create log file: {}", e)))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);

        let layer = fmt::Layer::new()
            .json()
            .with_writer(writer)
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_ansi(false)
            .with_filter(filter());
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| NexaError::Config(format!("Failed to set tracing subscriber: {}", e)))?;

    Ok(guard)
}
