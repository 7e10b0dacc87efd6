//! Tracing setup: stdout and/or an append-only log file.
//!
//! `RUST_LOG` takes precedence over the configured level.

use crate::config::{LogConfig, LogFormat};
use cqrelay_core::{RelayError, RelayResult};
use std::fs::OpenOptions;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process.
pub fn init(config: &LogConfig) -> RelayResult<Option<WorkerGuard>> {
    let (file_writer, guard) = match &config.file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let result = match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(config.console.then(|| {
                fmt::layer()
                    .with_target(false)
                    .with_filter(env_filter(&config.level))
            }))
            .with(file_writer.map(|writer| {
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(false)
                    .with_filter(env_filter(&config.level))
            }))
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(config.console.then(|| {
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_filter(env_filter(&config.level))
            }))
            .with(file_writer.map(|writer| {
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(false)
                    .with_filter(env_filter(&config.level))
            }))
            .try_init(),
    };

    result.map_err(|e| RelayError::Other(format!("failed to install logger: {e}")))?;
    Ok(guard)
}

/// Console-only logging, used before the config has been loaded.
pub fn init_default(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(false)
        .try_init();
}
