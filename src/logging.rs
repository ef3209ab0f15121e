//! Tracing setup: stdout layer plus an optional daily-rolling file layer.

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Build the env filter: `RUST_LOG` wins, otherwise the configured level.
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber.
///
/// Returns the file writer guard when file logging is enabled; keep it alive
/// for the lifetime of the process or buffered lines are lost.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match config.dir {
        Some(ref dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {:?}", dir))?;
            let appender = tracing_appender::rolling::daily(dir, "amelia.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(env_filter(&config.level));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let (json_layer, text_layer) = if config.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stdout)
            .with_filter(env_filter(&config.level));
        (Some(layer), None)
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_filter(env_filter(&config.level));
        (None, Some(layer))
    };

    tracing_subscriber::registry()
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
