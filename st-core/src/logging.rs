//! Structured logging setup using the `tracing` ecosystem.
//!
//! Console output plus a daily-rotated log file, either human-readable or JSON.

use std::path::Path;

use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::StResult;

/// Initialize the global tracing subscriber.
///
/// The filter comes from `config.level` (any `EnvFilter` directive, e.g.
/// `"info,st_eventsub=debug"`) and falls back to `info` when it does not parse.
/// Keep the returned guard alive for as long as file logging is wanted.
pub fn init_logging(config: &LoggingConfig, log_dir: &Path) -> StResult<LogGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = rolling::daily(log_dir, "streamtweaks.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).compact();
    let registry = tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(console_layer);

    if config.json_output {
        registry
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .json()
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_thread_names(true)
                    .with_line_number(true),
            )
            .init();
    }

    tracing::info!(
        "logging initialized at level={}, dir={}",
        config.level,
        log_dir.display()
    );

    Ok(LogGuard { _guard: guard })
}

/// Guard that keeps the non-blocking log writer alive.
/// Drop this to flush and close the log file.
pub struct LogGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Initialize a console-only logger for tests or short-lived commands.
/// Subsequent calls are no-ops.
pub fn init_console_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer().with_target(true).compact())
        .try_init();
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}
