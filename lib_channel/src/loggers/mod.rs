//! # Loggers Module
//!
//! Process-wide `tracing` setup shared by the binaries in this workspace.
//! The library itself only emits through the `tracing` macros; installing a
//! subscriber is left to whoever owns `main`.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::{env, io};

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// # Setup Logging
///
/// Installs the global subscriber:
///
/// - an `EnvFilter` taken from `RUST_LOG` (default `info`),
/// - a coloured console layer,
/// - a JSON layer written to `<LOG_DIR>/<app_name>.<date>` (default
///   `LOG_DIR` is `logs`), rotated daily through a non-blocking writer.
///
/// The returned guard flushes the file writer when dropped; keep it alive
/// for as long as the program runs.
///
/// # Errors
/// Fails when the log directory cannot be created, the filter does not
/// parse, or a global subscriber is already installed.
pub fn setup_logging(app_name: &str) -> io::Result<WorkerGuard> {
    let log_level: String = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let log_dir: String = env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = rolling::daily(&log_dir, app_name);
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_appender)
        .json();

    let env_filter: EnvFilter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log_level))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))?;

    info!("Logging initialized with level: {}", log_level);
    Ok(guard)
}
