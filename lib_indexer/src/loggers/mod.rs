//! # Logging Setup
//!
//! Shared `tracing` initialization for the server binaries: human-readable
//! console output plus a JSON-formatted daily rotating file. The log level
//! comes from `RUST_LOG` (default "info") and the file directory from
//! `LOG_DIR` (default "logs").

use std::{env, io};

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber. The returned guard must be held for the
/// lifetime of the process so buffered file logs are flushed on exit.
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
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized with level: {}", log_level);
    Ok(guard)
}
