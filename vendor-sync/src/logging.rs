//! Process-wide tracing setup: a console layer on stderr plus, when a log
//! directory is given, a daily rolling `vendor-sync.log`.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_FILE_NAME: &str = "vendor-sync.log";
const DEFAULT_FILTER: &str = "vendor_sync=info,vendor_sync_core=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into())
}

/// Installs the global subscriber. The returned guard flushes the file writer
/// when dropped and must be held until the process exits.
pub fn init(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let mut log_guard = None;
    let file_layer = match log_dir.map(|dir| std::fs::create_dir_all(dir).map(|_| dir)) {
        Some(Ok(dir)) => {
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            log_guard = Some(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .with_filter(env_filter()),
            )
        }
        Some(Err(err)) => {
            eprintln!("Warning: failed to create log directory: {err}");
            None
        }
        None => None,
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter());
    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .init();
    log_guard
}
