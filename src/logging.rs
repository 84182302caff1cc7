use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::DEFAULT_LOG_FILTER;

fn env_filter(filter: Option<&str>) -> EnvFilter {
    let directive = filter
        .map(str::to_string)
        .or_else(|| std::env::var("MINET_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.into());
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the JSON stderr subscriber. Safe to call more than once.
pub fn init_logging() {
    let _ = tracing_log::LogTracer::init();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(None))
        .json()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_timer(UtcTime::rfc_3339())
        .try_init();
}

/// Install stderr plus a daily-rolling JSON file sink under `log_dir`.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process.
pub fn init_with_file_sink(log_dir: &Path, filter: &str) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("create log directory {}", log_dir.display()))?;
    let appender = tracing_appender::rolling::daily(log_dir, "minet.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let _ = tracing_log::LogTracer::init();
    let stderr_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_timer(UtcTime::rfc_3339());
    let file_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_ansi(false)
        .with_writer(writer)
        .with_timer(UtcTime::rfc_3339());

    let _ = tracing_subscriber::registry()
        .with(env_filter(Some(filter)))
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    tracing::debug!(target: "minet", event = "logging_ready", dir = %log_dir.display());
    Ok(guard)
}
