//! Tracing setup: compact stdout output plus a daily rolling file.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::core::config::AppPaths;

const LOG_FILE_PREFIX: &str = "docsage.log";
const DEFAULT_FILTER: &str = "info,sqlx=warn,tower_http=info";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// `DOCSAGE_LOG` wins over `RUST_LOG`; both fall back to [`DEFAULT_FILTER`].
fn build_filter() -> EnvFilter {
    std::env::var("DOCSAGE_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Returns the directory the log files go to.
///
/// Calling it twice is harmless: the second subscriber is ignored.
pub fn init(paths: &AppPaths) -> PathBuf {
    let log_dir = paths.log_dir.clone();
    if let Err(err) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Cannot create log directory {}: {}", log_dir.display(), err);
    }

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX));
    let _ = FILE_GUARD.set(guard);

    let console = tracing_subscriber::fmt::layer().compact().with_target(false);
    let file = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(file_writer);

    let _ = tracing_subscriber::registry()
        .with(build_filter())
        .with(console)
        .with(file)
        .try_init();

    log_dir
}
