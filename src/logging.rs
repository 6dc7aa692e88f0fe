//! Tracing configuration and log routing.
//!
//! Each binary logs to stdout with a compact formatter and appends to its own log file under
//! `logs/<binary>.log`. `PERIODEX_LOG_FILE` redirects the file output to an explicit path,
//! which is handy when the query server and the pipeline run side by side in one container.
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_DIR: &str = "logs";

/// Configure tracing subscribers for stdout and file logging.
///
/// - Respects `RUST_LOG` for filtering (defaults to `info`).
/// - `binary` names the default log file, e.g. `periodex-pipeline` → `logs/periodex-pipeline.log`.
/// - The non-blocking writer guard lives in a static for the process lifetime.
pub fn init_tracing(binary: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    match file_writer(binary) {
        Some(writer) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact();
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
}

/// Build a non-blocking file writer, or `None` when the destination cannot be opened.
fn file_writer(binary: &str) -> Option<NonBlocking> {
    let appender = match std::env::var("PERIODEX_LOG_FILE") {
        Ok(path) => {
            let path = Path::new(&path);
            let directory = path.parent().filter(|dir| !dir.as_os_str().is_empty());
            let file_name = path.file_name()?;
            if let Some(dir) = directory
                && let Err(err) = std::fs::create_dir_all(dir)
            {
                eprintln!("Failed to create log directory {}: {err}", dir.display());
                return None;
            }
            tracing_appender::rolling::never(directory.unwrap_or(Path::new(".")), file_name)
        }
        Err(_) => {
            if let Err(err) = std::fs::create_dir_all(LOG_DIR) {
                eprintln!("Failed to create logs directory: {err}");
                return None;
            }
            tracing_appender::rolling::never(LOG_DIR, format!("{binary}.log"))
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    let _ = LOG_GUARD.set(guard);
    Some(non_blocking)
}
