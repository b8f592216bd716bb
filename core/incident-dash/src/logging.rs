//! Logging setup for incident-dash.
//!
//! Writes to stderr and to a daily-rolled file under `<root>/logs/`.
//! `RUST_LOG` sets the filter (default `info`); `INCIDENT_DASH_DEBUG_LOG=1`
//! forces `debug`.

use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEBUG_ENV: &str = "INCIDENT_DASH_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "incident-dash.log";

/// Returns a guard that must live as long as `main`, or buffered file output
/// is lost. `None` when the log directory cannot be created; stderr logging
/// still works in that case.
pub fn init(log_dir: &Path) -> Option<WorkerGuard> {
    let filter = if debug_enabled(env::var(DEBUG_ENV).ok().as_deref()) {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    match fs_err::create_dir_all(log_dir) {
        Ok(()) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();
            Some(guard)
        }
        Err(err) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            tracing::warn!(error = %err, "Log directory unavailable; logging to stderr only");
            None
        }
    }
}

fn debug_enabled(value: Option<&str>) -> bool {
    matches!(value, Some("1" | "true" | "TRUE" | "yes" | "YES"))
}
