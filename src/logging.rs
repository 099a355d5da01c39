use std::fs;
use std::io;
use tracing::warn;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Daily-rotated writer under `log_dir`, creating the directory first.
fn file_writer(log_dir: &str) -> io::Result<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "ans_ledger.log");
    Ok(tracing_appender::non_blocking(file_appender))
}

/// Initializes the logging system with both console and file output.
/// When the log directory cannot be created only the console layer is
/// installed, and the failure is reported on it.
pub fn init_logging(log_dir: &str) {
    let (writer, dir_error) = match file_writer(log_dir) {
        Ok(writer) => (Some(writer), None),
        Err(e) => (None, Some(e)),
    };
    let (file_layer, guard) = match writer {
        // JSON lines for the file, human-readable for the console
        Some((writer, guard)) => (Some(fmt::layer().json().with_writer(writer)), Some(guard)),
        None => (None, None),
    };
    let console_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    // Respect RUST_LOG if set; otherwise info for our crate
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ans_ledger=info,warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    if let Some(e) = dir_error {
        warn!("File logging disabled: cannot create log directory {}: {}", log_dir, e);
    }

    // The guard must outlive the process so buffered lines are flushed
    if let Some(guard) = guard {
        std::mem::forget(guard);
    }
}
