//! Structured JSONL logging plus human-readable stderr output.
//!
//! Dual-output logging:
//! - **JSONL to file** (~/.shortcut-scout/logs/shortcut-scout.jsonl) - structured, append-only
//! - **Pretty to stderr** - compact, for developers
//!
//! # Usage
//!
//! ```rust,ignore
//! let _guard = shortcut_scout::logging::init();
//! tracing::info!(event_type = "engine_start", "Engine started");
//! ```
//!
//! The guard must be kept alive for the duration of the program; dropping it
//! flushes and closes the log file.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Guard that must be kept alive for the duration of the program.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initialize the dual-output logging system.
///
/// Returns a guard that MUST be kept alive for the duration of the program.
pub fn init() -> LoggingGuard {
    let log_dir = log_dir();
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("[LOGGING] Failed to create log directory: {}", e);
    }

    let log_path = log_dir.join("shortcut-scout.jsonl");

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .unwrap_or_else(|e| {
            eprintln!("[LOGGING] Failed to open log file: {}", e);
            OpenOptions::new()
                .write(true)
                .open("/dev/null")
                .expect("Failed to open /dev/null")
        });

    // Non-blocking writer keeps the tap callback path free of file I/O.
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_layer = fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE);

    let pretty_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .init();

    tracing::info!(
        event_type = "lifecycle",
        action = "started",
        log_path = %log_path.display(),
        "Logging initialized"
    );

    LoggingGuard {
        _file_guard: file_guard,
    }
}

/// Log directory (~/.shortcut-scout/logs/).
fn log_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".shortcut-scout").join("logs"))
        .unwrap_or_else(|| std::env::temp_dir().join("shortcut-scout-logs"))
}

/// Path of the JSONL log file.
pub fn log_path() -> PathBuf {
    log_dir().join("shortcut-scout.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_path_ends_with_jsonl() {
        assert!(log_path().to_string_lossy().ends_with("shortcut-scout.jsonl"));
    }
}
