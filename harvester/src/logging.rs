//! Tracing subscriber setup.
//!
//! Console output goes to stderr; when a log directory is given, a second
//! layer writes plain-text lines to a daily-rolling `harvester.log.YYYY-MM-DD`
//! file through a non-blocking writer. `RUST_LOG` overrides the level.

use std::fs;
use std::path::Path;

use chrono::{Local, NaiveDate};
use time::format_description::well_known::Rfc3339;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::LocalTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Prefix of rolled log files.
pub const LOG_FILE_PREFIX: &str = "harvester.log";

/// Days of rolled log files kept by [`cleanup_old_logs`].
pub const DEFAULT_RETENTION_DAYS: u32 = 14;

/// Keeps the file writer alive; drop it last to flush buffered lines.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Default filter directive for the console verbosity.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "harvester=debug,harvester_cli=debug,info"
    } else {
        "info"
    }
}

/// Install the global subscriber.
///
/// Falls back to console-only output if the log directory cannot be created.
pub fn init_logging(verbose: bool, log_dir: Option<&Path>) -> LogGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let console_layer = fmt::layer()
        .with_target(verbose)
        .with_timer(LocalTime::new(Rfc3339))
        .with_writer(std::io::stderr);

    let Some(log_dir) = log_dir else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        return LogGuard { _file_guard: None };
    };

    if let Err(e) = fs::create_dir_all(log_dir) {
        eprintln!(
            "Failed to create log directory {}: {}, logging to console only",
            log_dir.display(),
            e
        );
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        return LogGuard { _file_guard: None };
    }

    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, file_guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_timer(LocalTime::new(Rfc3339))
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::debug!(log_dir = %log_dir.display(), "Logging initialized");
    cleanup_old_logs(log_dir, DEFAULT_RETENTION_DAYS);

    LogGuard {
        _file_guard: Some(file_guard),
    }
}

/// Delete rolled log files older than `retention_days`.
///
/// Returns the number of files removed.
pub fn cleanup_old_logs(log_dir: &Path, retention_days: u32) -> usize {
    let today = Local::now().date_naive();
    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(log_dir = %log_dir.display(), error = %e, "Failed to read log directory");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(rolled_log_date)
        else {
            continue;
        };
        if (today - date).num_days() <= i64::from(retention_days) {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove old log"),
        }
    }

    if removed > 0 {
        tracing::info!(removed, "Removed old log files");
    }
    removed
}

/// Date suffix of a rolled log file name.
fn rolled_log_date(filename: &str) -> Option<NaiveDate> {
    let suffix = filename.strip_prefix(LOG_FILE_PREFIX)?.strip_prefix('.')?;
    NaiveDate::parse_from_str(suffix, "%Y-%m-%d").ok()
}
