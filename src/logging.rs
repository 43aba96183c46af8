//! Tracing setup for the gesture trainer.
//!
//! Installs a global subscriber that writes to stdout and to one log file per
//! launch under `<app root>/logs`. Launch logs are named by their start time,
//! so name order is age order; the oldest beyond [`MAX_LOG_FILES`] are removed.

use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::OnceLock,
};

use time::{OffsetDateTime, UtcOffset, format_description::FormatItem, macros::format_description};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use crate::app_dirs::{self, AppSubdir};

/// Maximum number of launch logs kept on disk.
pub const MAX_LOG_FILES: usize = 10;
const LOG_FILE_PREFIX: &str = "gestures";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Errors that may occur while initializing logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// The application directory could not be resolved or created.
    #[error(transparent)]
    AppDir(#[from] app_dirs::AppDirError),
    #[error("Log file {path} is not usable: {source}")]
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Launch time could not be formatted: {0}")]
    Timestamp(#[from] time::error::Format),
    #[error("Another tracing subscriber is already installed: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Initialize tracing to stdout plus a per-launch log file.
///
/// Subsequent calls are no-ops. Errors are returned so binaries can keep
/// running without file logging.
pub fn init() -> Result<(), LoggingError> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }
    let log_dir = app_dirs::app_subdir(AppSubdir::Logs)?;
    let file_name = log_file_name(now_local_or_utc())?;
    let log_path = log_dir.join(&file_name);
    touch(&log_path)?;
    for stale in stale_logs(&log_dir, MAX_LOG_FILES)? {
        if let Err(source) = fs::remove_file(&stale) {
            return Err(LoggingError::LogFile {
                path: stale,
                source,
            });
        }
    }

    let (file_writer, guard) = tracing_appender::non_blocking(rolling::never(&log_dir, file_name));
    let timer = local_timer();
    let subscriber = Registry::default()
        .with(env_filter())
        .with(
            fmt::layer()
                .with_timer(timer.clone())
                .with_writer(std::io::stdout),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_timer(timer)
                .with_writer(file_writer),
        );
    tracing::subscriber::set_global_default(subscriber)?;
    let _ = LOG_GUARD.set(guard);

    tracing::info!("Logging to {}", log_path.display());
    Ok(())
}

fn touch(path: &Path) -> Result<(), LoggingError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
        .map_err(|source| LoggingError::LogFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Launch logs in `dir` beyond the newest `keep`, oldest first.
fn stale_logs(dir: &Path, keep: usize) -> Result<Vec<PathBuf>, LoggingError> {
    let entries = fs::read_dir(dir).map_err(|source| LoggingError::LogFile {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut logs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| is_launch_log(path))
        .collect();
    logs.sort();
    let excess = logs.len().saturating_sub(keep);
    logs.truncate(excess);
    Ok(logs)
}

fn is_launch_log(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    path.is_file() && name.starts_with(LOG_FILE_PREFIX) && name.ends_with(".log")
}

fn log_file_name(now: OffsetDateTime) -> Result<String, LoggingError> {
    const NAME_FORMAT: &[FormatItem<'_>] =
        format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
    Ok(format!("{LOG_FILE_PREFIX}_{}.log", now.format(NAME_FORMAT)?))
}

fn local_timer() -> fmt::time::OffsetTime<time::format_description::BorrowedFormatItem<'static>> {
    const DISPLAY_FORMAT: &[FormatItem<'static>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    fmt::time::OffsetTime::new(offset, DISPLAY_FORMAT.into())
}

fn now_local_or_utc() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn log_file_name_carries_prefix_and_timestamp() {
        let fixed = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(
            log_file_name(fixed).unwrap(),
            "gestures_2023-11-14_22-13-20.log"
        );
    }

    #[test]
    fn stale_logs_are_the_oldest_launches_only() {
        let dir = tempdir().unwrap();
        for day in 1..=5 {
            let name = format!("gestures_2024-01-0{day}_08-00-00.log");
            touch(&dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("notes.log"), "keep me").unwrap();
        fs::create_dir(dir.path().join("gestures_archive.log")).unwrap();

        let stale: Vec<String> = stale_logs(dir.path(), 3)
            .unwrap()
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            stale,
            vec![
                "gestures_2024-01-01_08-00-00.log".to_string(),
                "gestures_2024-01-02_08-00-00.log".to_string(),
            ]
        );
        assert!(stale_logs(dir.path(), 10).unwrap().is_empty());
    }
}
