//! File-logging bootstrap.
//!
//! Initializes a rotating file logger exactly once per process. Managers and
//! the facade emit through the `log` macros; callers that never call
//! [`init`] simply get no log output.

use crate::error::{Error, Result};
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "secretary";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 1_048_576;
const MAX_LOG_FILES: usize = 3;

static LOGGER: OnceCell<LoggingState> = OnceCell::new();

struct LoggingState {
    log_dir: PathBuf,
    _handle: LoggerHandle,
}

/// Initialize the file logger for a log directory.
///
/// The first call wins: later calls are no-ops, even with a different
/// directory, so opening several tracked directories in one process keeps
/// working. Never panics.
///
/// # Errors
///
/// Returns an error if the level is unsupported or the directory cannot be
/// created on the first call.
pub fn init(level: &str, log_dir: &Path) -> Result<()> {
    let state = LOGGER.get_or_try_init(|| -> Result<LoggingState> {
        std::fs::create_dir_all(log_dir)?;

        let handle = Logger::try_with_str(level)
            .map_err(|err| {
                Error::Io(std::io::Error::other(format!("invalid log level `{level}`: {err}")))
            })?
            .log_to_file(FileSpec::default().directory(log_dir).basename(LOG_FILE_BASENAME))
            .rotate(
                Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(MAX_LOG_FILES),
            )
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            .format_for_files(flexi_logger::detailed_format)
            .start()
            .map_err(|err| {
                Error::Io(std::io::Error::other(format!("failed to start logger: {err}")))
            })?;

        log::info!("logging started, version {}", crate::VERSION);
        Ok(LoggingState { log_dir: log_dir.to_path_buf(), _handle: handle })
    })?;

    if state.log_dir != log_dir {
        log::debug!(
            "logging already initialized at `{}`, keeping it",
            state.log_dir.display()
        );
    }

    Ok(())
}

/// The directory the active logger writes to, if logging is initialized.
#[must_use]
pub fn log_dir() -> Option<PathBuf> {
    LOGGER.get().map(|state| state.log_dir.clone())
}
