//! # Logging Setup
//!
//! Configures the `tracing` subscriber used by receiver processes:
//! - The level comes from `RUST_LOG` when set, otherwise from the options.
//! - Console output is human-readable with ANSI colors.
//! - File output is JSON, written to a daily rotating file through a
//!   non-blocking appender.

use std::path::PathBuf;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid log filter '{filter}': {source}")]
    Filter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInstalled(#[source] tracing_subscriber::util::TryInitError),
}

/// Where and how much to log.
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Directory for the rolling JSON log files. `None` disables file output.
    pub log_dir: Option<PathBuf>,
    /// File name prefix; the appender adds the date suffix.
    pub file_prefix: String,
    /// Filter directive used when `RUST_LOG` is not set (e.g. "info").
    pub level: String,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            log_dir: Some(PathBuf::from("logs")),
            file_prefix: "receiver".to_string(),
            level: "info".to_string(),
        }
    }
}

/// Builds the filter from `RUST_LOG`, falling back to `level`.
pub fn build_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(level).map_err(|source| LoggingError::Filter {
            filter: level.to_string(),
            source,
        })
    })
}

/// Installs the global subscriber.
///
/// The returned guard flushes the file appender when dropped, so the caller
/// must keep it alive for the lifetime of the process.
pub fn setup_logging(options: &LoggingOptions) -> Result<Option<WorkerGuard>, LoggingError> {
    let env_filter = build_filter(&options.level)?;
    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    let Some(log_dir) = &options.log_dir else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()
            .map_err(LoggingError::AlreadyInstalled)?;
        tracing::info!(level = %options.level, "logging initialized (console only)");
        return Ok(None);
    };

    std::fs::create_dir_all(log_dir).map_err(|source| LoggingError::CreateDir {
        path: log_dir.clone(),
        source,
    })?;

    let file_appender = rolling::daily(log_dir, &options.file_prefix);
    let (non_blocking_appender, guard) = non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_appender)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(LoggingError::AlreadyInstalled)?;

    tracing::info!(level = %options.level, dir = %log_dir.display(), "logging initialized");
    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_level() {
        // Only meaningful when RUST_LOG does not override the fallback.
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(matches!(
                build_filter("lib_common=loudest"),
                Err(LoggingError::Filter { .. })
            ));
        }
    }

    #[test]
    fn accepts_module_directives() {
        assert!(build_filter("lib_common=debug,info").is_ok());
    }
}
