//! # Structured Logging
//!
//! Process-wide `tracing` setup for hosts that do not install their own
//! subscriber, plus the optional per-event log sink used by the tracker.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::types::{Result, TrackedError, TrackerError};

// Flag to track if logging has been initialized
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// The log level to use (trace, debug, info, warn, error)
    pub level: String,
    /// The service name for identification
    pub service_name: String,
    /// Whether to use JSON formatting
    pub json_format: bool,
    /// Directory for a daily rolling copy of the log, if any
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "error-tracker".to_string(),
            json_format: true,
            log_dir: None,
        }
    }
}

/// Initializes the structured logging system. Later calls are no-ops.
pub fn init_logging(config: Option<LoggingConfig>) -> Result<()> {
    if LOGGING_INITIALIZED.load(Ordering::SeqCst) {
        return Ok(());
    }

    let config = config.unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},warn", config.level)));

    let file_layer = config.log_dir.as_ref().map(|log_dir| {
        let file_appender = RollingFileAppender::new(
            Rotation::DAILY,
            log_dir,
            format!("{}.log", config.service_name),
        );
        let (non_blocking, guard) = NonBlocking::new(file_appender);

        // Keep the guard alive for the lifetime of the program
        Box::leak(Box::new(guard));

        fmt::layer().with_writer(non_blocking).with_ansi(false)
    });

    let subscriber = Registry::default().with(filter).with(file_layer);

    // JSON and text layers have different concrete types, so each branch
    // installs its own subscriber.
    let installed = if config.json_format {
        let json_layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true);
        tracing::subscriber::set_global_default(subscriber.with(json_layer))
    } else {
        let text_layer = fmt::layer().with_target(true).with_thread_ids(true);
        tracing::subscriber::set_global_default(subscriber.with(text_layer))
    };

    installed.map_err(|e| {
        TrackerError::Initialization(format!("Failed to set global subscriber: {}", e))
    })?;

    LOGGING_INITIALIZED.store(true, Ordering::SeqCst);

    tracing::info!(
        service = %config.service_name,
        level = %config.level,
        json = %config.json_format,
        "Structured logging initialized"
    );

    Ok(())
}

impl TryFrom<config::Config> for LoggingConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        // Start from defaults and selectively override from the provided config.
        let mut base = LoggingConfig::default();

        if let Ok(level) = cfg.get::<String>("logging.level") {
            base.level = level;
        }
        if let Ok(service_name) = cfg.get::<String>("logging.service_name") {
            base.service_name = service_name;
        }
        if let Ok(json_format) = cfg.get::<bool>("logging.json_format") {
            base.json_format = json_format;
        }
        if let Ok(log_dir) = cfg.get::<String>("logging.log_dir") {
            base.log_dir = Some(log_dir);
        }

        Ok(base)
    }
}

/// Append-only event log, one line per tracked event.
///
/// Lines go through a non-blocking writer: the calling request thread only
/// enqueues, a background thread does the file I/O, and a full queue drops
/// lines instead of waiting. Nothing reads the file back.
#[derive(Debug)]
pub struct EventLogSink {
    writer: NonBlocking,
    _guard: WorkerGuard,
}

impl EventLogSink {
    /// Opens (or creates) the log file at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let directory = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                TrackerError::LogSink(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("log path has no file name: {}", path.display()),
                ))
            })?;

        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(file_name)
            .build(directory)
            .map_err(|e| {
                TrackerError::LogSink(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    e.to_string(),
                ))
            })?;

        let (writer, guard) = NonBlocking::new(appender);
        Ok(Self {
            writer,
            _guard: guard,
        })
    }

    /// Writes one event line; failures are logged and swallowed
    pub fn write_event(&self, event: &TrackedError) {
        let mut line = event.log_line();
        line.push('\n');

        let mut writer = self.writer.clone();
        if let Err(e) = writer.write_all(line.as_bytes()) {
            warn!(error = %e, kind = %event.kind, "Failed to write tracked error to log sink");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_from_config() {
        let cfg = config::Config::builder()
            .set_override("logging.level", "debug")
            .unwrap()
            .set_override("logging.json_format", false)
            .unwrap()
            .build()
            .unwrap();

        let config = LoggingConfig::try_from(cfg).unwrap();
        assert_eq!(config.level, "debug");
        assert!(!config.json_format);
        assert_eq!(config.service_name, "error-tracker");
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_sink_rejects_path_without_file_name() {
        let result = EventLogSink::open(Path::new("/"));
        assert!(matches!(result, Err(TrackerError::LogSink(_))));
    }
}
