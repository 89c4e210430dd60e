//! Structured logging system
//!
//! This module provides structured logging with:
//! - JSON and text format support
//! - Configurable log levels, overridable through `RUST_LOG`
//! - Log rotation with size limits
//!
//! Command output goes to stdout, so diagnostics default to stderr.

use crate::core::config::LoggingConfig;
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Target used for messages forwarded from extension scripts
pub const SCRIPT_TARGET: &str = "streambox::script";

/// Logger instance that manages the logging system
pub struct Logger {
    _guard: Option<WorkerGuard>,
}

impl Logger {
    /// Initialize the logging system based on configuration
    ///
    /// The returned value owns the background writer and must be kept alive
    /// for the lifetime of the process.
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let level = parse_log_level(&config.level)?;

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

        let (writer, guard) = match config.output.as_str() {
            "stdout" => tracing_appender::non_blocking(io::stdout()),
            "stderr" => tracing_appender::non_blocking(io::stderr()),
            "file" => {
                let log_file = config
                    .log_file
                    .as_ref()
                    .context("log_file must be specified when output is 'file'")?;

                if let Some(parent) = log_file.parent() {
                    std::fs::create_dir_all(parent).context("Failed to create log directory")?;
                }

                let file_appender =
                    create_rolling_appender(log_file, config.max_file_size, config.max_backups)?;
                tracing_appender::non_blocking(file_appender)
            }
            _ => {
                anyhow::bail!("Invalid output configuration: {}", config.output);
            }
        };

        let fmt_layer = match config.format.as_str() {
            "json" => fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true)
                .with_thread_names(true)
                .with_target(true)
                .boxed(),
            "text" => fmt::layer()
                .with_writer(writer)
                .with_ansi(config.output != "file")
                .with_thread_names(true)
                .with_target(true)
                .boxed(),
            _ => {
                anyhow::bail!("Invalid format configuration: {}", config.format);
            }
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .context("Failed to initialize tracing subscriber")?;

        tracing::debug!(
            level = %config.level,
            format = %config.format,
            output = %config.output,
            "Logging system initialized"
        );

        Ok(Logger {
            _guard: Some(guard),
        })
    }
}

/// Parse log level string to tracing Level
fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("Invalid log level: {}", level),
    }
}

fn create_rolling_appender(
    log_file: &Path,
    max_file_size: usize,
    max_backups: usize,
) -> Result<RollingFileAppender> {
    let directory = log_file
        .parent()
        .context("Log file must have a parent directory")?;

    let filename = log_file
        .file_name()
        .context("Log file must have a filename")?
        .to_str()
        .context("Log filename must be valid UTF-8")?;

    Ok(RollingFileAppender::new(
        directory.to_path_buf(),
        filename.to_string(),
        max_file_size,
        max_backups,
    ))
}

/// Rolling file appender that rotates based on file size
pub struct RollingFileAppender {
    directory: PathBuf,
    filename: String,
    max_file_size: usize,
    max_backups: usize,
    current_file: Mutex<Option<File>>,
    current_size: AtomicUsize,
}

impl RollingFileAppender {
    pub fn new(directory: PathBuf, filename: String, max_file_size: usize, max_backups: usize) -> Self {
        Self {
            directory,
            filename,
            max_file_size,
            max_backups,
            current_file: Mutex::new(None),
            current_size: AtomicUsize::new(0),
        }
    }

    fn current_path(&self) -> PathBuf {
        self.directory.join(&self.filename)
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        self.directory.join(format!("{}.{}", self.filename, index))
    }

    fn lock_file(&self) -> io::Result<MutexGuard<'_, Option<File>>> {
        self.current_file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))
    }

    /// Shift `name.N` to `name.N+1`, dropping the oldest, then move the live file to `name.1`
    fn rotate(&self) -> io::Result<()> {
        *self.lock_file()? = None;

        for i in (1..self.max_backups).rev() {
            let from = self.backup_path(i);
            let to = self.backup_path(i + 1);

            if from.exists() {
                if to.exists() {
                    std::fs::remove_file(&to)?;
                }
                std::fs::rename(&from, &to)?;
            }
        }

        let current = self.current_path();
        if current.exists() {
            let backup = self.backup_path(1);
            if backup.exists() {
                std::fs::remove_file(&backup)?;
            }
            std::fs::rename(&current, &backup)?;
        }

        self.current_size.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn open_file(&self) -> io::Result<MutexGuard<'_, Option<File>>> {
        let mut file_guard = self.lock_file()?;

        if file_guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.current_path())?;

            self.current_size
                .store(file.metadata()?.len() as usize, Ordering::SeqCst);
            *file_guard = Some(file);
        }

        Ok(file_guard)
    }
}

impl io::Write for RollingFileAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let current_size = self.current_size.load(Ordering::SeqCst);
        if current_size > 0 && current_size + buf.len() > self.max_file_size {
            self.rotate()?;
        }

        let mut file_guard = self.open_file()?;
        let written = match file_guard.as_mut() {
            Some(file) => file.write(buf)?,
            None => return Err(io::Error::new(io::ErrorKind::NotFound, "log file not open")),
        };

        self.current_size.fetch_add(written, Ordering::SeqCst);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut file_guard = self.open_file()?;
        if let Some(file) = file_guard.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("DEBUG"), Ok(Level::DEBUG)));
        assert!(matches!(parse_log_level("info"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));
        assert!(matches!(parse_log_level("error"), Ok(Level::ERROR)));
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_rolling_appender_paths() {
        let appender = RollingFileAppender::new(PathBuf::from("/tmp/logs"), "streambox.log".to_string(), 1024, 5);

        assert_eq!(appender.current_path(), PathBuf::from("/tmp/logs/streambox.log"));
        assert_eq!(appender.backup_path(1), PathBuf::from("/tmp/logs/streambox.log.1"));
        assert_eq!(appender.backup_path(2), PathBuf::from("/tmp/logs/streambox.log.2"));
    }

    #[test]
    fn test_rolling_appender_rotates_by_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut appender = RollingFileAppender::new(dir.path().to_path_buf(), "streambox.log".to_string(), 16, 2);

        appender.write_all(b"0123456789\n").unwrap();
        appender.write_all(b"abcdefghij\n").unwrap();
        appender.write_all(b"ABCDEFGHIJ\n").unwrap();
        appender.flush().unwrap();

        assert!(dir.path().join("streambox.log").exists());
        assert!(dir.path().join("streambox.log.1").exists());
        assert!(dir.path().join("streambox.log.2").exists());
        assert!(!dir.path().join("streambox.log.3").exists());

        let live = std::fs::read_to_string(dir.path().join("streambox.log")).unwrap();
        assert_eq!(live, "ABCDEFGHIJ\n");
    }
}
