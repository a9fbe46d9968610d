//! Structured logging setup.
//!
//! Installs a global `tracing` subscriber writing compact or JSON lines to
//! stdout or to a size-rotated log file.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriter};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::LogConfig;
use crate::error::{Error, Result};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

struct RotatingFileInner {
    file: std::fs::File,
    path: PathBuf,
    max_size: u64,
    max_files: u32,
    size: u64,
}

/// Log file writer that rotates `name` → `name.1` → ... once `max_size` is hit.
#[derive(Clone)]
pub struct RotatingFileWriter {
    inner: Arc<parking_lot::Mutex<RotatingFileInner>>,
}

impl std::fmt::Debug for RotatingFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RotatingFileWriter")
            .field("path", &inner.path)
            .field("size", &inner.size)
            .finish_non_exhaustive()
    }
}

impl RotatingFileWriter {
    /// Open (or create) the log file for appending.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be opened.
    pub fn new(path: PathBuf, max_size: Option<u64>, max_files: Option<u32>) -> io::Result<Self> {
        let file = open_append(&path)?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            inner: Arc::new(parking_lot::Mutex::new(RotatingFileInner {
                file,
                path,
                max_size: max_size.unwrap_or(u64::MAX),
                max_files: max_files.unwrap_or(0),
                size,
            })),
        })
    }

    fn rotate(inner: &mut RotatingFileInner) -> io::Result<()> {
        if inner.max_files == 0 {
            return Ok(());
        }

        for idx in (1..=inner.max_files).rev() {
            let from = rotated_path(&inner.path, idx - 1);
            let to = rotated_path(&inner.path, idx);
            if from.exists() {
                let _ = std::fs::remove_file(&to);
                std::fs::rename(&from, &to)?;
            }
        }
        inner.file = open_append(&inner.path)?;
        inner.size = 0;
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<std::fs::File> {
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

fn rotated_path(path: &Path, idx: u32) -> PathBuf {
    if idx == 0 {
        return path.to_path_buf();
    }
    PathBuf::from(format!("{}.{idx}", path.display()))
}

/// Per-event handle produced by [`RotatingFileWriter`].
pub struct RotatingFileGuard {
    inner: Arc<parking_lot::Mutex<RotatingFileInner>>,
}

impl Write for RotatingFileGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock();
        let incoming = u64::try_from(buf.len()).unwrap_or(u64::MAX);
        if inner.size > 0 && inner.size.saturating_add(incoming) > inner.max_size {
            RotatingFileWriter::rotate(&mut inner)?;
        }

        let written = inner.file.write(buf)?;
        inner.size = inner
            .size
            .saturating_add(u64::try_from(written).unwrap_or(u64::MAX));
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().file.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingFileGuard;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingFileGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` directives are honoured on top of the configured level. Only
/// the first successful call installs anything; later calls return `Ok(())`.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened, if JSON output is
/// requested without the `json-logs` feature, or if another subscriber was
/// installed outside this function.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    if INITIALIZED.load(Ordering::Acquire) {
        return Ok(());
    }

    let level: tracing::Level = config.level.into();
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let writer = match &config.file {
        Some(path) => BoxMakeWriter::new(
            RotatingFileWriter::new(path.clone(), config.max_file_size, config.max_files).map_err(
                |e| {
                    Error::io_with_source(
                        format!("Failed to initialize log file at {}", path.display()),
                        e,
                    )
                },
            )?,
        ),
        None => BoxMakeWriter::new(io::stdout),
    };

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(writer);

    if config.json {
        #[cfg(feature = "json-logs")]
        {
            let subscriber = builder
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .finish();
            return install(subscriber, config);
        }

        #[cfg(not(feature = "json-logs"))]
        {
            return Err(Error::config(
                "JSON logging requested but the json-logs feature is not enabled",
            ));
        }
    }

    let subscriber = builder
        .with_ansi(config.is_colored() && config.file.is_none())
        .compact()
        .finish();
    install(subscriber, config)
}

fn install<S>(subscriber: S, config: &LogConfig) -> Result<()>
where
    S: tracing::Subscriber + Send + Sync + 'static,
{
    if INITIALIZED.swap(true, Ordering::AcqRel) {
        return Ok(());
    }
    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        INITIALIZED.store(false, Ordering::Release);
        Error::config(format!("Failed to initialize logging: {e}"))
    })?;
    debug!(level = ?config.level, json = config.json, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_keeps_limited_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.log");
        let writer = RotatingFileWriter::new(path.clone(), Some(16), Some(2)).unwrap();

        for _ in 0..4 {
            let mut guard = writer.make_writer();
            guard.write_all(b"0123456789abc\n").unwrap();
            guard.flush().unwrap();
        }

        assert!(path.exists());
        assert!(rotated_path(&path, 1).exists());
        assert!(rotated_path(&path, 2).exists());
        assert!(!rotated_path(&path, 3).exists());
        assert_eq!(std::fs::read(&path).unwrap().len(), 14);
    }

    #[test]
    fn test_init_logging_twice_is_ok() {
        let config = LogConfig::default();
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }
}
