//! Advisory file lock keeping a second daemon off the same pid file.

use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, ErrorCode, Result};

/// Exclusive lock held for the lifetime of the daemon.
#[derive(Debug)]
pub struct InstanceLock {
    file: Option<File>,
    path: PathBuf,
}

impl InstanceLock {
    /// Lock manager for `path`. Nothing is opened until [`lock`](Self::lock).
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            file: None,
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Lock manager for the `<pid_file>.lock` sibling of a pid file.
    pub fn for_pid_file<P: AsRef<Path>>(pid_file: P) -> Self {
        let mut path = pid_file.as_ref().as_os_str().to_os_string();
        path.push(".lock");
        Self::new(PathBuf::from(path))
    }

    /// Location of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock without blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, or `LockFailed` if
    /// another process holds it.
    pub fn lock(&mut self) -> Result<()> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| {
                Error::io_with_source(
                    format!("Failed to open or create lock file at {}", self.path.display()),
                    e,
                )
            })?;

        file.try_lock_exclusive().map_err(|e| {
            Error::runtime_with_source(
                ErrorCode::LockFailed,
                format!(
                    "Failed to lock {}, another instance may be running",
                    self.path.display()
                ),
                e,
            )
        })?;

        debug!(path = %self.path.display(), "Instance lock acquired");
        self.file = Some(file);
        Ok(())
    }

    /// Release the lock if held.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be unlocked.
    pub fn unlock(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            FileExt::unlock(&file).map_err(|e| {
                Error::io_with_source(
                    format!("Failed to release lock on {}", self.path.display()),
                    e,
                )
            })?;
        }
        Ok(())
    }

    /// Check if the lock is currently held by this instance.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if self.is_locked() {
            let _ = self.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_lock_is_refused() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("test.lock");

        let mut first = InstanceLock::new(&lock_path);
        assert!(first.lock().is_ok());
        assert!(first.is_locked());

        let mut second = InstanceLock::new(&lock_path);
        let err = second.lock().unwrap_err();
        assert_eq!(err.code(), ErrorCode::LockFailed);
        assert!(!second.is_locked());

        assert!(first.unlock().is_ok());
        assert!(second.lock().is_ok());
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("daemon.pid");

        {
            let mut lock = InstanceLock::for_pid_file(&pid_file);
            assert_eq!(lock.path(), dir.path().join("daemon.pid.lock"));
            assert!(lock.lock().is_ok());
        }

        let mut again = InstanceLock::for_pid_file(&pid_file);
        assert!(again.lock().is_ok());
    }
}
