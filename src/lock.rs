//! Cross-process exclusivity guard.
//!
//! A cooperative advisory lock on a filesystem path. Acquisition polls
//! `try_lock_exclusive` until a deadline, so two collector processes on the
//! same machine can never operate on the same instrument set at once. The
//! returned [`LockGuard`] releases the lock on drop, which covers normal
//! return, error propagation, and signal-driven shutdown alike.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs4::FileExt;
use thiserror::Error;
use tokio::time::Instant;

/// Default bounded wait for lock acquisition.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Advisory message printed when another instance holds the lock.
pub const LOCK_HINT: &str = "Another instance of this application currently holds the lock.";

/// Delay between acquisition attempts.
const RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Errors that can occur while acquiring the lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process held the lock past the wait bound.
    #[error("timed out waiting for lock on {0}")]
    Timeout(PathBuf),

    /// The lock file could not be opened or locked.
    #[error("lock i/o error: {0}")]
    Io(#[from] io::Error),
}

/// A lock bound to a filesystem path.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock, waiting up to `timeout`.
    ///
    /// # Errors
    /// Returns `LockError::Timeout` if the lock is still held when the
    /// deadline passes, `LockError::Io` on any other filesystem failure.
    pub async fn acquire(&self, timeout: Duration) -> Result<LockGuard, LockError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.path)?;
        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    tracing::debug!(path = %self.path.display(), "Lock acquired");
                    return Ok(LockGuard {
                        file,
                        path: self.path.clone(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::Timeout(self.path.clone()));
            }
            tokio::time::sleep(RETRY_INTERVAL.min(deadline - now)).await;
        }
    }
}

/// Scoped handle to a held lock; unlocks on drop.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release lock");
        } else {
            tracing::debug!(path = %self.path.display(), "Lock released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");
        let lock = FileLock::new(&path);

        let guard = lock.acquire(Duration::from_millis(100)).await.unwrap();
        drop(guard);

        // Released locks can be re-acquired immediately.
        let guard = lock.acquire(Duration::from_millis(100)).await.unwrap();
        drop(guard);
    }

    #[tokio::test]
    async fn test_second_acquire_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");

        let holder = FileLock::new(&path);
        let _guard = holder.acquire(Duration::from_millis(100)).await.unwrap();

        // A second handle on the same path observes the exclusion.
        let contender = FileLock::new(&path);
        let err = contender
            .acquire(Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout(_)));
        assert!(err.to_string().contains("timed out waiting for lock"));
    }

    #[tokio::test]
    async fn test_acquire_succeeds_after_holder_drops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");

        let holder = FileLock::new(&path);
        let guard = holder.acquire(Duration::from_millis(100)).await.unwrap();

        let contender = FileLock::new(&path);
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            drop(guard);
        });

        // Within the bounded wait the holder releases, so this succeeds.
        let reacquired = contender.acquire(Duration::from_secs(5)).await;
        assert!(reacquired.is_ok());
        release.await.unwrap();
    }
}
