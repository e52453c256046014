//! Cross-process advisory file locks.
//!
//! Plugin checkouts and mirror updates are guarded by OS-level advisory
//! locks so two executors sharing a plugins or mirror directory cannot
//! race each other. Acquisition polls with a bounded deadline and
//! respects job cancellation; the lock releases on drop.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {timeout:?} waiting for lock at {path}")]
    Timeout { path: PathBuf, timeout: Duration },

    #[error("cancelled while waiting for lock at {path}")]
    Cancelled { path: PathBuf },

    #[error("lock error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An exclusively held advisory lock. Unlocks when dropped; the lock file
/// itself is left in place for the next taker.
#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
}

impl LockFile {
    /// Take the lock immediately or report that someone else holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, LockError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|source| LockError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(source) => Err(LockError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Poll for the lock until `timeout` elapses or the job is cancelled.
    pub async fn acquire(
        path: &Path,
        timeout: Duration,
        cancel: &crate::cancel::CancelToken,
    ) -> Result<Self, LockError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(lock);
            }
            if cancel.is_cancelled() {
                return Err(LockError::Cancelled {
                    path: path.to_path_buf(),
                });
            }
            if Instant::now() >= deadline {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    timeout,
                });
            }
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = cancel.cancelled() => {
                    return Err(LockError::Cancelled { path: path.to_path_buf() });
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
