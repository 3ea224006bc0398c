//! Advisory cross-process locks backed by `flock(2)`.
//!
//! A `ReferenceLock` guards one backup directory while it is used as an
//! incremental reference or moved/removed. Acquisition never waits: a lock
//! held elsewhere means another process (a deletion tool, a cleanup job) is
//! working on that directory right now. The lock is released when the guard
//! is dropped, so every exit path of a guarded operation lets go of it.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::error::{Result, SnapvaultError};

pub struct ReferenceLock {
    path: PathBuf,
    _lock: Flock<File>,
}

impl std::fmt::Debug for ReferenceLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceLock")
            .field("path", &self.path)
            .finish()
    }
}

impl ReferenceLock {
    /// Returns `Ok(None)` at once if the lock is held by someone else.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SnapvaultError::message(format!("create {}: {}", parent.display(), e)))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| SnapvaultError::message(format!("open {}: {}", path.display(), e)))?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                tracing::trace!(path = %path.display(), "lock acquired");
                Ok(Some(Self {
                    path: path.to_path_buf(),
                    _lock: lock,
                }))
            }
            Err((_, Errno::EWOULDBLOCK)) => {
                tracing::debug!(path = %path.display(), "lock busy");
                Ok(None)
            }
            Err((_, errno)) => Err(SnapvaultError::message(format!(
                "lock {}: {}",
                path.display(),
                errno
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(self) {
        tracing::trace!(path = %self.path.display(), "lock released");
    }

    /// Removes the lock file and releases the lock. Used once the guarded
    /// directory itself has been deleted.
    pub fn discard(self) -> Result<()> {
        crate::util::paths::remove_file_if_exists(&self.path)?;
        self.release();
        Ok(())
    }
}
