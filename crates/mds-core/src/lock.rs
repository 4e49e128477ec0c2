//! Scope locks.
//!
//! Each scope (system, per-user, install) has one lock file. Locks are
//! advisory `flock` locks taken through `fs2`, polled with a bounded backoff
//! so a wedged peer turns into [`MdsError::LockTimeout`] rather than a hang.
//! Lock files are never removed: unlinking a locked file would let the next
//! process lock a fresh inode while the old holder still believes it owns
//! the path.

use crate::config::DirectoryConfig;
use crate::error::{MdsError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// A held scope lock. Released on drop or by [`ScopeLock::release`].
#[derive(Debug)]
pub struct ScopeLock {
    file: Option<File>,
    path: PathBuf,
    mode: LockMode,
}

impl ScopeLock {
    /// Take the exclusive lock on `path`, creating the lock file with `mode`
    /// if needed.
    pub fn acquire(path: &Path, mode: u32, timeout: Duration) -> Result<Self> {
        let file = open_lock_file(path, Some(mode))?;
        Self::lock_with_timeout(file, path, LockMode::Exclusive, timeout)
    }

    /// Take a shared lock on an existing lock file.
    ///
    /// Returns `Ok(None)` when the lock file does not exist: no writer has
    /// ever held that scope, so there is nothing to wait for.
    pub fn acquire_shared(path: &Path, timeout: Duration) -> Result<Option<Self>> {
        let file = match open_lock_file(path, None) {
            Ok(file) => file,
            Err(MdsError::Io {
                source: Some(ref e),
                ..
            }) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Self::lock_with_timeout(file, path, LockMode::Shared, timeout).map(Some)
    }

    fn lock_with_timeout(
        file: File,
        path: &Path,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<Self> {
        let deadline = Instant::now() + timeout;
        let mut backoff = DirectoryConfig::LOCK_BACKOFF_START;

        loop {
            let attempt = match mode {
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
                LockMode::Shared => FileExt::try_lock_shared(&file),
            };

            match attempt {
                Ok(()) => {
                    debug!("Acquired {:?} lock {}", mode, path.display());
                    return Ok(Self {
                        file: Some(file),
                        path: path.to_path_buf(),
                        mode,
                    });
                }
                Err(e) if is_contended(&e) => {}
                Err(e) => return Err(MdsError::io_with_path(e, path)),
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "Timed out acquiring {:?} lock {} after {:?}",
                    mode,
                    path.display(),
                    timeout
                );
                return Err(MdsError::LockTimeout {
                    path: path.to_path_buf(),
                    timeout,
                });
            }

            std::thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(DirectoryConfig::LOCK_BACKOFF_MAX);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Release the lock now. Dropping the guard has the same effect.
    pub fn release(mut self) {
        self.unlock();
    }

    fn unlock(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                warn!("Failed to unlock {}: {}", self.path.display(), e);
            } else {
                debug!("Released {:?} lock {}", self.mode, self.path.display());
            }
        }
    }
}

impl Drop for ScopeLock {
    fn drop(&mut self) {
        self.unlock();
    }
}

fn open_lock_file(path: &Path, create_mode: Option<u32>) -> Result<File> {
    let mut options = OpenOptions::new();
    match create_mode {
        Some(mode) => {
            options.read(true).write(true).create(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(mode);
            }
            #[cfg(not(unix))]
            let _ = mode;
        }
        None => {
            options.read(true);
        }
    }
    options.open(path).map_err(|e| MdsError::Io {
        message: format!("Cannot open lock file {}: {}", path.display(), e),
        path: Some(path.to_path_buf()),
        source: Some(e),
    })
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
