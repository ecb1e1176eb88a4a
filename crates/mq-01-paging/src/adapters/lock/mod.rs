//! # Paging Directory Lock
//!
//! Keeps two brokers from paging into the same directory. Uses `fs2`
//! (flock on Unix, LockFile on Windows) on a `LOCK` file holding the owner PID.
//!
//! The file is never deleted. Every contender locks the same inode, and the
//! operating system drops the lock when its holder exits.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use thiserror::Error;

#[cfg(test)]
mod tests;

/// How long `acquire` keeps retrying a held lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Cannot create lock file {path}: {source}")]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Paging directory {path} is in use by process {pid:?}")]
    AlreadyLocked { pid: Option<u32>, path: PathBuf },
}

/// Exclusive lock on a paging directory, released on drop.
#[derive(Debug)]
pub struct DirectoryLock {
    file: File,
    path: PathBuf,
    pid: u32,
}

impl DirectoryLock {
    const LOCK_FILE: &'static str = "LOCK";

    pub fn acquire(dir: &Path) -> Result<Self, LockError> {
        Self::acquire_with_timeout(dir, DEFAULT_LOCK_TIMEOUT)
    }

    /// Take the lock, retrying with backoff until `timeout`.
    ///
    /// A PID left in the file by a process that died is overwritten.
    pub fn acquire_with_timeout(dir: &Path, timeout: Duration) -> Result<Self, LockError> {
        let path = dir.join(Self::LOCK_FILE);
        let deadline = Instant::now() + timeout;
        let mut delay = Duration::from_millis(20);

        loop {
            let mut file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .map_err(|source| LockError::CreateFailed {
                    path: path.clone(),
                    source,
                })?;

            if file.try_lock_exclusive().is_ok() {
                let pid = std::process::id();
                file.set_len(0)
                    .and_then(|_| writeln!(file, "{}", pid))
                    .and_then(|_| file.sync_all())
                    .map_err(|source| LockError::CreateFailed {
                        path: path.clone(),
                        source,
                    })?;
                tracing::debug!("[mq-01] 🔒 Locked {}", path.display());
                return Ok(Self { file, path, pid });
            }

            let holder = Self::read_pid(&mut file);
            drop(file);

            if Instant::now() >= deadline {
                return Err(LockError::AlreadyLocked { pid: holder, path });
            }
            std::thread::sleep(delay);
            delay = (delay * 2).min(Duration::from_millis(500));
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_pid(file: &mut File) -> Option<u32> {
        let mut text = String::new();
        file.read_to_string(&mut text).ok()?;
        text.trim().parse().ok()
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        #[allow(clippy::incompatible_msrv)]
        let _ = FileExt::unlock(&self.file);
        tracing::debug!("[mq-01] 🔓 Unlocked {}", self.path.display());
    }
}
