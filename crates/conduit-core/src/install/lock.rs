//! Cross-process install lock.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::error::{ConduitError, FsResultExt, Result};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exclusive advisory lock on the install lock file, released on drop.
#[derive(Debug)]
pub struct InstallLock {
    _file: File,
    path: PathBuf,
}

impl InstallLock {
    /// Takes the lock without waiting. Returns `None` when another process
    /// holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).fs_context(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .fs_context(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("acquired install lock {}", path.display());
                Ok(Some(Self {
                    _file: file,
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(ConduitError::file_system(path, e)),
        }
    }

    /// Waits for the lock, giving up when `cancel` fires.
    pub async fn acquire(path: &Path, cancel: &CancellationToken) -> Result<Self> {
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(lock);
            }
            debug!("install lock held by another process, waiting");
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ConduitError::timeout("waiting for another installation to finish"));
                }
                _ = tokio::time::sleep(LOCK_POLL_INTERVAL) => {}
            }
        }
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        // The OS lock goes away with the file handle.
        debug!("released install lock {}", self.path.display());
    }
}
