//! Exclusive lock on the work directory.
//!
//! Only one process may check out repositories into a work directory at a
//! time. The lock is an OS-level file lock on `<work_dir>/.layerpin.lock`,
//! so it disappears together with the process that held it; an aborted run
//! never leaves stale lock state behind.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::debug;

use crate::error::{Error, Result};

/// Lock file name inside the work directory.
pub const LOCK_FILE_NAME: &str = ".layerpin.lock";

/// Guard holding the work-directory lock. Released on drop.
#[derive(Debug)]
pub struct WorkdirLock {
    path: PathBuf,
    file: Option<File>,
}

impl WorkdirLock {
    /// Acquire the lock without blocking.
    ///
    /// # Errors
    ///
    /// - [`Error::WorkdirLocked`] if another process holds it
    /// - [`Error::Io`] if the lock file cannot be created
    pub fn acquire(work_dir: &Path) -> Result<Self> {
        fs::create_dir_all(work_dir)?;
        let path = work_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired work directory lock {}", path.display());
                Ok(Self {
                    path,
                    file: Some(file),
                })
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
            {
                Err(Error::WorkdirLocked {
                    path: work_dir.to_path_buf(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for WorkdirLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
            debug!("Released work directory lock {}", self.path.display());
        }
    }
}
