//! Cooperative cross-process locking on a lock file.
//!
//! Only processes that go through [`FileLock::acquire`] on the same path are
//! excluded from each other. The lock is tied to the open file handle, so two
//! acquisitions inside one process also exclude each other.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

pub struct FileLock;

/// Held lock. Released when dropped.
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Blocks until the exclusive lock on `path` is held.
    pub fn acquire(path: &Path) -> io::Result<FileLockGuard> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        FileExt::lock_exclusive(&file)?;
        tracing::debug!("acquired lock {}", path.display());
        Ok(FileLockGuard { file, path: path.to_path_buf() })
    }
}

impl FileLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("failed to release lock {}: {}", self.path.display(), e);
        } else {
            tracing::debug!("released lock {}", self.path.display());
        }
    }
}
