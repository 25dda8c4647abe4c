use std::path::{Path, PathBuf};

use crate::lock::FileLock;

/// Durable id of the most recently notified report.
#[derive(Debug, Clone)]
pub struct LastSeenStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl LastSeenStore {
    pub fn new(path: impl Into<PathBuf>, lock_path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock_path: lock_path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file and unparsable content both read as `None`.
    pub fn read(&self) -> Option<i64> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        raw.trim().parse().ok()
    }

    /// Overwrites the stored id under the file lock. A `false` return leaves
    /// the previous id authoritative.
    pub fn write(&self, id: i64) -> bool {
        let result = FileLock::acquire(&self.lock_path)
            .and_then(|_guard| std::fs::write(&self.path, id.to_string()));
        match result {
            Ok(()) => {
                tracing::debug!("stored last report id {}", id);
                true
            }
            Err(e) => {
                tracing::warn!("could not persist report id {} to {}: {}", id, self.path.display(), e);
                false
            }
        }
    }
}
