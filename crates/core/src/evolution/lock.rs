//! Advisory lock serializing index updates across processes.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::errors::StoreError;

/// Exclusive project lock backed by `<storage>/LOCK`.
/// Released when dropped.
pub struct ProjectLock {
    _file: File,
    path: PathBuf,
}

impl ProjectLock {
    pub const FILE_NAME: &'static str = "LOCK";

    /// Block until the lock is held.
    pub fn acquire(storage_dir: &Path) -> Result<Self, StoreError> {
        let (file, path) = Self::open(storage_dir)?;
        file.lock_exclusive().map_err(|e| StoreError::LockFailed {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        debug!(path = %path.display(), "acquired project lock");
        Ok(Self { _file: file, path })
    }

    /// Take the lock without waiting; fails if another holder has it.
    pub fn try_acquire(storage_dir: &Path) -> Result<Self, StoreError> {
        let (file, path) = Self::open(storage_dir)?;
        file.try_lock_exclusive()
            .map_err(|_| StoreError::LockFailed {
                path: path.display().to_string(),
                detail: "locked by another process".into(),
            })?;
        Ok(Self { _file: file, path })
    }

    fn open(storage_dir: &Path) -> Result<(File, PathBuf), StoreError> {
        fs::create_dir_all(storage_dir)?;
        let path = storage_dir.join(Self::FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| StoreError::LockFailed {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?;
        Ok((file, path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_drop() {
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path().join(".taskmerge");

        let lock = ProjectLock::acquire(&storage).unwrap();
        assert!(lock.path().ends_with("LOCK"));
        assert!(matches!(
            ProjectLock::try_acquire(&storage),
            Err(StoreError::LockFailed { .. })
        ));
        drop(lock);
        let _again = ProjectLock::try_acquire(&storage).unwrap();
    }
}
