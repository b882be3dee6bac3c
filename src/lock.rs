//! Advisory OS lock guarding the cursor file against a second process.

use std::fs::File;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{CellfetchError, Result};

/// Exclusive lock held for the lifetime of the value. Released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Create (if needed) and exclusively lock `path` without blocking.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = fs_err::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?
            .into_parts()
            .0;
        file.try_lock_exclusive()
            .map_err(|err| CellfetchError::Lock {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;
        tracing::debug!(path = %path.display(), "cursor lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to release cursor lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_lock_is_refused_until_first_drops() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("cursor.lck");

        let first = FileLock::acquire(&path).expect("first lock");
        let err = FileLock::acquire(&path).expect_err("second lock must fail");
        assert!(matches!(err, CellfetchError::Lock { .. }));

        drop(first);
        FileLock::acquire(&path).expect("lock after release");
    }
}
