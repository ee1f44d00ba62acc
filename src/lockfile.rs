//! A process-exclusivity lock file: one server instance per data
//! directory. Acquired once at startup and held for the process
//! lifetime; released automatically on drop or process exit.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("I/O error opening lock file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("lock file {0} is already held by another process")]
    AlreadyLocked(PathBuf),
}

/// A held advisory lock on a file. The lock is released when this value
/// is dropped.
pub struct LockFile {
    path: PathBuf,
    file: File,
}

impl LockFile {
    /// Opens (creating if needed) `path` and takes an exclusive advisory
    /// lock on it, failing immediately rather than blocking if another
    /// process already holds it.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|source| LockError::Io {
                path: path.display().to_string(),
                source,
            })?;

        file.try_lock_exclusive().map_err(|_| LockError::AlreadyLocked(path.clone()))?;

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
