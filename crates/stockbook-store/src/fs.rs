//! File primitives used for backup and restore.

use std::io;
use std::path::Path;

/// Blocking file operations.
pub trait FileOps {
    /// Copy `from` over `to`, returning the number of bytes copied.
    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64>;

    /// Check whether a regular file exists at `path`.
    fn file_exists(&self, path: &Path) -> bool;

    /// Create a directory and all of its parents.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// [`FileOps`] backed by the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl FileOps for LocalFs {
    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64> {
        let bytes = std::fs::copy(from, to)?;
        // The copy must be durable before it is reported.
        std::fs::OpenOptions::new().write(true).open(to)?.sync_all()?;
        Ok(bytes)
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }
}
