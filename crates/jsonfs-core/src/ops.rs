//! Filesystem call contract.
//!
//! Everything a mount adapter needs, expressed on slash-separated paths.
//! There is no open-handle table: every call re-resolves its path.

use crate::error::{FsError, FsResult};
use crate::types::{DirEntry, FileAttr};

/// Core filesystem operations.
///
/// Calls are synchronous and bounded; implementations serialize mutations
/// internally so the trait can be shared across adapter worker threads.
pub trait FsOps: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Get node attributes.
    fn getattr(&self, path: &str) -> FsResult<FileAttr>;

    /// List a directory: `.` and `..` first, then entries in insertion order.
    fn readdir(&self, path: &str) -> FsResult<Vec<DirEntry>>;

    /// Check that `path` is a file. No state changes.
    fn open(&self, path: &str) -> FsResult<()>;

    /// Read up to `size` bytes starting at `offset`.
    ///
    /// Returns fewer bytes at end of file, none at or past it.
    fn read(&self, path: &str, offset: u64, size: usize) -> FsResult<Vec<u8>>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Write `data` at `offset`, returning the number of bytes written.
    fn write(&self, path: &str, offset: u64, data: &[u8]) -> FsResult<usize>;

    /// Create an empty file.
    fn create(&self, path: &str) -> FsResult<FileAttr>;

    /// Create an empty directory.
    fn mkdir(&self, path: &str) -> FsResult<FileAttr>;

    /// Remove a file.
    fn unlink(&self, path: &str) -> FsResult<()>;

    /// Remove an empty directory.
    fn rmdir(&self, path: &str) -> FsResult<()>;

    /// Resize a file to exactly `size` bytes.
    fn truncate(&self, path: &str, size: u64) -> FsResult<()>;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    fn exists(&self, path: &str) -> bool {
        self.getattr(path).is_ok()
    }

    /// Read entire file contents.
    fn read_all(&self, path: &str) -> FsResult<Vec<u8>> {
        let attr = self.getattr(path)?;
        if attr.is_dir() {
            return Err(FsError::is_a_directory(path));
        }
        let size = usize::try_from(attr.size)
            .map_err(|_| FsError::invalid(format!("{path} does not fit in memory")))?;
        self.read(path, 0, size)
    }

    /// Replace a file's contents, creating it if needed.
    fn write_all(&self, path: &str, data: &[u8]) -> FsResult<()> {
        if self.exists(path) {
            self.truncate(path, 0)?;
        } else {
            self.create(path)?;
        }
        self.write(path, 0, data)?;
        Ok(())
    }
}
