//! Concurrent offset writer for a mission's backing file.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
#[cfg(unix)]
use std::os::unix::fs::FileExt;

/// Writer for a mission's backing file. Safe to clone and use from multiple
/// tasks; each `write_at` is independent (pwrite-style), so sibling range
/// tasks can write concurrently without a shared cursor.
#[derive(Clone)]
pub struct StorageWriter {
    file: Arc<File>,
    path: std::path::PathBuf,
}

impl StorageWriter {
    /// Create from an open file and path (used by StorageWriterBuilder).
    pub(crate) fn from_file_and_path(file: File, path: std::path::PathBuf) -> Self {
        Self {
            file: Arc::new(file),
            path,
        }
    }

    /// Opens an already-created file for writing (read+write, no
    /// truncation) — the resolver's zero-byte placeholder (§4.1 step 5)
    /// or an `add`-policy file with existing bytes already in place.
    pub fn open_existing(path: &Path) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open existing file: {}", path.display()))?;
        Ok(StorageWriter {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Write `data` at `offset`. Does not change the file's logical cursor; safe for concurrent use.
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let n = self
            .file
            .write_at(data, offset)
            .context("storage write_at failed")?;
        if n != data.len() {
            anyhow::bail!("short write: {} of {}", n, data.len());
        }
        Ok(())
    }

    /// Stub for non-Unix (e.g. Windows): use seek + write. Not safe for concurrent use.
    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = (*self.file).try_clone()?;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)?;
        Ok(())
    }

    /// Sync file data to disk. §4.2 explicitly does not require this
    /// before a recorder flush; exposed for callers (or tests) that want
    /// stronger durability than the spec mandates.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all().context("storage sync failed")?;
        Ok(())
    }

    /// Grows (or shrinks) the file to exactly `size` bytes. Used to
    /// preallocate a mission's backing file once its declared size is
    /// known, so concurrent range writes never race a filesystem-level
    /// extension.
    pub fn set_len(&self, size: u64) -> Result<()> {
        self.file.set_len(size).context("storage set_len failed")?;
        Ok(())
    }

    /// Preallocates `size` bytes. On Unix this tries `posix_fallocate` for
    /// real block allocation first (matching [`super::StorageWriterBuilder::preallocate`]),
    /// falling back to `set_len` on failure or on non-Unix targets.
    #[cfg(unix)]
    pub fn preallocate(&self, size: u64) -> Result<()> {
        use std::os::unix::io::AsRawFd;
        let fd = self.file.as_raw_fd();
        let r = unsafe { libc::posix_fallocate(fd, 0, size as libc::off_t) };
        if r == 0 {
            return Ok(());
        }
        tracing::debug!(errno = r, "posix_fallocate failed, falling back to set_len");
        self.set_len(size)
    }

    #[cfg(not(unix))]
    pub fn preallocate(&self, size: u64) -> Result<()> {
        self.set_len(size)
    }

    /// Path to the backing file this writer writes.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
