//! Byte recorder (C2): a buffered single-writer sink for one mission's
//! backing file.
//!
//! Accepts `(bytes, offset?)` writes from many producing tasks, buffers
//! them up to a configurable count, and serialises the actual file I/O
//! through the single [`crate::storage::StorageWriter`] handle it owns —
//! the recorder is the only component allowed to open the backing file
//! for writing (§4.2).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{DdmError, Result};
use crate::storage::StorageWriter;

/// Default number of buffered writes before an implicit flush, per §4.2.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

struct PendingWrite {
    offset: u64,
    data: Vec<u8>,
}

/// Buffered single-writer recorder.
///
/// `add`/`flush`/`clear` may be called from different worker threads
/// concurrently; the pending-write buffer and the append cursor are each
/// behind their own lock/atomic so no caller blocks on another's unrelated
/// bookkeeping, while actual file writes still serialise through the one
/// `StorageWriter` handle.
pub struct Recorder {
    writer: StorageWriter,
    pending: Mutex<Vec<PendingWrite>>,
    capacity: usize,
    /// Logical end-of-file cursor for `add(bytes, offset=None)` appends.
    append_cursor: AtomicU64,
}

impl Recorder {
    /// Binds a recorder to an already-open storage writer. `initial_len`
    /// seeds the append cursor (the current size of the backing file, so
    /// `add` with no offset continues from where it already is — needed
    /// for the `add` conflict policy, which keeps existing bytes in
    /// place).
    pub fn new(writer: StorageWriter, initial_len: u64) -> Self {
        Self::with_capacity(writer, initial_len, DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(writer: StorageWriter, initial_len: u64, capacity: usize) -> Self {
        Recorder {
            writer,
            pending: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            append_cursor: AtomicU64::new(initial_len),
        }
    }

    /// Queues a write. `offset = None` appends at the current logical end
    /// of file and advances the cursor by `bytes.len()`. Flushes
    /// automatically once the buffer reaches `capacity`.
    pub fn add(&self, bytes: &[u8], offset: Option<u64>) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let offset = match offset {
            Some(o) => o,
            None => self
                .append_cursor
                .fetch_add(bytes.len() as u64, Ordering::SeqCst),
        };

        let should_flush = {
            let mut pending = self.pending.lock().unwrap();
            pending.push(PendingWrite {
                offset,
                data: bytes.to_vec(),
            });
            pending.len() >= self.capacity
        };

        if should_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Persists all pending writes in insertion order, each at its
    /// recorded offset. `fsync` is not required (§4.2).
    pub fn flush(&self) -> Result<()> {
        let batch = {
            let mut pending = self.pending.lock().unwrap();
            std::mem::take(&mut *pending)
        };
        for write in batch {
            self.writer
                .write_at(write.offset, &write.data)
                .map_err(|source| DdmError::FileSystemError {
                    path: self.writer.path().to_path_buf(),
                    source: source
                        .downcast::<std::io::Error>()
                        .unwrap_or_else(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string())),
                })?;
        }
        Ok(())
    }

    /// Discards pending writes without persisting them (used when a task
    /// is canceled mid-chunk, per §4.5.1).
    pub fn clear(&self) {
        self.pending.lock().unwrap().clear();
    }

    pub fn writer(&self) -> &StorageWriter {
        &self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageWriterBuilder;

    fn make_recorder(dir: &std::path::Path, capacity: usize) -> (Recorder, std::path::PathBuf) {
        let temp = dir.join("out.part");
        let mut builder = StorageWriterBuilder::create(&temp).unwrap();
        builder.preallocate(1024).unwrap();
        let writer = builder.build();
        (Recorder::with_capacity(writer, 0, capacity), temp)
    }

    #[test]
    fn add_then_flush_persists_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (rec, temp) = make_recorder(dir.path(), 100);
        rec.add(b"hello", Some(0)).unwrap();
        rec.add(b"world", Some(10)).unwrap();
        rec.flush().unwrap();

        let contents = std::fs::read(&temp).unwrap();
        assert_eq!(&contents[0..5], b"hello");
        assert_eq!(&contents[10..15], b"world");
    }

    #[test]
    fn add_with_no_offset_appends_at_logical_end() {
        let dir = tempfile::tempdir().unwrap();
        let (rec, temp) = make_recorder(dir.path(), 100);
        rec.add(b"abc", None).unwrap();
        rec.add(b"def", None).unwrap();
        rec.flush().unwrap();

        let contents = std::fs::read(&temp).unwrap();
        assert_eq!(&contents[0..3], b"abc");
        assert_eq!(&contents[3..6], b"def");
    }

    #[test]
    fn flush_triggers_automatically_at_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let (rec, temp) = make_recorder(dir.path(), 2);
        rec.add(b"a", Some(0)).unwrap();
        rec.add(b"b", Some(1)).unwrap();
        // The second add crossed capacity, so this should already be on disk.
        let contents = std::fs::read(&temp).unwrap();
        assert_eq!(&contents[0..2], b"ab");
    }

    #[test]
    fn clear_discards_pending_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (rec, temp) = make_recorder(dir.path(), 100);
        rec.add(b"never written", Some(0)).unwrap();
        rec.clear();
        rec.flush().unwrap();
        let contents = std::fs::read(&temp).unwrap();
        assert!(contents.iter().all(|&b| b == 0));
    }
}
