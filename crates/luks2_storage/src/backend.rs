//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level positioned storage backend.
///
/// Backends are **opaque byte stores**. They read and write exact byte
/// ranges at absolute offsets and expose explicit durability points. The
/// header controller owns all interpretation of the bytes.
///
/// # Invariants
///
/// - `read_at` returns exactly `len` bytes or fails; it never short-reads
/// - `write_at` past the current end extends the storage, zero-filling any gap
/// - `flush` hands buffered writes to the OS, `sync` makes them durable
/// - Backends must be `Send + Sync` so a volume can move to a worker thread
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For container files and device nodes
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The offset is beyond the current size
    /// - The read would extend beyond the current size
    /// - An I/O error occurs
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Writes all of `data` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs. A failed write may have
    /// persisted any prefix of `data`.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Flushes all pending writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// This is a stronger guarantee than `flush`: after it returns, every
    /// previous `write_at` survives power loss.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;
}

impl<B: StorageBackend + ?Sized> StorageBackend for Box<B> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        (**self).read_at(offset, len)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        (**self).write_at(offset, data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        (**self).flush()
    }

    fn size(&self) -> StorageResult<u64> {
        (**self).size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        (**self).sync()
    }
}
