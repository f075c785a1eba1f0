//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::io;

/// An in-memory storage backend.
///
/// This backend keeps the whole container in a byte vector and is suitable
/// for:
/// - Unit tests
/// - Crash-recovery tests that snapshot and replay raw header bytes
/// - Scratch containers that never touch a device
///
/// # Example
///
/// ```rust
/// use luks2_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// backend.write_at(0, b"header").unwrap();
/// assert_eq!(backend.size().unwrap(), 6);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing data.
    ///
    /// Useful for loading hand-crafted or corrupted header images.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

fn to_usize(value: u64) -> StorageResult<usize> {
    usize::try_from(value).map_err(|_| {
        StorageError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("offset {value} does not fit in memory"),
        ))
    })
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        let start = to_usize(offset)?;
        Ok(data[start..start + len].to_vec())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        let start = to_usize(offset)?;
        let end = start.checked_add(bytes.len()).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "write range overflows",
            ))
        })?;

        let mut data = self.data.write();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        // Nothing is buffered
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }
}
