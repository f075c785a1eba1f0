//! File-based storage backend for container files and device nodes.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based storage backend.
///
/// Works on regular container files as well as block device nodes; the size
/// is taken by seeking to the end, which block devices report correctly
/// where `metadata().len()` does not.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
///
/// # Locking
///
/// [`FileBackend::try_lock_exclusive`] takes an advisory lock so only one
/// process commits headers to the container at a time.
///
/// # Example
///
/// ```no_run
/// use luks2_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("container.img")).unwrap();
/// backend.try_lock_exclusive().unwrap();
/// backend.write_at(0, b"LUKS\xba\xbe").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.seek(SeekFrom::End(0))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Opens or creates a file backend, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Takes a non-blocking exclusive advisory lock on the file.
    ///
    /// The lock is released when the backend is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another handle holds the lock.
    pub fn try_lock_exclusive(&self) -> StorageResult<()> {
        let file = self.file.read();
        file.try_lock_exclusive().map_err(|_| StorageError::Locked)
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        *size = (*size).max(offset + data.len() as u64);

        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        let mut file = self.file.write();
        file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("container.img");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn file_write_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("container.img");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.write_at(0, b"hello").unwrap();
        backend.write_at(5, b" world").unwrap();

        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(backend.read_at(0, 11).unwrap(), b"hello world");
    }

    #[test]
    fn file_write_with_gap_reads_zeroes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("container.img");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.write_at(8, b"tail").unwrap();

        assert_eq!(backend.size().unwrap(), 12);
        assert_eq!(backend.read_at(0, 8).unwrap(), vec![0u8; 8]);
    }

    #[test]
    fn file_overwrite_keeps_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("container.img");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.write_at(0, b"hello world").unwrap();
        backend.write_at(0, b"HELLO").unwrap();

        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(backend.read_at(0, 11).unwrap(), b"HELLO world");
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("container.img");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.write_at(0, b"hello").unwrap();

        let result = backend.read_at(10, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("container.img");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.write_at(0, b"persistent data").unwrap();
            backend.sync().unwrap();
        }

        {
            let backend = FileBackend::open(&path).unwrap();
            assert_eq!(backend.size().unwrap(), 15);
            assert_eq!(backend.read_at(0, 15).unwrap(), b"persistent data");
        }
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("path").join("container.img");

        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert_eq!(backend.path(), path);
    }

    #[test]
    fn file_second_exclusive_lock_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("container.img");

        let first = FileBackend::open(&path).unwrap();
        first.try_lock_exclusive().unwrap();

        let second = FileBackend::open(&path).unwrap();
        assert!(matches!(
            second.try_lock_exclusive(),
            Err(StorageError::Locked)
        ));

        drop(first);
        assert!(second.try_lock_exclusive().is_ok());
    }
}
