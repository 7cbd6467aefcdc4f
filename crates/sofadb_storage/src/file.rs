//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{File, Metadata, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based storage backend.
///
/// This backend provides persistent storage using OS file APIs.
/// Data survives process restarts.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
///
/// # Read-only handles
///
/// A backend opened with [`FileBackend::open_read_only`] rejects `append` and
/// `truncate` with [`StorageError::ReadOnly`]. Its cached size only moves when
/// [`StorageBackend::refresh`] is called, so a reader never observes a
/// half-appended tail unless it asks to.
///
/// # Example
///
/// ```no_run
/// use sofadb_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("data.sofa")).unwrap();
/// let offset = backend.append(b"persistent data").unwrap();
/// backend.sync().unwrap();  // Ensure data is durable
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
    read_only: bool,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// If the file exists, it is opened for reading and appending.
    /// If it doesn't exist, a new file is created.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::from_file(path, file, false)
    }

    /// Opens an existing file for reading only.
    ///
    /// # Errors
    ///
    /// Returns an `Io` error of kind `NotFound` if the file does not exist,
    /// or any other I/O error raised while opening it.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Self::from_file(path, file, true)
    }

    /// Creates a new, empty file, truncating any existing file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::from_file(path, file, false)
    }

    fn from_file(path: &Path, file: File, read_only: bool) -> StorageResult<Self> {
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
            read_only,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if this backend rejects mutations.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
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

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.read_only {
            return Ok(());
        }
        let mut file = self.file.write();
        file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.read_only {
            return Ok(());
        }
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to size {} which is greater than current size {}",
                    new_size, *size
                ),
            )));
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;

        Ok(())
    }

    fn refresh(&mut self) -> StorageResult<u64> {
        let file = self.file.read();
        let mut size = self.size.write();
        *size = file.metadata()?.len();
        Ok(*size)
    }

    fn is_detached(&self) -> StorageResult<bool> {
        let current = match std::fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };
        let open = self.file.read().metadata()?;
        Ok(!is_same_file(&open, &current))
    }
}

/// Returns true if both metadata records describe the same file.
///
/// Compares device and inode numbers. Other platforms have no stable file
/// identity in `std`, so every pair compares equal there.
#[cfg(unix)]
#[must_use]
pub fn is_same_file(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

/// Returns true if both metadata records describe the same file.
///
/// Compares device and inode numbers. Other platforms have no stable file
/// identity in `std`, so every pair compares equal there.
#[cfg(not(unix))]
#[must_use]
pub fn is_same_file(_a: &Metadata, _b: &Metadata) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sofa");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
        assert!(!backend.is_read_only());
    }

    #[test]
    fn file_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sofa");

        let mut backend = FileBackend::open(&path).unwrap();

        let offset1 = backend.append(b"hello").unwrap();
        assert_eq!(offset1, 0);

        let offset2 = backend.append(b" world").unwrap();
        assert_eq!(offset2, 5);

        assert_eq!(backend.size().unwrap(), 11);

        let data = backend.read_at(0, 11).unwrap();
        assert_eq!(&data, b"hello world");
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sofa");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"hello").unwrap();

        let result = backend.read_at(3, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sofa");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"persistent data").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 15);
        assert_eq!(&backend.read_at(0, 15).unwrap(), b"persistent data");
    }

    #[test]
    fn file_read_only_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.sofa");

        let err = FileBackend::open_read_only(&path).unwrap_err();
        assert!(err.is_not_found());
        assert!(!path.exists());
    }

    #[test]
    fn file_read_only_rejects_mutation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sofa");
        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"abc").unwrap();
            backend.sync().unwrap();
        }

        let mut backend = FileBackend::open_read_only(&path).unwrap();
        assert!(backend.is_read_only());
        assert_eq!(&backend.read_at(0, 3).unwrap(), b"abc");
        assert!(matches!(backend.append(b"x"), Err(StorageError::ReadOnly)));
        assert!(matches!(backend.truncate(0), Err(StorageError::ReadOnly)));
        assert!(backend.sync().is_ok());
    }

    #[test]
    fn file_refresh_sees_other_writer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sofa");

        let mut writer = FileBackend::open(&path).unwrap();
        writer.append(b"first").unwrap();
        writer.sync().unwrap();

        let mut reader = FileBackend::open_read_only(&path).unwrap();
        assert_eq!(reader.size().unwrap(), 5);

        writer.append(b"second").unwrap();
        writer.sync().unwrap();

        // Cached size is stable until refreshed.
        assert_eq!(reader.size().unwrap(), 5);
        assert_eq!(reader.refresh().unwrap(), 11);
        assert_eq!(&reader.read_at(5, 6).unwrap(), b"second");
    }

    #[test]
    fn file_create_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sofa");
        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"old contents").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::create(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
    }

    #[test]
    fn file_truncate_then_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sofa");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"hello world").unwrap();
        backend.truncate(5).unwrap();
        assert_eq!(backend.append(b"!").unwrap(), 5);
        assert_eq!(&backend.read_at(0, 6).unwrap(), b"hello!");
        assert!(backend.truncate(100).is_err());
    }

    #[test]
    fn file_empty_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sofa");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"x").unwrap();
        assert_eq!(backend.append(b"").unwrap(), 1);
        assert!(backend.read_at(1, 0).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn file_detached_after_replace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sofa");
        let other = dir.path().join("other.sofa");

        let mut writer = FileBackend::open(&path).unwrap();
        writer.append(b"old").unwrap();
        let reader = FileBackend::open_read_only(&path).unwrap();
        assert!(!reader.is_detached().unwrap());
        assert!(!writer.is_detached().unwrap());

        FileBackend::create(&other).unwrap();
        std::fs::rename(&other, &path).unwrap();
        assert!(reader.is_detached().unwrap());

        std::fs::remove_file(&path).unwrap();
        assert!(reader.is_detached().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn same_file_compares_identity() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();

        let meta_a = std::fs::metadata(&a).unwrap();
        let alias = std::fs::metadata(dir.path().join(".").join("a")).unwrap();
        assert!(is_same_file(&meta_a, &alias));
        assert!(!is_same_file(&meta_a, &std::fs::metadata(&b).unwrap()));
    }
}
