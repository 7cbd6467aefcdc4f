//! File-system helpers: the writer lock and directory syncs.
//!
//! A read/write handle holds an exclusive advisory lock on `<db>.lock` next to
//! the database file. The lock lives in a separate file so it survives the
//! rename that swaps in a compacted database.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
#[cfg(unix)]
use sofadb_storage::is_same_file;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// An exclusive advisory lock held for the lifetime of a writer.
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
    _file: File,
}

impl WriterLock {
    /// Acquires the writer lock for the database at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseLocked` if another handle holds the lock, or an I/O
    /// error if the lock file cannot be created.
    pub fn acquire(db_path: &Path) -> CoreResult<Self> {
        let path = sibling(db_path, ".lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self { path, _file: file })
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Returns `path` with `suffix` appended to its file name.
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Returns true if `a` and `b` name the same database file.
///
/// Paths are compared after resolving their parent directories, so `.`,
/// `..` and symlinked directories do not hide a match. On Unix, paths that
/// both exist are compared by file identity instead.
pub(crate) fn same_location(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    if let Some(same) = existing_identity_match(a, b) {
        return same;
    }
    match (resolve(a), resolve(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[cfg(unix)]
fn existing_identity_match(a: &Path, b: &Path) -> Option<bool> {
    let (meta_a, meta_b) = (fs::metadata(a).ok()?, fs::metadata(b).ok()?);
    Some(is_same_file(&meta_a, &meta_b))
}

#[cfg(not(unix))]
fn existing_identity_match(_a: &Path, _b: &Path) -> Option<bool> {
    None
}

fn resolve(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    Some(fs::canonicalize(parent).ok()?.join(name))
}

/// Syncs the directory containing `path` so a rename into it is durable.
#[cfg(unix)]
pub(crate) fn sync_parent_dir(path: &Path) -> CoreResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()?;
    Ok(())
}

/// Directory fsync is not available on this platform; NTFS journals
/// metadata updates itself.
#[cfg(not(unix))]
pub(crate) fn sync_parent_dir(_path: &Path) -> CoreResult<()> {
    Ok(())
}
