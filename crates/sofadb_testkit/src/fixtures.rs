//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use sofadb_core::{Config, Database};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    path: Option<PathBuf>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self {
            db: Database::open_in_memory().expect("Failed to open in-memory database"),
            path: None,
            _temp_dir: None,
        }
    }

    /// Creates a new file-based test database.
    pub fn file() -> Self {
        Self::file_with_config(Config::default().sync_on_commit(false))
    }

    /// Creates a new file-based test database with custom configuration.
    pub fn file_with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("test.sofa");
        let db = Database::open_with_config(&path, config).expect("Failed to open file database");

        Self {
            db,
            path: Some(path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database path if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes the database and opens the same file again, discarding
    /// uncommitted writes.
    ///
    /// # Panics
    ///
    /// Panics for in-memory databases.
    pub fn reopen(&mut self) {
        let path = self.path.clone().expect("Only file databases can be reopened");
        let config = self.db.config().clone();
        self.db.close().expect("Failed to close database");
        self.db = Database::open_with_config(&path, config).expect("Failed to reopen database");
    }

    /// Opens a read-only handle on the same file.
    ///
    /// # Panics
    ///
    /// Panics for in-memory databases.
    pub fn reader(&self) -> Database {
        let path = self.path().expect("Only file databases have readers");
        Database::open_read_only(path).expect("Failed to open reader")
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust,ignore
/// use sofadb_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         db.put(b"id", b"", b"body").unwrap();
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary file-based database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db.path().expect("File database should have a path");
    f(&test_db.db, path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// ID of the `i`th document created by the scenarios.
    pub fn doc_id(i: usize) -> Vec<u8> {
        format!("doc-{i:06}").into_bytes()
    }

    /// Body of the `i`th document in revision `rev`.
    pub fn doc_body(i: usize, rev: usize) -> Vec<u8> {
        format!(r#"{{"index":{i},"rev":{rev}}}"#).into_bytes()
    }

    /// Creates a file database with `doc_count` committed documents.
    pub fn populated_database(doc_count: usize) -> TestDatabase {
        let test_db = TestDatabase::file();
        for i in 0..doc_count {
            test_db
                .put(&doc_id(i), b"", &doc_body(i, 1))
                .expect("Failed to put document");
        }
        test_db.commit().expect("Failed to commit");
        test_db
    }

    /// Creates a file database where every document was rewritten `rounds`
    /// times and every `delete_every`th document was then deleted.
    pub fn churned_database(doc_count: usize, rounds: usize, delete_every: usize) -> TestDatabase {
        let test_db = TestDatabase::file();
        for rev in 1..=rounds {
            for i in 0..doc_count {
                test_db
                    .put(&doc_id(i), b"", &doc_body(i, rev))
                    .expect("Failed to put document");
            }
            test_db.commit().expect("Failed to commit");
        }
        if delete_every > 0 {
            for i in (0..doc_count).step_by(delete_every) {
                test_db.delete(&doc_id(i)).expect("Failed to delete document");
            }
            test_db.commit().expect("Failed to commit");
        }
        test_db
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_database() {
        let test_db = TestDatabase::memory();
        assert!(test_db.path().is_none());
        test_db.put(b"a", b"", b"1").unwrap();
        assert_eq!(test_db.get(b"a").unwrap(), b"1");
    }

    #[test]
    fn test_with_file_db() {
        with_file_db(|db, path| {
            db.put(b"a", b"", b"1").unwrap();
            db.commit().unwrap();
            assert!(path.exists());
        });
    }

    #[test]
    fn test_reopen_discards_uncommitted() {
        let mut test_db = scenarios::populated_database(5);
        test_db.put(b"extra", b"", b"x").unwrap();
        test_db.reopen();
        assert_eq!(test_db.info().unwrap().doc_count, 5);
        assert!(test_db.get(b"extra").is_err());
    }

    #[test]
    fn test_churned_scenario() {
        let test_db = scenarios::churned_database(10, 3, 3);
        let info = test_db.info().unwrap();
        assert_eq!(info.doc_count, 6);
        assert_eq!(info.deleted_count, 4);
        assert_eq!(
            test_db.get(&scenarios::doc_id(1)).unwrap(),
            scenarios::doc_body(1, 3)
        );
        assert_eq!(test_db.reader().info().unwrap().doc_count, 6);
    }
}
