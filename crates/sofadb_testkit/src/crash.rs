//! Crash recovery testing for SofaDB.
//!
//! This module provides utilities for testing crash recovery behavior.
//! It simulates crashes at various points of the commit protocol and verifies
//! that reopening the file yields exactly the last committed state.
//!
//! ## Test Strategy
//!
//! 1. **Crash before commit** - Uncommitted writes are discarded
//! 2. **Crash after commit** - Committed writes survive
//! 3. **Crash during a data write** - A torn block is ignored
//! 4. **Crash during the header write** - The previous header stays current
//! 5. **Failed sync** - The commit fails and nothing changes
//! 6. **Interrupted compaction** - The source file is untouched
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sofadb_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new();
//! assert!(harness.run_all().iter().all(|r| r.passed));
//! ```

use sofadb_core::block::PAGE_SIZE;
use sofadb_core::{CancellationToken, CompactionConfig, Config, CoreError, Database, ErrorCode};
use sofadb_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Shared crash controls for a [`CrashableBackend`].
///
/// The backend is moved into the database, so tests keep this handle to arm
/// crashes afterwards.
#[derive(Debug)]
pub struct CrashSwitch {
    crash_after_bytes: AtomicU64,
    bytes_written: AtomicU64,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

impl CrashSwitch {
    fn new() -> Self {
        Self {
            crash_after_bytes: AtomicU64::new(u64::MAX),
            bytes_written: AtomicU64::new(0),
            crashed: AtomicBool::new(false),
            fail_on_sync: AtomicBool::new(false),
        }
    }

    /// Crashes once the total number of appended bytes reaches `bytes`.
    pub fn crash_after(&self, bytes: u64) {
        self.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Crashes after `bytes` more bytes have been appended.
    pub fn crash_after_more(&self, bytes: u64) {
        self.crash_after(self.bytes_written() + bytes);
    }

    /// Sets whether flush and sync should fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Total bytes appended through the backend.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::SeqCst)
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Resets the crash state.
    pub fn reset(&self) {
        self.crash_after_bytes.store(u64::MAX, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.fail_on_sync.store(false, Ordering::SeqCst);
    }
}

fn simulated(what: &str) -> StorageError {
    StorageError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("simulated crash during {what}"),
    ))
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    switch: Arc<CrashSwitch>,
}

impl CrashableBackend {
    /// Creates a new crashable backend wrapping an inner backend.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            switch: Arc::new(CrashSwitch::new()),
        }
    }

    /// Returns the shared crash controls.
    pub fn switch(&self) -> Arc<CrashSwitch> {
        Arc::clone(&self.switch)
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let len = bytes.len() as u64;
        let current = self.switch.bytes_written.fetch_add(len, Ordering::SeqCst);
        let threshold = self.switch.crash_after_bytes.load(Ordering::SeqCst);

        if current >= threshold {
            self.switch.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("write"));
        }

        // Write partial data up to the crash point
        if current + len > threshold {
            self.switch.crashed.store(true, Ordering::SeqCst);
            let partial = (threshold - current) as usize;
            let _ = self.inner.append(&bytes[..partial]);
            return Err(simulated("partial write"));
        }

        self.inner.append(bytes)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.switch.fail_on_sync.load(Ordering::SeqCst) {
            self.switch.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.switch.fail_on_sync.load(Ordering::SeqCst) {
            self.switch.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("sync"));
        }
        self.inner.sync()
    }
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Expected live documents after recovery.
    pub expected_docs: u64,
    /// Actual live documents after recovery.
    pub actual_docs: u64,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, docs: u64) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            expected_docs: docs,
            actual_docs: docs,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, expected: u64, actual: u64, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            expected_docs: expected,
            actual_docs: actual,
            error: Some(error.to_string()),
        }
    }
}

/// A database over a crashable in-memory file.
pub struct CrashableDatabase {
    /// The database handle.
    pub db: Database,
    /// Crash controls.
    pub switch: Arc<CrashSwitch>,
    file: InMemoryBackend,
}

impl CrashableDatabase {
    /// Creates an empty database.
    pub fn new() -> Result<Self, CoreError> {
        let file = InMemoryBackend::new();
        let backend = CrashableBackend::new(Box::new(file.share()));
        let switch = backend.switch();
        let db = Database::open_with_backend(Box::new(backend), Config::default())?;
        Ok(Self { db, switch, file })
    }

    /// Bytes currently in the file.
    pub fn file_len(&self) -> u64 {
        self.file.data().len() as u64
    }

    /// Simulates a process restart: reopens a copy of the file as it is now.
    pub fn recover(&self) -> Result<Database, CoreError> {
        Database::open_with_backend(
            Box::new(InMemoryBackend::with_data(self.file.data())),
            Config::default(),
        )
    }
}

fn doc_id(i: u64) -> Vec<u8> {
    format!("crash-{i:04}").into_bytes()
}

fn body(i: u64) -> Vec<u8> {
    vec![(i % 251) as u8; 100 + (i as usize % 7) * 50]
}

fn put_range(db: &Database, range: std::ops::Range<u64>) -> Result<(), CoreError> {
    for i in range {
        db.put(&doc_id(i), b"", &body(i))?;
    }
    Ok(())
}

/// Counts documents `0..upto` that read back intact.
fn count_intact(db: &Database, upto: u64) -> Result<u64, CoreError> {
    let mut found = 0;
    for i in 0..upto {
        match db.get(&doc_id(i)) {
            Ok(data) if data == body(i) => found += 1,
            Ok(_) => {}
            Err(e) if e.code() == ErrorCode::DocNotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(found)
}

fn judge(
    description: &str,
    expected: u64,
    recovered: &Database,
    scan: u64,
) -> Result<CrashRecoveryResult, CoreError> {
    let found = count_intact(recovered, scan)?;
    let counted = recovered.info()?.doc_count;
    if found == expected && counted == expected {
        Ok(CrashRecoveryResult::pass(description, expected))
    } else {
        Ok(CrashRecoveryResult::fail(
            description,
            expected,
            found,
            &format!("header counts {counted} documents"),
        ))
    }
}

/// Test harness for crash recovery scenarios.
#[derive(Debug, Default)]
pub struct CrashRecoveryHarness {
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a new crash recovery harness.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(
        &mut self,
        description: &str,
        expected: u64,
        scenario: impl FnOnce() -> Result<CrashRecoveryResult, CoreError>,
    ) -> CrashRecoveryResult {
        let result = scenario().unwrap_or_else(|e| {
            CrashRecoveryResult::fail(description, expected, 0, &e.to_string())
        });
        self.results.push(result.clone());
        result
    }

    /// Tests that committed data survives a crash.
    pub fn test_committed_data_survives(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Committed data survives crash";
        self.record(DESCRIPTION, 10, || {
            let crashable = CrashableDatabase::new()?;
            put_range(&crashable.db, 0..10)?;
            crashable.db.commit()?;
            judge(DESCRIPTION, 10, &crashable.recover()?, 10)
        })
    }

    /// Tests that uncommitted data is discarded after a crash.
    pub fn test_uncommitted_data_discarded(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Uncommitted data discarded after crash";
        self.record(DESCRIPTION, 5, || {
            let crashable = CrashableDatabase::new()?;
            put_range(&crashable.db, 0..5)?;
            crashable.db.commit()?;
            put_range(&crashable.db, 5..10)?;
            crashable.db.delete(&doc_id(0))?;
            judge(DESCRIPTION, 5, &crashable.recover()?, 10)
        })
    }

    /// Tests that a block torn by a crash mid-append is ignored.
    pub fn test_torn_data_write(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Torn data block ignored";
        self.record(DESCRIPTION, 5, || {
            let crashable = CrashableDatabase::new()?;
            put_range(&crashable.db, 0..5)?;
            crashable.db.commit()?;

            crashable.switch.crash_after_more(40);
            if crashable.db.put(&doc_id(5), b"", &body(5)).is_ok() {
                return Ok(CrashRecoveryResult::fail(DESCRIPTION, 5, 6, "write did not crash"));
            }
            judge(DESCRIPTION, 5, &crashable.recover()?, 10)
        })
    }

    /// Tests that a header torn by a crash mid-commit leaves the previous
    /// header current.
    pub fn test_torn_header_write(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Torn header falls back to previous commit";
        self.record(DESCRIPTION, 5, || {
            let crashable = CrashableDatabase::new()?;
            put_range(&crashable.db, 0..5)?;
            crashable.db.commit()?;
            put_range(&crashable.db, 5..10)?;

            // Let the page padding and the header marker through, then tear.
            let len = crashable.file_len();
            let pad = (PAGE_SIZE - len % PAGE_SIZE) % PAGE_SIZE;
            crashable.switch.crash_after_more(pad + 12);
            if crashable.db.commit().is_ok() {
                return Ok(CrashRecoveryResult::fail(DESCRIPTION, 5, 10, "commit did not crash"));
            }
            judge(DESCRIPTION, 5, &crashable.recover()?, 10)
        })
    }

    /// Tests that a commit whose sync fails changes nothing on disk.
    pub fn test_failed_sync(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Failed sync keeps previous commit";
        self.record(DESCRIPTION, 3, || {
            let crashable = CrashableDatabase::new()?;
            put_range(&crashable.db, 0..3)?;
            crashable.db.commit()?;
            put_range(&crashable.db, 3..6)?;

            crashable.switch.set_fail_on_sync(true);
            match crashable.db.commit() {
                Err(e) if e.code() == ErrorCode::Write => {}
                other => {
                    return Ok(CrashRecoveryResult::fail(
                        DESCRIPTION,
                        3,
                        6,
                        &format!("commit returned {other:?}"),
                    ))
                }
            }
            judge(DESCRIPTION, 3, &crashable.recover()?, 6)
        })
    }

    /// Tests that an interrupted compaction leaves the source intact and no
    /// temporary file behind.
    pub fn test_interrupted_compaction(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Interrupted compaction leaves source intact";
        self.record(DESCRIPTION, 8, || {
            let dir = tempfile::tempdir()?;
            let source = dir.path().join("source.sofa");
            let target = dir.path().join("target.sofa");
            let db = Database::open(&source)?;
            put_range(&db, 0..10)?;
            db.delete(&doc_id(8))?;
            db.delete(&doc_id(9))?;
            db.commit()?;

            let token = CancellationToken::new();
            token.cancel();
            let outcome = db.compact_with(&target, CompactionConfig::purge_all(), &token);
            let temp = sofadb_core::compaction::temp_path(&target);
            if outcome.is_ok() || target.exists() || temp.exists() {
                return Ok(CrashRecoveryResult::fail(
                    DESCRIPTION,
                    8,
                    0,
                    "compaction output left behind",
                ));
            }
            db.close()?;
            judge(DESCRIPTION, 8, &Database::open_read_only(&source)?, 10)
        })
    }

    /// Runs every scenario and returns the results.
    pub fn run_all(&mut self) -> Vec<CrashRecoveryResult> {
        vec![
            self.test_committed_data_survives(),
            self.test_uncommitted_data_discarded(),
            self.test_torn_data_write(),
            self.test_torn_header_write(),
            self.test_failed_sync(),
            self.test_interrupted_compaction(),
        ]
    }
}
