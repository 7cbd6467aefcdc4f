//! Database facade.

use crate::block::{BlockStore, BlockTag};
use crate::btree::{BTree, CountReducer, NodeCache};
use crate::codec::{self, ByIdReducer, ByIdReduction, DocInfo, DocPointer, Document, SeqEntry};
use crate::compaction::{CancellationToken, CompactionConfig, CompactionResult, Compactor};
use crate::config::Config;
use crate::dir::{self, WriterLock};
use crate::error::{CoreError, CoreResult};
use crate::header::{self, Header};
use crate::snapshot::Snapshot;
use crate::stats::{DatabaseStats, StatsSnapshot};
use crate::types::SequenceNumber;
use parking_lot::{Mutex, RwLock};
use sofadb_storage::{FileBackend, InMemoryBackend, StorageBackend, StorageError};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything that belongs to one open file.
struct State {
    store: Arc<BlockStore>,
    by_id: BTree,
    by_seq: BTree,
    /// Last header durably written (or found on open).
    committed: Header,
    /// Header describing this handle's uncommitted state.
    working: Header,
}

impl State {
    fn open(store: BlockStore, config: &Config) -> CoreResult<Self> {
        let store = Arc::new(store);
        let committed = if !config.read_only && store.size()? == 0 {
            let initial = header::commit(&store, &Header::default(), config.sync_on_commit)?;
            tracing::info!("initialized empty database");
            initial
        } else {
            header::load_latest(&store)?
        };

        let cache = Arc::new(NodeCache::new(config.node_cache_capacity));
        let order = config.effective_order();
        let by_id = BTree::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::new(ByIdReducer),
            order,
        );
        let by_seq = BTree::new(Arc::clone(&store), cache, Arc::new(CountReducer), order);

        Ok(Self {
            store,
            by_id,
            by_seq,
            working: committed.clone(),
            committed,
        })
    }

    fn view(&self, header: &Header) -> Snapshot {
        Snapshot::new(
            Arc::clone(&self.store),
            self.by_id.clone(),
            self.by_seq.clone(),
            header.clone(),
        )
    }

    fn is_dirty(&self) -> bool {
        !self.working.same_state(&self.committed)
    }
}

/// Summary information about an open database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbInfo {
    /// Path of the database file, `None` for in-memory databases.
    pub path: Option<PathBuf>,
    /// On-disk format version.
    pub disk_version: u8,
    /// Latest sequence number, including uncommitted writes.
    pub update_seq: SequenceNumber,
    /// Latest committed sequence number.
    pub committed_seq: SequenceNumber,
    /// Highest purged tombstone sequence.
    pub purge_seq: SequenceNumber,
    /// Live documents.
    pub doc_count: u64,
    /// Tombstones.
    pub deleted_count: u64,
    /// Payload bytes used by current document revisions.
    pub space_used: u64,
    /// Size of the file in bytes.
    pub file_size: u64,
    /// Position of the committed header.
    pub header_position: u64,
    /// Whether the handle is read-only.
    pub read_only: bool,
    /// Whether there are writes not yet committed.
    pub has_uncommitted_changes: bool,
}

/// The main database handle.
///
/// A `Database` is one open connection to a single append-only file. Writes
/// (`put`, `delete`) are applied to the handle's working state immediately and
/// are visible to reads through the same handle, but only become durable (and
/// visible to other handles) on [`Database::commit`].
///
/// # Opening a Database
///
/// ```rust,ignore
/// use sofadb_core::Database;
/// use std::path::Path;
///
/// let db = Database::open(Path::new("my.sofa"))?;
/// db.put(b"k1", b"m1", b"v1")?;
/// db.commit()?;
/// assert_eq!(db.get(b"k1")?, b"v1");
/// db.close()?;
/// ```
///
/// # Concurrency
///
/// A handle can be shared across threads. Mutations are serialized by an
/// internal writer lock; reads run concurrently with them. Only one
/// read/write handle may be open on a file at a time (enforced with an
/// advisory lock); any number of read-only handles may follow it.
pub struct Database {
    path: Option<PathBuf>,
    config: Config,
    /// `None` once closed.
    state: RwLock<Option<State>>,
    /// Serializes mutations, commits, compactions and close.
    writer: Mutex<()>,
    lock: Mutex<Option<WriterLock>>,
    stats: DatabaseStats,
}

impl Database {
    /// Opens a database file for reading and writing, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another handle has the file open for writing (`DatabaseLocked`)
    /// - The file has no valid header (`NoHeader`)
    /// - The header version is unsupported (`HeaderVersionMismatch`)
    /// - I/O errors occur
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens an existing database file read-only.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchFile` if the file does not exist, plus the header errors
    /// listed on [`Database::open`].
    pub fn open_read_only(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default().read_only(true))
    }

    /// Opens a database file with custom configuration.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use sofadb_core::{Config, Database};
    ///
    /// let config = Config::default()
    ///     .create_if_missing(false)
    ///     .compress_bodies(true);
    /// let db = Database::open_with_config(Path::new("my.sofa"), config)?;
    /// ```
    ///
    /// # Errors
    ///
    /// See [`Database::open`] and [`Database::open_read_only`].
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        if config.read_only {
            let backend =
                FileBackend::open_read_only(path).map_err(|e| open_error(path, e))?;
            return Self::from_store(Some(path), config, None, BlockStore::new(Box::new(backend)));
        }

        if !config.create_if_missing && !path.exists() {
            return Err(CoreError::NoSuchFile {
                path: path.to_path_buf(),
            });
        }
        let lock = WriterLock::acquire(path).map_err(|e| match e {
            CoreError::Io(io) => open_error(path, StorageError::Io(io)),
            other => other,
        })?;
        let backend = FileBackend::open(path).map_err(|e| open_error(path, e))?;
        Self::from_store(
            Some(path),
            config,
            Some(lock),
            BlockStore::new(Box::new(backend)),
        )
    }

    /// Opens a database over an arbitrary storage backend.
    ///
    /// No file lock is taken; the caller is responsible for exclusivity.
    ///
    /// # Errors
    ///
    /// Returns the header errors listed on [`Database::open`].
    pub fn open_with_backend(backend: Box<dyn StorageBackend>, config: Config) -> CoreResult<Self> {
        Self::from_store(None, config, None, BlockStore::new(backend))
    }

    /// Opens a fresh in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial header cannot be written.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(Box::new(InMemoryBackend::new()), Config::default())
    }

    fn from_store(
        path: Option<&Path>,
        config: Config,
        lock: Option<WriterLock>,
        store: BlockStore,
    ) -> CoreResult<Self> {
        let state = State::open(store, &config)?;
        tracing::info!(
            path = ?path,
            read_only = config.read_only,
            update_seq = state.committed.update_seq.as_u64(),
            docs = state.committed.doc_count,
            "opened database"
        );
        Ok(Self {
            path: path.map(Path::to_path_buf),
            config,
            state: RwLock::new(Some(state)),
            writer: Mutex::new(()),
            lock: Mutex::new(lock),
            stats: DatabaseStats::new(),
        })
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Returns the body of a live document.
    ///
    /// Sees this handle's uncommitted writes.
    ///
    /// # Errors
    ///
    /// Returns `DocNotFound` if the document is absent or deleted, and
    /// `FileClosed` after [`Database::close`].
    pub fn get(&self, id: &[u8]) -> CoreResult<Vec<u8>> {
        Ok(self.get_document(id)?.body)
    }

    /// Returns a live document with its metadata.
    ///
    /// # Errors
    ///
    /// See [`Database::get`].
    pub fn get_document(&self, id: &[u8]) -> CoreResult<Document> {
        let doc = self.track(self.working_view().and_then(|v| v.get_document(id)))?;
        self.stats.record_read(doc.body.len() as u64);
        Ok(doc)
    }

    /// Returns document metadata, including for tombstones.
    ///
    /// # Errors
    ///
    /// Returns `DocNotFound` if the ID is unknown.
    pub fn get_info(&self, id: &[u8]) -> CoreResult<DocInfo> {
        self.track(self.working_view().and_then(|v| v.get_info(id)))
    }

    /// Lists the latest revision of every document changed after `since`, in
    /// sequence order. Tombstones are included.
    ///
    /// # Errors
    ///
    /// Returns a read or corruption error, or `FileClosed`.
    pub fn changes_since(&self, since: SequenceNumber) -> CoreResult<Vec<DocInfo>> {
        self.track(self.working_view().and_then(|v| v.changes_since(since)))
    }

    /// Lists live documents in ID order from the first ID `>= start`.
    ///
    /// # Errors
    ///
    /// Returns a read or corruption error, or `FileClosed`.
    pub fn all_docs(&self, start: Option<&[u8]>) -> CoreResult<Vec<DocInfo>> {
        self.track(self.working_view().and_then(|v| v.all_docs(start)))
    }

    /// Returns a view of the last committed state.
    ///
    /// The snapshot is unaffected by later writes, commits and compactions
    /// made through this handle.
    ///
    /// # Errors
    ///
    /// Returns `FileClosed` after [`Database::close`].
    pub fn snapshot(&self) -> CoreResult<Snapshot> {
        self.with_state(|s| Ok(s.view(&s.committed)))
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Saves a document with the given metadata and body, replacing any
    /// previous revision. Returns the sequence number assigned to the write.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArguments` for an invalid ID, `ReadOnly` on a
    /// read-only handle, or a write error.
    pub fn put(&self, id: &[u8], meta: &[u8], body: &[u8]) -> CoreResult<SequenceNumber> {
        self.put_document(&Document::new(id, meta, body))
    }

    /// Saves a full document.
    ///
    /// `db_seq` is always assigned by the database. A non-zero `rev_seq` is
    /// stored as given; zero means "previous revision + 1".
    ///
    /// # Errors
    ///
    /// See [`Database::put`].
    pub fn put_document(&self, doc: &Document) -> CoreResult<SequenceNumber> {
        self.track(self.save(doc.clone()))
    }

    /// Deletes a document by writing a tombstone.
    ///
    /// Space is only reclaimed by compaction. Deleting an unknown ID still
    /// records a tombstone.
    ///
    /// # Errors
    ///
    /// See [`Database::put`].
    pub fn delete(&self, id: &[u8]) -> CoreResult<SequenceNumber> {
        self.track(self.save(Document::tombstone(id, Vec::new())))
    }

    fn save(&self, doc: Document) -> CoreResult<SequenceNumber> {
        self.ensure_writable()?;
        codec::validate_id(&doc.id)?;
        let _writer = self.writer.lock();
        let (store, by_id, by_seq, working) = self.with_state(|s| {
            Ok((
                Arc::clone(&s.store),
                s.by_id.clone(),
                s.by_seq.clone(),
                s.working.clone(),
            ))
        })?;

        let old = by_id
            .lookup(working.by_id_root.as_ref(), &doc.id)?
            .map(|value| DocPointer::decode(&value))
            .transpose()?;
        let seq = working.update_seq.next();
        let rev_seq = if doc.rev_seq > 0 {
            doc.rev_seq
        } else {
            old.map_or(1, |p| p.rev_seq + 1)
        };
        let doc = Document {
            db_seq: seq,
            rev_seq,
            ..doc
        };

        let encoded = codec::encode(&doc, self.config.compress_bodies)?;
        let body_pos = match &encoded.body {
            Some(body) => Some(store.allocate(BlockTag::Body, body)?),
            None => None,
        };
        let info_pos = store.allocate(BlockTag::Info, &encoded.info)?;
        let pointer = DocPointer {
            db_seq: seq,
            rev_seq,
            info_pos,
            body_pos,
            deleted: doc.deleted,
            physical_size: encoded.physical_size(),
        };

        let by_id_root = by_id.insert(working.by_id_root.as_ref(), &doc.id, &pointer.encode())?;
        let mut by_seq_root = working.by_seq_root.clone();
        if let Some(old) = old {
            by_seq_root = by_seq.remove(by_seq_root.as_ref(), &old.db_seq.to_key())?;
        }
        let entry = SeqEntry {
            id: doc.id.clone(),
            pointer,
        };
        by_seq_root = by_seq.insert(by_seq_root.as_ref(), &seq.to_key(), &entry.encode())?;

        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(CoreError::FileClosed)?;
        state.working.by_id_root = by_id_root;
        state.working.by_seq_root = by_seq_root;
        state.working.update_seq = seq;
        state.working.refresh_counts()?;
        drop(guard);

        if doc.deleted {
            self.stats.record_delete(encoded.physical_size());
        } else {
            self.stats.record_write(encoded.physical_size());
        }
        tracing::debug!(seq = seq.as_u64(), rev_seq, deleted = doc.deleted, "saved document");
        Ok(seq)
    }

    /// Makes all writes since the last commit durable and visible to new
    /// readers. Does nothing if there is nothing to commit.
    ///
    /// # Errors
    ///
    /// Returns a write error if the file cannot be synced or the header
    /// cannot be appended; the previous commit then remains current.
    pub fn commit(&self) -> CoreResult<()> {
        self.track(self.commit_inner())
    }

    fn commit_inner(&self) -> CoreResult<()> {
        self.ensure_writable()?;
        let _writer = self.writer.lock();
        let pending = self.with_state(|s| {
            Ok(s.is_dirty().then(|| (Arc::clone(&s.store), s.working.clone())))
        })?;
        let Some((store, working)) = pending else {
            return Ok(());
        };

        let committed = header::commit(&store, &working, self.config.sync_on_commit)?;
        tracing::info!(
            update_seq = committed.update_seq.as_u64(),
            docs = committed.doc_count,
            deleted = committed.deleted_count,
            pos = committed.position,
            "committed"
        );

        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(CoreError::FileClosed)?;
        state.committed = committed.clone();
        state.working = committed;
        self.stats.record_commit();
        Ok(())
    }

    // ========================================================================
    // Compaction
    // ========================================================================

    /// Writes a compacted copy of the committed state to `new_path`, purging
    /// all tombstones. This handle keeps using its current file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArguments` if `new_path` names this database's own
    /// file, `DatabaseLocked` if another handle is writing to `new_path`, or
    /// any error listed on [`Compactor::compact`].
    pub fn compact(&self, new_path: &Path) -> CoreResult<CompactionResult> {
        let config = CompactionConfig::purge_all().compress_bodies(self.config.compress_bodies);
        self.compact_with(new_path, config, &CancellationToken::new())
    }

    /// Like [`Database::compact`] with explicit settings and cancellation.
    ///
    /// # Errors
    ///
    /// See [`Database::compact`].
    pub fn compact_with(
        &self,
        new_path: &Path,
        config: CompactionConfig,
        cancel: &CancellationToken,
    ) -> CoreResult<CompactionResult> {
        self.track(self.compact_with_inner(new_path, config, cancel))
    }

    fn compact_with_inner(
        &self,
        new_path: &Path,
        config: CompactionConfig,
        cancel: &CancellationToken,
    ) -> CoreResult<CompactionResult> {
        if self
            .path
            .as_deref()
            .is_some_and(|own| dir::same_location(own, new_path))
        {
            return Err(CoreError::invalid_arguments(
                "compaction target is the open database; use compact_in_place",
            ));
        }
        // Held until the rename so no writer of the target loses its file.
        let _target_lock = WriterLock::acquire(new_path)?;
        let _writer = self.writer.lock();
        let snapshot = self.snapshot()?;
        let result = Compactor::new(config)
            .with_order(self.config.effective_order())
            .compact(&snapshot, new_path, cancel)?;
        self.stats.record_compaction();
        Ok(result)
    }

    /// Compacts the database file in place and switches this handle to the
    /// compacted file.
    ///
    /// Existing snapshots keep reading the old file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArguments` if there are uncommitted writes or the
    /// database is not file-backed, `ReadOnly` on a read-only handle, or any
    /// error listed on [`Compactor::compact`].
    pub fn compact_in_place(&self, config: CompactionConfig) -> CoreResult<CompactionResult> {
        self.track(self.compact_in_place_inner(config))
    }

    fn compact_in_place_inner(&self, config: CompactionConfig) -> CoreResult<CompactionResult> {
        self.ensure_writable()?;
        let path = self.path.clone().ok_or_else(|| {
            CoreError::invalid_arguments("in-memory databases cannot be compacted in place")
        })?;
        let _writer = self.writer.lock();
        let snapshot = self.with_state(|s| {
            if s.is_dirty() {
                return Err(CoreError::invalid_arguments(
                    "commit pending writes before compacting in place",
                ));
            }
            Ok(s.view(&s.committed))
        })?;

        let result = Compactor::new(config)
            .with_order(self.config.effective_order())
            .compact(&snapshot, &path, &CancellationToken::new())?;
        drop(snapshot);

        let backend = FileBackend::open(&path).map_err(|e| open_error(&path, e))?;
        let state = State::open(BlockStore::new(Box::new(backend)), &self.config)?;
        *self.state.write() = Some(state);
        self.stats.record_compaction();
        Ok(result)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Picks up commits made by another handle since this one was opened or
    /// last refreshed. Returns true if a newer header was found.
    ///
    /// Only read-only handles can observe foreign commits; on a read/write
    /// handle this only validates the file.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseInvalid` if the file was replaced (for example by
    /// another handle's [`Database::compact_in_place`]) or has shrunk below the
    /// committed header, and `FileClosed` after [`Database::close`].
    pub fn refresh(&self) -> CoreResult<bool> {
        self.track(self.refresh_inner())
    }

    fn refresh_inner(&self) -> CoreResult<bool> {
        let _writer = self.writer.lock();
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(CoreError::FileClosed)?;

        if state.store.is_detached()? {
            return Err(CoreError::database_invalid(
                "file was replaced since it was opened; reopen the database",
            ));
        }
        let size = state.store.refresh()?;
        if size <= state.committed.position {
            return Err(CoreError::database_invalid(format!(
                "file is {size} bytes but the committed header is at {}",
                state.committed.position
            )));
        }
        if !self.config.read_only {
            return Ok(false);
        }

        let latest = header::load_latest(&state.store)?;
        if latest.position < state.committed.position {
            return Err(CoreError::database_invalid(
                "latest header precedes the one this handle committed to",
            ));
        }
        if latest.position == state.committed.position {
            return Ok(false);
        }
        tracing::debug!(
            from = state.committed.update_seq.as_u64(),
            to = latest.update_seq.as_u64(),
            "refreshed to newer header"
        );
        state.committed = latest.clone();
        state.working = latest;
        Ok(true)
    }

    /// Closes the handle and releases the file.
    ///
    /// Uncommitted writes are discarded. Every later call, including another
    /// `close`, fails with `FileClosed`.
    ///
    /// # Errors
    ///
    /// Returns `FileClosed` if the handle is already closed.
    pub fn close(&self) -> CoreResult<()> {
        let _writer = self.writer.lock();
        let state = self.state.write().take().ok_or(CoreError::FileClosed)?;
        if state.is_dirty() {
            tracing::warn!(
                uncommitted_seq = state.working.update_seq.as_u64(),
                "closing with uncommitted writes; they are discarded"
            );
        }
        self.lock.lock().take();
        tracing::info!(path = ?self.path, "closed database");
        Ok(())
    }

    /// Returns true until [`Database::close`] is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.read().is_some()
    }

    /// Returns true for read-only handles.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    /// Path of the database file, `None` for in-memory databases.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns summary information.
    ///
    /// # Errors
    ///
    /// Returns `FileClosed` after [`Database::close`].
    pub fn info(&self) -> CoreResult<DbInfo> {
        self.with_state(|s| {
            let reduction = match &s.working.by_id_root {
                Some(root) => ByIdReduction::decode(&root.reduction)?,
                None => ByIdReduction::default(),
            };
            Ok(DbInfo {
                path: self.path.clone(),
                disk_version: s.committed.version,
                update_seq: s.working.update_seq,
                committed_seq: s.committed.update_seq,
                purge_seq: s.working.purge_seq,
                doc_count: s.working.doc_count,
                deleted_count: s.working.deleted_count,
                space_used: reduction.size,
                file_size: s.store.size()?,
                header_position: s.committed.position,
                read_only: self.config.read_only,
                has_uncommitted_changes: s.is_dirty(),
            })
        })
    }

    /// Returns operation counters for this handle.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn with_state<T>(&self, f: impl FnOnce(&State) -> CoreResult<T>) -> CoreResult<T> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(CoreError::FileClosed)?;
        f(state)
    }

    fn working_view(&self) -> CoreResult<Snapshot> {
        self.with_state(|s| Ok(s.view(&s.working)))
    }

    fn ensure_writable(&self) -> CoreResult<()> {
        self.with_state(|_| Ok(()))?;
        if self.config.read_only {
            return Err(CoreError::ReadOnly);
        }
        Ok(())
    }

    fn track<T>(&self, result: CoreResult<T>) -> CoreResult<T> {
        if let Err(e) = &result {
            if !matches!(e, CoreError::DocNotFound { .. }) {
                self.stats.record_error();
            }
        }
        result
    }
}

fn open_error(path: &Path, source: StorageError) -> CoreError {
    if source.is_not_found() {
        CoreError::NoSuchFile {
            path: path.to_path_buf(),
        }
    } else {
        CoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("is_open", &self.is_open())
            .field("read_only", &self.config.read_only)
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
