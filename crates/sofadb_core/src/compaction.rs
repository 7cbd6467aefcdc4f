//! Online compaction.
//!
//! Compaction copies the live contents of a committed snapshot into a fresh
//! file, dropping superseded revisions, unreferenced nodes and (subject to the
//! purge horizon) tombstones. Both index trees are bulk-loaded bottom-up, a
//! single header is written, and the finished file is renamed over the
//! target. Until that rename nothing outside the temporary file changes.
//!
//! ## Invariants
//!
//! - Compaction **MUST NOT** change the live documents or their bodies
//! - Sequence and revision numbers are preserved
//! - The temporary `<target>.compact` file never survives a failed run

use crate::block::{BlockStore, BlockTag};
use crate::btree::{BTree, CountReducer, NodeCache, TreeBuilder};
use crate::codec::{self, ByIdReducer, DocPointer, SeqEntry};
use crate::dir::{sibling, sync_parent_dir};
use crate::error::{CoreError, CoreResult};
use crate::header::{self, Header};
use crate::snapshot::Snapshot;
use crate::types::SequenceNumber;
use sofadb_storage::FileBackend;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Configuration for compaction.
#[derive(Debug, Clone, Default)]
pub struct CompactionConfig {
    /// Tombstones with a sequence number below this are purged.
    /// `None` purges every tombstone.
    pub purge_before: Option<SequenceNumber>,
    /// Whether bodies are LZ4-compressed in the new file.
    pub compress_bodies: bool,
}

impl CompactionConfig {
    /// Creates a config that purges all tombstones.
    #[must_use]
    pub fn purge_all() -> Self {
        Self::default()
    }

    /// Creates a config that keeps tombstones written at or after `horizon`.
    #[must_use]
    pub fn with_purge_horizon(horizon: SequenceNumber) -> Self {
        Self {
            purge_before: Some(horizon),
            ..Self::default()
        }
    }

    /// Sets whether bodies are compressed in the output.
    #[must_use]
    pub const fn compress_bodies(mut self, value: bool) -> Self {
        self.compress_bodies = value;
        self
    }

    fn purges(&self, seq: SequenceNumber) -> bool {
        self.purge_before.map_or(true, |horizon| seq < horizon)
    }
}

/// Cooperative cancellation flag for long-running operations.
///
/// Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> CoreResult<()> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Result of a compaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompactionResult {
    /// Documents written to the new file (live documents plus kept tombstones).
    pub docs_copied: u64,
    /// Tombstones dropped.
    pub tombstones_purged: u64,
    /// Tombstones carried over because they are newer than the horizon.
    pub tombstones_kept: u64,
    /// Size of the source file.
    pub bytes_before: u64,
    /// Size of the new file.
    pub bytes_after: u64,
    /// Purge sequence recorded in the new header.
    pub purge_seq: SequenceNumber,
}

/// Rewrites a snapshot into a new, minimal file.
///
/// ## Example
///
/// ```ignore
/// use sofadb_core::{CompactionConfig, Compactor, CancellationToken};
///
/// let compactor = Compactor::new(CompactionConfig::purge_all());
/// let result = compactor.compact(&db.snapshot()?, target, &CancellationToken::new())?;
/// ```
#[derive(Debug)]
pub struct Compactor {
    config: CompactionConfig,
    order: usize,
}

impl Compactor {
    /// Creates a compactor.
    #[must_use]
    pub fn new(config: CompactionConfig) -> Self {
        Self { config, order: 32 }
    }

    /// Sets the B-tree order used for the new file.
    #[must_use]
    pub fn with_order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    /// Compacts `source` into `target`.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if `cancel` fires before the rename, or any read,
    /// write or corruption error hit while copying. In every error case the
    /// temporary file is removed and `target` is left untouched.
    pub fn compact(
        &self,
        source: &Snapshot,
        target: &Path,
        cancel: &CancellationToken,
    ) -> CoreResult<CompactionResult> {
        let temp = temp_path(target);
        let outcome = self
            .copy_into(source, &temp, cancel)
            .and_then(|result| {
                cancel.check()?;
                std::fs::rename(&temp, target)?;
                sync_parent_dir(target)?;
                Ok(result)
            });

        match outcome {
            Ok(result) => {
                tracing::info!(
                    target = %target.display(),
                    docs = result.docs_copied,
                    purged = result.tombstones_purged,
                    before = result.bytes_before,
                    after = result.bytes_after,
                    "compaction finished"
                );
                Ok(result)
            }
            Err(e) => {
                if let Err(remove_err) = std::fs::remove_file(&temp) {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(path = %temp.display(), error = %remove_err, "failed to remove compaction file");
                    }
                }
                tracing::warn!(target = %target.display(), error = %e, "compaction aborted");
                Err(e)
            }
        }
    }

    fn copy_into(
        &self,
        source: &Snapshot,
        temp: &Path,
        cancel: &CancellationToken,
    ) -> CoreResult<CompactionResult> {
        let backend = FileBackend::create(temp).map_err(CoreError::write)?;
        let store = Arc::new(BlockStore::new(Box::new(backend)));
        let cache = Arc::new(NodeCache::new(0));
        let by_id = BTree::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::new(ByIdReducer),
            self.order,
        );
        let by_seq = BTree::new(Arc::clone(&store), cache, Arc::new(CountReducer), self.order);

        let mut result = CompactionResult {
            bytes_before: source.file_size()?,
            purge_seq: source.header().purge_seq,
            ..CompactionResult::default()
        };
        let mut ids = TreeBuilder::new(by_id);
        let mut seqs: Vec<(SequenceNumber, Vec<u8>)> = Vec::new();

        for item in source.by_id_tree().iter_from(source.by_id_root(), None) {
            cancel.check()?;
            let (id, value) = item?;
            let old = DocPointer::decode(&value)?;

            if old.deleted && self.config.purges(old.db_seq) {
                result.tombstones_purged += 1;
                result.purge_seq = result.purge_seq.max(old.db_seq);
                continue;
            }
            if old.deleted {
                result.tombstones_kept += 1;
            }

            let doc = source.read_document(&old)?;
            let encoded = codec::encode(&doc, self.config.compress_bodies)?;
            let body_pos = match &encoded.body {
                Some(body) => Some(store.allocate(BlockTag::Body, body)?),
                None => None,
            };
            let info_pos = store.allocate(BlockTag::Info, &encoded.info)?;
            let pointer = DocPointer {
                info_pos,
                body_pos,
                physical_size: encoded.physical_size(),
                ..old
            };

            ids.push(id.clone(), pointer.encode())?;
            seqs.push((old.db_seq, SeqEntry { id, pointer }.encode()));
            result.docs_copied += 1;
        }

        let by_id_root = ids.finish()?;
        cancel.check()?;

        seqs.sort_unstable_by_key(|(seq, _)| *seq);
        let mut seq_builder = TreeBuilder::new(by_seq);
        for (seq, entry) in seqs {
            seq_builder.push(seq.to_key().to_vec(), entry)?;
        }
        let by_seq_root = seq_builder.finish()?;
        cancel.check()?;

        let working = Header {
            update_seq: source.update_seq(),
            purge_seq: result.purge_seq,
            by_id_root,
            by_seq_root,
            ..Header::default()
        };
        header::commit(&store, &working, true)?;
        result.bytes_after = store.size()?;
        Ok(result)
    }
}

/// Where a compaction into `target` is staged.
#[must_use]
pub fn temp_path(target: &Path) -> PathBuf {
    sibling(target, ".compact")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::database::Database;
    use crate::error::ErrorCode;
    use tempfile::tempdir;

    fn populated(path: &Path) -> Database {
        let db = Database::open_with_config(path, Config::default().btree_order(4)).unwrap();
        for i in 0..30u32 {
            db.put(format!("doc{i:02}").as_bytes(), b"m", format!("v{i}").as_bytes())
                .unwrap();
        }
        // Overwrite half, then delete a few.
        for i in 0..15u32 {
            db.put(format!("doc{i:02}").as_bytes(), b"m", format!("w{i}").as_bytes())
                .unwrap();
        }
        for i in 25..30u32 {
            db.delete(format!("doc{i:02}").as_bytes()).unwrap();
        }
        db.commit().unwrap();
        db
    }

    #[test]
    fn keeps_exactly_the_live_documents() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.sofa");
        let target = dir.path().join("target.sofa");
        let db = populated(&source);

        let result = db.compact(&target).unwrap();
        assert_eq!(result.docs_copied, 25);
        assert_eq!(result.tombstones_purged, 5);
        assert_eq!(result.tombstones_kept, 0);
        assert_eq!(result.purge_seq, SequenceNumber::new(50));
        assert!(result.bytes_after <= result.bytes_before);
        assert_eq!(std::fs::metadata(&target).unwrap().len(), result.bytes_after);
        assert!(!temp_path(&target).exists());

        let compacted = Database::open_read_only(&target).unwrap();
        let info = compacted.info().unwrap();
        assert_eq!(info.doc_count, 25);
        assert_eq!(info.deleted_count, 0);
        assert_eq!(info.update_seq, SequenceNumber::new(50));
        for i in 0..25u32 {
            let id = format!("doc{i:02}");
            let expected = if i < 15 { format!("w{i}") } else { format!("v{i}") };
            assert_eq!(compacted.get(id.as_bytes()).unwrap(), expected.into_bytes());
            assert_eq!(
                compacted.get_info(id.as_bytes()).unwrap(),
                db.get_info(id.as_bytes()).unwrap()
            );
        }
        for i in 25..30u32 {
            let err = compacted.get_info(format!("doc{i:02}").as_bytes()).unwrap_err();
            assert_eq!(err.code(), ErrorCode::DocNotFound);
        }

        let changes = compacted.changes_since(SequenceNumber::ZERO).unwrap();
        assert_eq!(changes.len(), 25);
        assert!(changes.windows(2).all(|w| w[0].db_seq < w[1].db_seq));
    }

    #[test]
    fn purge_horizon_keeps_recent_tombstones() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.sofa");
        let target = dir.path().join("target.sofa");
        let db = populated(&source);

        // Tombstones were written at seqs 46..=50.
        let config = CompactionConfig::with_purge_horizon(SequenceNumber::new(48));
        let result = db
            .compact_with(&target, config, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.tombstones_purged, 2);
        assert_eq!(result.tombstones_kept, 3);
        assert_eq!(result.docs_copied, 28);
        assert_eq!(result.purge_seq, SequenceNumber::new(47));

        let compacted = Database::open_read_only(&target).unwrap();
        assert!(compacted.get_info(b"doc26").is_err());
        assert!(compacted.get_info(b"doc27").unwrap().deleted);
        assert_eq!(compacted.info().unwrap().deleted_count, 3);
    }

    #[test]
    fn cancellation_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.sofa");
        let target = dir.path().join("target.sofa");
        let db = populated(&source);

        let token = CancellationToken::new();
        token.cancel();
        let err = db
            .compact_with(&target, CompactionConfig::purge_all(), &token)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Cancel);
        assert!(!target.exists());
        assert!(!temp_path(&target).exists());
        assert_eq!(db.get(b"doc00").unwrap(), b"w0");
    }

    #[test]
    fn compaction_reads_committed_state_only() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.sofa");
        let target = dir.path().join("target.sofa");
        let db = populated(&source);
        db.put(b"pending", b"", b"not committed").unwrap();

        let result = db.compact(&target).unwrap();
        assert_eq!(result.docs_copied, 25);
        let compacted = Database::open_read_only(&target).unwrap();
        assert!(compacted.get(b"pending").is_err());
        assert_eq!(db.get(b"pending").unwrap(), b"not committed");
    }

    #[test]
    fn compacting_empty_database() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("empty.sofa");
        let target = dir.path().join("empty-compacted.sofa");
        let db = Database::open(&source).unwrap();

        let result = db.compact(&target).unwrap();
        assert_eq!(result.docs_copied, 0);
        let compacted = Database::open_read_only(&target).unwrap();
        assert_eq!(compacted.info().unwrap().doc_count, 0);
        assert!(compacted.all_docs(None).unwrap().is_empty());
    }

    #[cfg(feature = "compression")]
    #[test]
    fn compressed_output_reads_back() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("plain.sofa");
        let target = dir.path().join("packed.sofa");
        let db = Database::open(&source).unwrap();
        let body = b"abcdefgh".repeat(512);
        db.put(b"big", b"", &body).unwrap();
        db.commit().unwrap();

        let config = CompactionConfig::purge_all().compress_bodies(true);
        let result = db
            .compact_with(&target, config, &CancellationToken::new())
            .unwrap();
        assert!(result.bytes_after < result.bytes_before);
        assert_eq!(Database::open_read_only(&target).unwrap().get(b"big").unwrap(), body);
    }
}
