//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random documents and operation
//! sequences, plus a reference model to check a database against.

use proptest::prelude::*;
use sofadb_core::{Database, Document, SequenceNumber};
use std::collections::{BTreeMap, BTreeSet};

/// Strategy for generating valid document IDs.
///
/// IDs are drawn from a small alphabet so that sequences revisit the same
/// documents often.
pub fn doc_id_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(prop::sample::select(b"abcdef".to_vec()), 1..4)
}

/// Strategy for generating arbitrary binary IDs, including long ones.
pub fn binary_id_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..300)
}

/// Strategy for generating document bodies (arbitrary bytes).
pub fn body_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        3 => prop::collection::vec(any::<u8>(), 0..512),
        1 => (any::<u8>(), 1000usize..6000).prop_map(|(b, n)| vec![b; n]),
    ]
}

/// Strategy for generating revision metadata.
pub fn meta_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..32)
}

/// Strategy for generating live documents as callers submit them.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    (binary_id_strategy(), meta_strategy(), body_strategy(), any::<u8>()).prop_map(
        |(id, meta, body, content_meta)| Document {
            content_meta,
            ..Document::new(id, meta, body)
        },
    )
}

/// Strategy for generating documents as stored, tombstones included.
pub fn stored_document_strategy() -> impl Strategy<Value = Document> {
    (document_strategy(), any::<bool>(), 1u64..1000, 1u64..u64::MAX).prop_map(
        |(doc, deleted, rev_seq, seq)| Document {
            body: if deleted { Vec::new() } else { doc.body },
            deleted,
            rev_seq,
            db_seq: SequenceNumber::new(seq),
            ..doc
        },
    )
}

/// An operation applied to a database in property tests.
#[derive(Debug, Clone)]
pub enum DocOperation {
    /// Put a document
    Put {
        /// Document ID
        id: Vec<u8>,
        /// Revision metadata
        meta: Vec<u8>,
        /// Document body
        body: Vec<u8>,
    },
    /// Delete a document
    Delete {
        /// Document ID
        id: Vec<u8>,
    },
    /// Get a document
    Get {
        /// Document ID
        id: Vec<u8>,
    },
    /// Commit pending writes
    Commit,
}

/// Strategy for generating document operations.
pub fn doc_operation_strategy() -> impl Strategy<Value = DocOperation> {
    prop_oneof![
        4 => (doc_id_strategy(), meta_strategy(), body_strategy())
            .prop_map(|(id, meta, body)| DocOperation::Put { id, meta, body }),
        1 => doc_id_strategy().prop_map(|id| DocOperation::Delete { id }),
        2 => doc_id_strategy().prop_map(|id| DocOperation::Get { id }),
        1 => Just(DocOperation::Commit),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<DocOperation>> {
    prop::collection::vec(doc_operation_strategy(), min_ops..max_ops)
}

/// In-memory reference model of a database's visible contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    /// Live documents: ID to (meta, body).
    pub live: BTreeMap<Vec<u8>, (Vec<u8>, Vec<u8>)>,
    /// IDs whose latest revision is a tombstone.
    pub deleted: BTreeSet<Vec<u8>>,
}

impl Model {
    /// Applies a write to the model. Reads and commits are no-ops.
    pub fn apply(&mut self, op: &DocOperation) {
        match op {
            DocOperation::Put { id, meta, body } => {
                self.deleted.remove(id);
                self.live.insert(id.clone(), (meta.clone(), body.clone()));
            }
            DocOperation::Delete { id } => {
                self.live.remove(id);
                self.deleted.insert(id.clone());
            }
            DocOperation::Get { .. } | DocOperation::Commit => {}
        }
    }

    /// Checks that `db` shows exactly the contents of the model.
    pub fn check(&self, db: &Database) -> Result<(), String> {
        let info = db.info().map_err(|e| e.to_string())?;
        if info.doc_count != self.live.len() as u64 {
            return Err(format!(
                "doc_count {} != model {}",
                info.doc_count,
                self.live.len()
            ));
        }
        if info.deleted_count != self.deleted.len() as u64 {
            return Err(format!(
                "deleted_count {} != model {}",
                info.deleted_count,
                self.deleted.len()
            ));
        }
        for (id, (meta, body)) in &self.live {
            let doc = db.get_document(id).map_err(|e| e.to_string())?;
            if &doc.body != body || &doc.meta != meta {
                return Err(format!("document {id:?} differs"));
            }
        }
        for id in &self.deleted {
            if db.get(id).is_ok() {
                return Err(format!("deleted document {id:?} is readable"));
            }
        }
        let listed: Vec<Vec<u8>> = db
            .all_docs(None)
            .map_err(|e| e.to_string())?
            .into_iter()
            .map(|d| d.id)
            .collect();
        let expected: Vec<Vec<u8>> = self.live.keys().cloned().collect();
        if listed != expected {
            return Err("all_docs order differs from model".to_string());
        }
        Ok(())
    }
}

/// Applies `op` to `db`. Reads are checked against `model`.
pub fn apply_to_database(db: &Database, model: &Model, op: &DocOperation) -> Result<(), String> {
    match op {
        DocOperation::Put { id, meta, body } => {
            db.put(id, meta, body).map_err(|e| e.to_string())?;
        }
        DocOperation::Delete { id } => {
            db.delete(id).map_err(|e| e.to_string())?;
        }
        DocOperation::Get { id } => {
            let got = db.get(id).ok();
            let expected = model.live.get(id).map(|(_, body)| body.clone());
            if got != expected {
                return Err(format!("get {id:?} returned {got:?}"));
            }
        }
        DocOperation::Commit => db.commit().map_err(|e| e.to_string())?,
    }
    Ok(())
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestDatabase;
    use sofadb_core::codec;
    use sofadb_core::{CompactionConfig, Config};

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn codec_round_trips(doc in stored_document_strategy(), compress in any::<bool>()) {
            let encoded = codec::encode(&doc, compress).unwrap();
            prop_assert_eq!(encoded.body.is_none(), doc.deleted);
            let decoded = codec::decode(encoded.body.as_deref(), &encoded.info).unwrap();
            prop_assert_eq!(decoded, doc);
        }

        #[test]
        fn database_matches_model(ops in operation_sequence_strategy(1, 120)) {
            let db = Database::open_with_backend(
                Box::new(sofadb_storage::InMemoryBackend::new()),
                Config::default().btree_order(4),
            ).unwrap();
            let mut model = Model::default();
            for op in &ops {
                apply_to_database(&db, &model, op).map_err(TestCaseError::fail)?;
                model.apply(op);
            }
            model.check(&db).map_err(TestCaseError::fail)?;
        }

        #[test]
        fn reopen_shows_last_commit(ops in operation_sequence_strategy(1, 80)) {
            let mut test_db = TestDatabase::file_with_config(
                Config::default().btree_order(4).sync_on_commit(false),
            );
            let mut model = Model::default();
            let mut committed = Model::default();
            for op in &ops {
                apply_to_database(&test_db, &model, op).map_err(TestCaseError::fail)?;
                model.apply(op);
                if matches!(op, DocOperation::Commit) {
                    committed = model.clone();
                }
            }
            test_db.reopen();
            committed.check(&test_db).map_err(TestCaseError::fail)?;
        }

        #[test]
        fn compaction_keeps_live_set(ops in operation_sequence_strategy(1, 80)) {
            let test_db = TestDatabase::file_with_config(
                Config::default().btree_order(4).sync_on_commit(false),
            );
            let mut model = Model::default();
            for op in &ops {
                apply_to_database(&test_db, &model, op).map_err(TestCaseError::fail)?;
                model.apply(op);
            }
            test_db.commit().unwrap();
            let before = test_db.info().unwrap().file_size;

            let result = test_db.compact_in_place(CompactionConfig::purge_all()).unwrap();
            prop_assert!(result.bytes_after <= before);

            model.deleted.clear();
            model.check(&test_db).map_err(TestCaseError::fail)?;
        }
    }
}
