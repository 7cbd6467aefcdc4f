//! Benchmark utilities.

#![warn(missing_docs)]

use rand::Rng;
use sofadb_core::{Config, Database};
use sofadb_storage::InMemoryBackend;

/// Generate random document data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// ID of the `i`th benchmark document. Zero-padded so ID order matches `i`.
pub fn doc_id(i: usize) -> Vec<u8> {
    format!("bench-{i:010}").into_bytes()
}

/// Generate a batch of random document IDs.
pub fn random_ids(count: usize) -> Vec<Vec<u8>> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| doc_id(rng.gen_range(0..usize::MAX / 2))).collect()
}

/// Opens an in-memory database that does not fsync.
pub fn memory_db() -> Database {
    Database::open_with_backend(
        Box::new(InMemoryBackend::new()),
        Config::default().sync_on_commit(false),
    )
    .expect("open in-memory database")
}

/// Writes `count` documents of `payload_size` bytes and commits them.
pub fn populate(db: &Database, count: usize, payload_size: usize) {
    let data = random_data(payload_size);
    for i in 0..count {
        db.put(&doc_id(i), b"", &data).expect("put");
    }
    db.commit().expect("commit");
}
