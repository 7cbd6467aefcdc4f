//! # SofaDB Core
//!
//! Append-only, copy-on-write document engine.
//!
//! A SofaDB database is one file. Documents (an ID, a small metadata blob and
//! an opaque body) are appended as checksummed blocks and indexed by two
//! immutable B-trees: one keyed by document ID, one by the sequence number of
//! the write. A commit appends a header recording both roots; the last valid
//! header in the file is the database.
//!
//! This crate provides:
//! - [`block`]: page-marked, checksummed block store over a
//!   [`StorageBackend`](sofadb_storage::StorageBackend)
//! - [`btree`]: copy-on-write B-trees with subtree reductions
//! - [`codec`]: document block encoding
//! - [`header`]: headers and the commit protocol
//! - [`compaction`]: rewriting a snapshot into a minimal file
//! - [`Database`]: the connection handle tying it all together
//!
//! ## Example
//!
//! ```rust,no_run
//! use sofadb_core::{Database, ErrorCode};
//! use std::path::Path;
//!
//! let db = Database::open(Path::new("notes.sofa"))?;
//! db.put(b"k1", b"m1", b"v1")?;
//! db.commit()?;
//! assert_eq!(db.get(b"k1")?, b"v1");
//!
//! db.delete(b"k1")?;
//! db.commit()?;
//! assert_eq!(db.get(b"k1").unwrap_err().code(), ErrorCode::DocNotFound);
//! db.close()?;
//! # Ok::<(), sofadb_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod block;
pub mod btree;
mod bytes;
pub mod codec;
pub mod compaction;
mod config;
mod database;
mod dir;
mod error;
pub mod header;
mod snapshot;
mod stats;
mod types;

pub use codec::{DocInfo, Document};
pub use compaction::{CancellationToken, CompactionConfig, CompactionResult, Compactor};
pub use config::{Config, MIN_BTREE_ORDER};
pub use database::{Database, DbInfo};
pub use dir::WriterLock;
pub use error::{CoreError, CoreResult, ErrorCategory, ErrorCode};
pub use header::{Header, DISK_VERSION};
pub use snapshot::Snapshot;
pub use stats::{DatabaseStats, StatsSnapshot};
pub use types::{SequenceNumber, MAX_ID_LEN};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
