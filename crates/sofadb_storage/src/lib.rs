//! # SofaDB Storage
//!
//! Byte-level storage backends for SofaDB.
//!
//! A SofaDB database is a single append-only file. This crate provides the
//! lowest layer underneath it: **opaque byte stores** that can append, read
//! back at an offset, and make appended bytes durable. Backends know nothing
//! about blocks, page markers, B-tree nodes or headers; `sofadb_core` owns all
//! of that.
//!
//! ## Design Principles
//!
//! - Backends never modify bytes in place; the only mutation is `append`
//!   (plus `truncate`, which the engine uses only for tooling and tests)
//! - `sync` is the durability barrier the commit protocol relies on
//! - Must be `Send + Sync` so snapshots can read while a writer appends
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral databases
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use sofadb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::{is_same_file, FileBackend};
pub use memory::InMemoryBackend;
