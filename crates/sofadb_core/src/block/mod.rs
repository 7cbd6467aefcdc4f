//! Append-only block store.
//!
//! The database file is a sequence of checksummed blocks laid over fixed-size
//! pages. Blocks are never rewritten; new state is always appended and space
//! is only reclaimed by compaction into a fresh file.

mod format;
mod store;

pub use format::{Block, BlockPos, BlockTag, MARKER_DATA, MARKER_HEADER, MAX_BLOCK_SIZE, PAGE_SIZE};
pub use store::BlockStore;
