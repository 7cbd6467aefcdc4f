//! Copy-on-write B-tree index engine.
//!
//! Trees map byte-string keys to byte-string values and are stored as
//! immutable `Node` blocks in a [`BlockStore`](crate::block::BlockStore).
//! Every mutation rewrites the path from the changed leaf to the root and
//! returns a new [`RootPointer`]; older roots stay valid, which is what gives
//! readers snapshot isolation for free.
//!
//! Nodes that grow past the order are split into balanced pieces. Deletion
//! drops empty nodes but never merges underfull siblings.

mod builder;
mod cache;
mod iter;
mod node;
mod reduce;
mod tree;

pub use builder::TreeBuilder;
pub use cache::NodeCache;
pub use iter::TreeIter;
pub use node::{ChildPointer, LeafEntry, Node, RootPointer};
pub use reduce::{CountReducer, Reducer, MAX_REDUCTION_SIZE};
pub use tree::BTree;
