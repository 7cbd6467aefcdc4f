//! Copy-on-write B-tree operations.

use super::cache::NodeCache;
use super::node::{ChildPointer, LeafEntry, Node, RootPointer};
use super::reduce::{Reducer, MAX_REDUCTION_SIZE};
use crate::block::{BlockPos, BlockStore, BlockTag};
use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::sync::Arc;

/// Handle for reading and rewriting one B-tree stored in a [`BlockStore`].
///
/// The tree itself is identified by a [`RootPointer`]; every mutation takes the
/// current root and returns a new one, leaving all nodes reachable from the old
/// root untouched. Handles are cheap to clone.
#[derive(Clone)]
pub struct BTree {
    store: Arc<BlockStore>,
    cache: Arc<NodeCache>,
    reducer: Arc<dyn Reducer>,
    order: usize,
}

enum Op<'a> {
    Insert(&'a [u8], &'a [u8]),
    Remove(&'a [u8]),
}

impl Op<'_> {
    fn key(&self) -> &[u8] {
        match self {
            Op::Insert(key, _) | Op::Remove(key) => key,
        }
    }
}

/// Outcome of modifying one subtree.
enum Change {
    Unchanged,
    /// The subtree was rewritten into zero, one or several nodes.
    Replaced(Vec<ChildPointer>),
}

impl BTree {
    /// Creates a tree handle.
    ///
    /// `order` is the maximum number of entries a node may hold before it is
    /// split.
    pub fn new(
        store: Arc<BlockStore>,
        cache: Arc<NodeCache>,
        reducer: Arc<dyn Reducer>,
        order: usize,
    ) -> Self {
        Self {
            store,
            cache,
            reducer,
            order: order.max(2),
        }
    }

    /// The node order.
    #[must_use]
    pub fn order(&self) -> usize {
        self.order
    }

    /// Reads a node, going through the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the block cannot be read or decoded.
    pub fn read_node(&self, pos: BlockPos) -> CoreResult<Arc<Node>> {
        if let Some(node) = self.cache.get(pos) {
            return Ok(node);
        }
        let payload = self.store.read_tagged(pos, BlockTag::Node)?;
        let node = Arc::new(Node::decode(&payload)?);
        self.cache.insert(pos, Arc::clone(&node));
        Ok(node)
    }

    /// Writes a non-empty node and returns a pointer to it.
    pub(crate) fn write_node(&self, node: Node) -> CoreResult<ChildPointer> {
        let reduction = match &node {
            Node::Leaf(entries) => {
                let values: Vec<&[u8]> = entries.iter().map(|e| e.value.as_slice()).collect();
                self.reducer.reduce(&values)?
            }
            Node::Interior(children) => {
                let reductions: Vec<&[u8]> =
                    children.iter().map(|c| c.reduction.as_slice()).collect();
                self.reducer.rereduce(&reductions)?
            }
        };
        if reduction.len() > MAX_REDUCTION_SIZE {
            return Err(CoreError::ReductionTooLarge {
                size: reduction.len(),
                max: MAX_REDUCTION_SIZE,
            });
        }
        let key = node
            .max_key()
            .ok_or_else(|| CoreError::corrupt("attempted to write an empty node"))?
            .to_vec();
        let pos = self.store.allocate(BlockTag::Node, &node.encode()?)?;
        self.cache.insert(pos, Arc::new(node));
        Ok(ChildPointer {
            key,
            pos,
            reduction,
        })
    }

    /// Looks up `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if a node on the path cannot be read.
    pub fn lookup(&self, root: Option<&RootPointer>, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let Some(root) = root else {
            return Ok(None);
        };
        let mut node = self.read_node(root.pos)?;
        loop {
            let next = match node.as_ref() {
                Node::Leaf(entries) => {
                    return Ok(entries
                        .binary_search_by(|e| e.key.as_slice().cmp(key))
                        .ok()
                        .map(|i| entries[i].value.clone()));
                }
                Node::Interior(children) => {
                    let idx = children.partition_point(|c| c.key.as_slice() < key);
                    match children.get(idx) {
                        Some(child) => child.pos,
                        None => return Ok(None),
                    }
                }
            };
            node = self.read_node(next)?;
        }
    }

    /// Inserts or replaces `key`, returning the new root.
    ///
    /// # Errors
    ///
    /// Returns an error if a node cannot be read or written, or a reduction
    /// fails.
    pub fn insert(
        &self,
        root: Option<&RootPointer>,
        key: &[u8],
        value: &[u8],
    ) -> CoreResult<Option<RootPointer>> {
        self.apply(root, &Op::Insert(key, value))
    }

    /// Removes `key` if present, returning the new root (`None` once the tree
    /// is empty).
    ///
    /// Nodes left underfull are kept as they are; empty nodes are dropped
    /// from their parent and a root with a single child is collapsed.
    ///
    /// # Errors
    ///
    /// Returns an error if a node cannot be read or written, or a reduction
    /// fails.
    pub fn remove(&self, root: Option<&RootPointer>, key: &[u8]) -> CoreResult<Option<RootPointer>> {
        self.apply(root, &Op::Remove(key))
    }

    fn apply(&self, root: Option<&RootPointer>, op: &Op<'_>) -> CoreResult<Option<RootPointer>> {
        let Some(root) = root else {
            return match op {
                Op::Insert(key, value) => {
                    let leaf = Node::Leaf(vec![LeafEntry {
                        key: key.to_vec(),
                        value: value.to_vec(),
                    }]);
                    Ok(Some(self.write_node(leaf)?.into()))
                }
                Op::Remove(_) => Ok(None),
            };
        };
        match self.modify(root.pos, op)? {
            Change::Unchanged => Ok(Some(root.clone())),
            Change::Replaced(pointers) => self.build_root(pointers),
        }
    }

    fn modify(&self, pos: BlockPos, op: &Op<'_>) -> CoreResult<Change> {
        let node = self.read_node(pos)?;
        match node.as_ref() {
            Node::Leaf(entries) => {
                let found = entries.binary_search_by(|e| e.key.as_slice().cmp(op.key()));
                let mut entries = entries.clone();
                match (op, found) {
                    (Op::Insert(_, value), Ok(i)) => {
                        if entries[i].value == *value {
                            return Ok(Change::Unchanged);
                        }
                        entries[i].value = value.to_vec();
                    }
                    (Op::Insert(key, value), Err(i)) => entries.insert(
                        i,
                        LeafEntry {
                            key: key.to_vec(),
                            value: value.to_vec(),
                        },
                    ),
                    (Op::Remove(_), Ok(i)) => {
                        entries.remove(i);
                    }
                    (Op::Remove(_), Err(_)) => return Ok(Change::Unchanged),
                }
                Ok(Change::Replaced(self.write_split(Node::Leaf(entries))?))
            }
            Node::Interior(children) => {
                let mut idx = children.partition_point(|c| c.key.as_slice() < op.key());
                if idx == children.len() {
                    match op {
                        // Keys past the current maximum go into the last child.
                        Op::Insert(..) => idx -= 1,
                        Op::Remove(_) => return Ok(Change::Unchanged),
                    }
                }
                match self.modify(children[idx].pos, op)? {
                    Change::Unchanged => Ok(Change::Unchanged),
                    Change::Replaced(pointers) => {
                        let mut children = children.clone();
                        children.splice(idx..=idx, pointers);
                        Ok(Change::Replaced(self.write_split(Node::Interior(children))?))
                    }
                }
            }
        }
    }

    /// Writes `node`, splitting it into balanced pieces if it exceeds the order.
    fn write_split(&self, node: Node) -> CoreResult<Vec<ChildPointer>> {
        let len = node.len();
        if len == 0 {
            return Ok(Vec::new());
        }
        if len <= self.order {
            return Ok(vec![self.write_node(node)?]);
        }
        let pieces = len.div_ceil(self.order);
        let mut out = Vec::with_capacity(pieces);
        match node {
            Node::Leaf(entries) => {
                for chunk in balanced_chunks(entries, pieces) {
                    out.push(self.write_node(Node::Leaf(chunk))?);
                }
            }
            Node::Interior(children) => {
                for chunk in balanced_chunks(children, pieces) {
                    out.push(self.write_node(Node::Interior(chunk))?);
                }
            }
        }
        Ok(out)
    }

    fn build_root(&self, mut pointers: Vec<ChildPointer>) -> CoreResult<Option<RootPointer>> {
        loop {
            match pointers.len() {
                0 => return Ok(None),
                1 => {
                    let mut ptr = pointers.remove(0);
                    // Collapse interior roots that only have one child.
                    loop {
                        let node = self.read_node(ptr.pos)?;
                        match node.as_ref() {
                            Node::Interior(children) if children.len() == 1 => {
                                ptr = children[0].clone();
                            }
                            _ => return Ok(Some(ptr.into())),
                        }
                    }
                }
                _ => pointers = self.write_split(Node::Interior(pointers))?,
            }
        }
    }
}

/// Splits `items` into `pieces` runs whose lengths differ by at most one.
fn balanced_chunks<T>(items: Vec<T>, pieces: usize) -> Vec<Vec<T>> {
    let total = items.len();
    let base = total / pieces;
    let extra = total % pieces;
    let mut out = Vec::with_capacity(pieces);
    let mut iter = items.into_iter();
    for i in 0..pieces {
        let size = base + usize::from(i < extra);
        out.push(iter.by_ref().take(size).collect());
    }
    out
}

impl fmt::Debug for BTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BTree")
            .field("order", &self.order)
            .field("reducer", &self.reducer)
            .finish_non_exhaustive()
    }
}
