//! Bottom-up bulk loading of sorted entries.

use super::node::{ChildPointer, LeafEntry, Node, RootPointer};
use super::tree::BTree;
use crate::error::{CoreError, CoreResult};

/// Builds a tree from entries supplied in strictly increasing key order.
///
/// Nodes are filled to the tree's order and written as soon as they are full,
/// so memory use is one partial node per level. Used by compaction to lay out
/// fresh trees without path rewrites.
#[derive(Debug)]
pub struct TreeBuilder {
    tree: BTree,
    leaf: Vec<LeafEntry>,
    levels: Vec<Vec<ChildPointer>>,
    last_key: Option<Vec<u8>>,
    entries: u64,
}

impl TreeBuilder {
    /// Starts a new, empty build.
    #[must_use]
    pub fn new(tree: BTree) -> Self {
        Self {
            tree,
            leaf: Vec::new(),
            levels: Vec::new(),
            last_key: None,
            entries: 0,
        }
    }

    /// Number of entries pushed so far.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.entries
    }

    /// Returns true if nothing has been pushed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Appends an entry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArguments` if `key` does not sort after the previous key,
    /// or a write error if a full node cannot be written.
    pub fn push(&mut self, key: Vec<u8>, value: Vec<u8>) -> CoreResult<()> {
        if let Some(last) = &self.last_key {
            if key <= *last {
                return Err(CoreError::invalid_arguments(
                    "bulk-loaded keys must be strictly increasing",
                ));
            }
        }
        self.last_key = Some(key.clone());
        self.leaf.push(LeafEntry { key, value });
        self.entries += 1;
        if self.leaf.len() >= self.tree.order() {
            let leaf = std::mem::take(&mut self.leaf);
            let ptr = self.tree.write_node(Node::Leaf(leaf))?;
            self.add_pointer(0, ptr)?;
        }
        Ok(())
    }

    fn add_pointer(&mut self, level: usize, ptr: ChildPointer) -> CoreResult<()> {
        if self.levels.len() == level {
            self.levels.push(Vec::new());
        }
        self.levels[level].push(ptr);
        if self.levels[level].len() >= self.tree.order() {
            let children = std::mem::take(&mut self.levels[level]);
            let parent = self.tree.write_node(Node::Interior(children))?;
            self.add_pointer(level + 1, parent)?;
        }
        Ok(())
    }

    /// Writes the remaining partial nodes and returns the root.
    ///
    /// # Errors
    ///
    /// Returns a write error if a node cannot be written.
    pub fn finish(mut self) -> CoreResult<Option<RootPointer>> {
        if !self.leaf.is_empty() {
            let leaf = std::mem::take(&mut self.leaf);
            let ptr = self.tree.write_node(Node::Leaf(leaf))?;
            self.add_pointer(0, ptr)?;
        }
        let mut level = 0;
        while level < self.levels.len() {
            let pointers = std::mem::take(&mut self.levels[level]);
            let is_top = level + 1 == self.levels.len();
            if is_top && pointers.len() == 1 {
                return Ok(pointers.into_iter().next().map(RootPointer::from));
            }
            if !pointers.is_empty() {
                let parent = self.tree.write_node(Node::Interior(pointers))?;
                self.add_pointer(level + 1, parent)?;
            }
            level += 1;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockStore;
    use crate::btree::{CountReducer, NodeCache};
    use sofadb_storage::InMemoryBackend;
    use std::sync::Arc;

    fn tree() -> BTree {
        let store = Arc::new(BlockStore::new(Box::new(InMemoryBackend::new())));
        BTree::new(store, Arc::new(NodeCache::new(16)), Arc::new(CountReducer), 4)
    }

    fn build(tree: &BTree, n: u32) -> Option<RootPointer> {
        let mut builder = TreeBuilder::new(tree.clone());
        for i in 0..n {
            builder
                .push(format!("{i:06}").into_bytes(), i.to_le_bytes().to_vec())
                .unwrap();
        }
        assert_eq!(builder.len(), u64::from(n));
        builder.finish().unwrap()
    }

    #[test]
    fn empty_build_has_no_root() {
        assert!(build(&tree(), 0).is_none());
    }

    #[test]
    fn built_tree_is_searchable() {
        for n in [1, 3, 4, 5, 16, 17, 64, 65, 300] {
            let t = tree();
            let root = build(&t, n);
            assert_eq!(
                CountReducer::decode(&root.as_ref().unwrap().reduction).unwrap(),
                u64::from(n),
                "n = {n}"
            );
            for i in 0..n {
                let key = format!("{i:06}");
                assert_eq!(
                    t.lookup(root.as_ref(), key.as_bytes()).unwrap(),
                    Some(i.to_le_bytes().to_vec())
                );
            }
            assert_eq!(t.iter_from(root.as_ref(), None).count(), n as usize);
        }
    }

    #[test]
    fn built_tree_accepts_inserts() {
        let t = tree();
        let mut root = build(&t, 50);
        root = t.insert(root.as_ref(), b"000010x", b"new").unwrap();
        root = t.remove(root.as_ref(), b"000000").unwrap();
        assert_eq!(CountReducer::decode(&root.unwrap().reduction).unwrap(), 50);
    }

    #[test]
    fn unsorted_push_rejected() {
        let mut builder = TreeBuilder::new(tree());
        builder.push(b"b".to_vec(), Vec::new()).unwrap();
        assert!(matches!(
            builder.push(b"a".to_vec(), Vec::new()),
            Err(CoreError::InvalidArguments { .. })
        ));
        assert!(builder.push(b"b".to_vec(), Vec::new()).is_err());
    }
}
