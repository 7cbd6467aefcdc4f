//! Ordered iteration over a tree.

use super::node::{Node, RootPointer};
use super::tree::BTree;
use crate::block::BlockPos;
use crate::error::{CoreError, CoreResult};
use std::sync::Arc;

/// In-order iterator over `(key, value)` pairs.
///
/// Owns a clone of the tree handle and the nodes on its current path, so it
/// keeps reading the root it was created from even if the tree moves on.
pub struct TreeIter {
    tree: BTree,
    /// Each frame is a node and the index of the next entry or child to visit.
    stack: Vec<(Arc<Node>, usize)>,
    pending_error: Option<CoreError>,
}

enum Step {
    Yield(Vec<u8>, Vec<u8>),
    Descend(BlockPos),
    Pop,
}

impl TreeIter {
    pub(crate) fn new(tree: BTree, root: Option<&RootPointer>, start: Option<&[u8]>) -> Self {
        let mut iter = Self {
            tree,
            stack: Vec::new(),
            pending_error: None,
        };
        if let Some(root) = root {
            if let Err(e) = iter.seek(root.pos, start) {
                iter.stack.clear();
                iter.pending_error = Some(e);
            }
        }
        iter
    }

    fn seek(&mut self, root: BlockPos, start: Option<&[u8]>) -> CoreResult<()> {
        let mut pos = root;
        loop {
            let node = self.tree.read_node(pos)?;
            let idx = match (node.as_ref(), start) {
                (_, None) => 0,
                (Node::Leaf(entries), Some(key)) => {
                    entries.partition_point(|e| e.key.as_slice() < key)
                }
                (Node::Interior(children), Some(key)) => {
                    children.partition_point(|c| c.key.as_slice() < key)
                }
            };
            let child = match node.as_ref() {
                Node::Leaf(_) => None,
                Node::Interior(children) => match children.get(idx) {
                    Some(child) => Some(child.pos),
                    None => return Ok(()),
                },
            };
            match child {
                None => {
                    self.stack.push((node, idx));
                    return Ok(());
                }
                Some(child) => {
                    self.stack.push((node, idx + 1));
                    pos = child;
                }
            }
        }
    }
}

impl Iterator for TreeIter {
    type Item = CoreResult<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending_error.take() {
            return Some(Err(e));
        }
        loop {
            let step = {
                let (node, idx) = self.stack.last_mut()?;
                match node.as_ref() {
                    Node::Leaf(entries) => match entries.get(*idx) {
                        Some(entry) => {
                            *idx += 1;
                            Step::Yield(entry.key.clone(), entry.value.clone())
                        }
                        None => Step::Pop,
                    },
                    Node::Interior(children) => match children.get(*idx) {
                        Some(child) => {
                            *idx += 1;
                            Step::Descend(child.pos)
                        }
                        None => Step::Pop,
                    },
                }
            };
            match step {
                Step::Yield(key, value) => return Some(Ok((key, value))),
                Step::Pop => {
                    self.stack.pop();
                }
                Step::Descend(pos) => match self.tree.read_node(pos) {
                    Ok(node) => self.stack.push((node, 0)),
                    Err(e) => {
                        self.stack.clear();
                        return Some(Err(e));
                    }
                },
            }
        }
    }
}

impl BTree {
    /// Iterates entries in key order, starting at the first key `>= start`.
    pub fn iter_from(&self, root: Option<&RootPointer>, start: Option<&[u8]>) -> TreeIter {
        TreeIter::new(self.clone(), root, start)
    }
}

#[cfg(test)]
mod tests {
    use crate::block::BlockStore;
    use crate::btree::{BTree, CountReducer, NodeCache, RootPointer};
    use sofadb_storage::InMemoryBackend;
    use std::sync::Arc;

    fn populated(n: u32) -> (BTree, Option<RootPointer>) {
        let store = Arc::new(BlockStore::new(Box::new(InMemoryBackend::new())));
        let tree = BTree::new(store, Arc::new(NodeCache::new(0)), Arc::new(CountReducer), 4);
        let mut root = None;
        for i in (0..n).rev() {
            let key = format!("k{i:04}");
            root = tree.insert(root.as_ref(), key.as_bytes(), b"v").unwrap();
        }
        (tree, root)
    }

    fn keys(tree: &BTree, root: Option<&RootPointer>, start: Option<&[u8]>) -> Vec<String> {
        tree.iter_from(root, start)
            .map(|r| String::from_utf8(r.unwrap().0).unwrap())
            .collect()
    }

    #[test]
    fn iterates_in_order() {
        let (tree, root) = populated(57);
        let all = keys(&tree, root.as_ref(), None);
        assert_eq!(all.len(), 57);
        assert!(all.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn iterates_from_start_key() {
        let (tree, root) = populated(30);
        let tail = keys(&tree, root.as_ref(), Some(b"k0020"));
        assert_eq!(tail.first().map(String::as_str), Some("k0020"));
        assert_eq!(tail.len(), 10);

        let between = keys(&tree, root.as_ref(), Some(b"k0020a"));
        assert_eq!(between.first().map(String::as_str), Some("k0021"));

        assert!(keys(&tree, root.as_ref(), Some(b"z")).is_empty());
    }

    #[test]
    fn empty_tree_yields_nothing() {
        let (tree, _) = populated(0);
        assert_eq!(tree.iter_from(None, None).count(), 0);
    }
}
