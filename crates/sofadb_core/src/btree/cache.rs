//! Decoded node cache.

use super::node::Node;
use crate::block::BlockPos;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A bounded cache of decoded nodes keyed by block position.
///
/// Nodes are immutable once written, so a cached node is valid for as long as
/// the file it came from. When the cache is full it is cleared wholesale.
#[derive(Debug)]
pub struct NodeCache {
    capacity: usize,
    nodes: Mutex<HashMap<BlockPos, Arc<Node>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl NodeCache {
    /// Creates a cache holding at most `capacity` nodes. Zero disables caching.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            nodes: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Looks up a node.
    pub fn get(&self, pos: BlockPos) -> Option<Arc<Node>> {
        let found = self.nodes.lock().get(&pos).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Caches a node.
    pub fn insert(&self, pos: BlockPos, node: Arc<Node>) {
        if self.capacity == 0 {
            return;
        }
        let mut nodes = self.nodes.lock();
        if nodes.len() >= self.capacity {
            nodes.clear();
        }
        nodes.insert(pos, node);
    }

    /// Number of cached nodes.
    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `(hits, misses)`.
    pub fn hit_stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}
