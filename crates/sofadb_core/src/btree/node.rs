//! B-tree node representation and encoding.

use crate::block::BlockPos;
use crate::bytes::{put_len_prefixed, ByteReader};
use crate::error::{CoreError, CoreResult};

use super::reduce::MAX_REDUCTION_SIZE;

const KIND_LEAF: u8 = 0;
const KIND_INTERIOR: u8 = 1;

/// A key/value pair stored in a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry {
    /// The key.
    pub key: Vec<u8>,
    /// The value.
    pub value: Vec<u8>,
}

/// A pointer from an interior node to a child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildPointer {
    /// Largest key in the child's subtree.
    pub key: Vec<u8>,
    /// Position of the child node block.
    pub pos: BlockPos,
    /// Reduction over the child's subtree.
    pub reduction: Vec<u8>,
}

/// The root of a tree as recorded in a header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootPointer {
    /// Position of the root node block.
    pub pos: BlockPos,
    /// Reduction over the whole tree.
    pub reduction: Vec<u8>,
}

impl From<ChildPointer> for RootPointer {
    fn from(ptr: ChildPointer) -> Self {
        Self {
            pos: ptr.pos,
            reduction: ptr.reduction,
        }
    }
}

/// An immutable B-tree node.
///
/// Entries (leaf) and children (interior) are sorted by key. Nodes are never
/// modified once written; a change produces new nodes along the path to the
/// root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A leaf holding key/value entries.
    Leaf(Vec<LeafEntry>),
    /// An interior node holding child pointers.
    Interior(Vec<ChildPointer>),
}

impl Node {
    /// Number of entries or children.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Leaf(entries) => entries.len(),
            Self::Interior(children) => children.len(),
        }
    }

    /// Returns true if the node holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest key in the node.
    #[must_use]
    pub fn max_key(&self) -> Option<&[u8]> {
        match self {
            Self::Leaf(entries) => entries.last().map(|e| e.key.as_slice()),
            Self::Interior(children) => children.last().map(|c| c.key.as_slice()),
        }
    }

    /// Encodes the node as a block payload.
    ///
    /// # Errors
    ///
    /// Returns `ReductionTooLarge` if a child reduction does not fit its
    /// one-byte length prefix.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Self::Leaf(entries) => {
                out.push(KIND_LEAF);
                out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
                for entry in entries {
                    put_len_prefixed(&mut out, &entry.key);
                    put_len_prefixed(&mut out, &entry.value);
                }
            }
            Self::Interior(children) => {
                out.push(KIND_INTERIOR);
                out.extend_from_slice(&(children.len() as u32).to_le_bytes());
                for child in children {
                    if child.reduction.len() > MAX_REDUCTION_SIZE {
                        return Err(CoreError::ReductionTooLarge {
                            size: child.reduction.len(),
                            max: MAX_REDUCTION_SIZE,
                        });
                    }
                    put_len_prefixed(&mut out, &child.key);
                    out.extend_from_slice(&child.pos.to_le_bytes());
                    out.push(child.reduction.len() as u8);
                    out.extend_from_slice(&child.reduction);
                }
            }
        }
        Ok(out)
    }

    /// Decodes a node from a block payload.
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` if the payload is malformed, empty, or unsorted.
    pub fn decode(payload: &[u8]) -> CoreResult<Self> {
        let mut r = ByteReader::new(payload, "b-tree node");
        let kind = r.u8()?;
        let count = r.u32()? as usize;
        if count == 0 {
            return Err(CoreError::corrupt("empty b-tree node"));
        }
        let node = match kind {
            KIND_LEAF => {
                let mut entries = Vec::with_capacity(count.min(4096));
                for _ in 0..count {
                    let key = r.len_prefixed()?.to_vec();
                    let value = r.len_prefixed()?.to_vec();
                    entries.push(LeafEntry { key, value });
                }
                Self::Leaf(entries)
            }
            KIND_INTERIOR => {
                let mut children = Vec::with_capacity(count.min(4096));
                for _ in 0..count {
                    let key = r.len_prefixed()?.to_vec();
                    let pos = r.u64()?;
                    let red_len = r.u8()? as usize;
                    let reduction = r.bytes(red_len)?.to_vec();
                    children.push(ChildPointer {
                        key,
                        pos,
                        reduction,
                    });
                }
                Self::Interior(children)
            }
            other => return Err(CoreError::corrupt(format!("unknown node kind {other}"))),
        };
        r.finish()?;
        node.check_sorted()?;
        Ok(node)
    }

    fn check_sorted(&self) -> CoreResult<()> {
        let sorted = match self {
            Self::Leaf(entries) => entries.windows(2).all(|w| w[0].key < w[1].key),
            Self::Interior(children) => children.windows(2).all(|w| w[0].key < w[1].key),
        };
        if sorted {
            Ok(())
        } else {
            Err(CoreError::corrupt("b-tree node keys out of order"))
        }
    }
}
