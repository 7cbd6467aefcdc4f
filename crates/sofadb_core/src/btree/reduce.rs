//! Subtree reductions.
//!
//! Every child pointer carries a small summary of the subtree beneath it.
//! Reductions are computed bottom-up when nodes are written: leaves `reduce`
//! their values, interior nodes `rereduce` their children's reductions. The
//! root's reduction summarizes the whole tree without visiting it.

use crate::error::{CoreError, CoreResult};
use std::fmt;

/// Largest encoded reduction a child pointer may carry.
pub const MAX_REDUCTION_SIZE: usize = 255;

/// Computes reductions over tree values.
pub trait Reducer: Send + Sync + fmt::Debug {
    /// Reduces the values of one leaf.
    ///
    /// # Errors
    ///
    /// Returns `ReducerFailure` if a value cannot be interpreted.
    fn reduce(&self, values: &[&[u8]]) -> CoreResult<Vec<u8>>;

    /// Combines the reductions of sibling subtrees.
    ///
    /// # Errors
    ///
    /// Returns `ReducerFailure` if a reduction cannot be interpreted.
    fn rereduce(&self, reductions: &[&[u8]]) -> CoreResult<Vec<u8>>;
}

/// Counts entries. Encoded as a little-endian `u64`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountReducer;

impl CountReducer {
    /// Decodes a count reduction.
    ///
    /// # Errors
    ///
    /// Returns `ReducerFailure` if the bytes are not a count.
    pub fn decode(reduction: &[u8]) -> CoreResult<u64> {
        let bytes: [u8; 8] = reduction
            .try_into()
            .map_err(|_| CoreError::reducer_failure(format!(
                "count reduction has {} bytes",
                reduction.len()
            )))?;
        Ok(u64::from_le_bytes(bytes))
    }
}

impl Reducer for CountReducer {
    fn reduce(&self, values: &[&[u8]]) -> CoreResult<Vec<u8>> {
        Ok((values.len() as u64).to_le_bytes().to_vec())
    }

    fn rereduce(&self, reductions: &[&[u8]]) -> CoreResult<Vec<u8>> {
        let mut total = 0u64;
        for r in reductions {
            total += Self::decode(r)?;
        }
        Ok(total.to_le_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_reduce_and_rereduce() {
        let r = CountReducer;
        let a = r.reduce(&[b"x", b"y"]).unwrap();
        let b = r.reduce(&[b"z"]).unwrap();
        let total = r.rereduce(&[&a, &b]).unwrap();
        assert_eq!(CountReducer::decode(&total).unwrap(), 3);
    }

    #[test]
    fn count_rejects_garbage() {
        assert!(matches!(
            CountReducer.rereduce(&[b"abc"]),
            Err(CoreError::ReducerFailure { .. })
        ));
    }
}
