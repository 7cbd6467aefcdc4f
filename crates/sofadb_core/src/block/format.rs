//! On-disk block layout.
//!
//! ```text
//! file   := page*
//! page   := marker:u8 bytes[PAGE_SIZE - 1]
//! block  := length:u32 crc32:u32 tag:u8 payload[length]
//! ```
//!
//! The first byte of every page is a marker and is never part of a block;
//! block bytes flow around markers, so a block may span any number of pages.
//! A header block always starts right after a page whose marker is
//! [`MARKER_HEADER`], which lets recovery find headers by probing page
//! boundaries only. The CRC covers the tag and the payload.

use crate::error::{CoreError, CoreResult};

/// Size of a page in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// Marker for a page that continues data.
pub const MARKER_DATA: u8 = 0x00;

/// Marker for a page whose first block is a header.
pub const MARKER_HEADER: u8 = 0x01;

/// Length + checksum + tag.
pub const BLOCK_PREFIX_LEN: usize = 9;

/// Largest payload a single block may hold.
pub const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;

/// Position of a block in the file.
///
/// This is the physical offset at which the block's bytes begin (a page
/// marker at that offset is skipped when reading).
pub type BlockPos = u64;

/// What a block's payload holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockTag {
    /// Document body.
    Body = 1,
    /// Document info (ID, sequence numbers, flags, metadata).
    Info = 2,
    /// B-tree node.
    Node = 3,
    /// Database header.
    Header = 4,
}

impl BlockTag {
    /// Parses a tag byte.
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` for unknown tags.
    pub fn from_u8(value: u8) -> CoreResult<Self> {
        match value {
            1 => Ok(Self::Body),
            2 => Ok(Self::Info),
            3 => Ok(Self::Node),
            4 => Ok(Self::Header),
            other => Err(CoreError::corrupt(format!("unknown block tag {other}"))),
        }
    }
}

/// A block read back from the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// The block's tag.
    pub tag: BlockTag,
    /// The block's payload.
    pub payload: Vec<u8>,
}

/// Builds the logical (marker-free) bytes of a block.
pub(crate) fn encode_block(tag: BlockTag, payload: &[u8]) -> Vec<u8> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[tag as u8]);
    hasher.update(payload);
    let crc = hasher.finalize();

    let mut out = Vec::with_capacity(BLOCK_PREFIX_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&crc.to_le_bytes());
    out.push(tag as u8);
    out.extend_from_slice(payload);
    out
}

/// Splits a block prefix into `(payload length, stored crc, raw tag)`.
pub(crate) fn decode_prefix(prefix: &[u8; BLOCK_PREFIX_LEN]) -> (usize, u32, u8) {
    let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    let crc = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
    (len, crc, prefix[8])
}

/// Verifies the checksum of a tag + payload pair.
pub(crate) fn verify(stored: u32, tag: u8, payload: &[u8]) -> CoreResult<()> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[tag]);
    hasher.update(payload);
    let actual = hasher.finalize();
    if actual != stored {
        return Err(CoreError::ChecksumMismatch {
            expected: stored,
            actual,
        });
    }
    Ok(())
}

/// Number of physical bytes needed to hold `logical_len` block bytes
/// written from physical offset `start`.
pub(crate) fn physical_len(start: u64, logical_len: u64) -> u64 {
    let mut pos = start;
    let mut remaining = logical_len;
    while remaining > 0 {
        if pos % PAGE_SIZE == 0 {
            pos += 1;
            continue;
        }
        let room = PAGE_SIZE - pos % PAGE_SIZE;
        let take = room.min(remaining);
        pos += take;
        remaining -= take;
    }
    pos - start
}

/// Interleaves data markers into `logical` for a write at `start`.
pub(crate) fn add_markers(start: u64, logical: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(logical.len() + logical.len() / PAGE_SIZE as usize + 2);
    let mut pos = start;
    let mut rest = logical;
    while !rest.is_empty() {
        if pos % PAGE_SIZE == 0 {
            out.push(MARKER_DATA);
            pos += 1;
            continue;
        }
        let room = (PAGE_SIZE - pos % PAGE_SIZE) as usize;
        let take = room.min(rest.len());
        out.extend_from_slice(&rest[..take]);
        pos += take as u64;
        rest = &rest[take..];
    }
    out
}

/// Drops the marker bytes from physical bytes read at `start`.
pub(crate) fn strip_markers(start: u64, physical: &[u8]) -> Vec<u8> {
    physical
        .iter()
        .enumerate()
        .filter(|(i, _)| (start + *i as u64) % PAGE_SIZE != 0)
        .map(|(_, b)| *b)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trip() {
        for tag in [BlockTag::Body, BlockTag::Info, BlockTag::Node, BlockTag::Header] {
            assert_eq!(BlockTag::from_u8(tag as u8).unwrap(), tag);
        }
        assert!(matches!(BlockTag::from_u8(9), Err(CoreError::Corrupt { .. })));
    }

    #[test]
    fn checksum_detects_flipped_byte() {
        let encoded = encode_block(BlockTag::Body, b"payload");
        let prefix: [u8; BLOCK_PREFIX_LEN] = encoded[..BLOCK_PREFIX_LEN].try_into().unwrap();
        let (len, crc, tag) = decode_prefix(&prefix);
        assert_eq!(len, 7);
        verify(crc, tag, &encoded[BLOCK_PREFIX_LEN..]).unwrap();

        let mut bad = encoded[BLOCK_PREFIX_LEN..].to_vec();
        bad[0] ^= 0xFF;
        assert!(matches!(
            verify(crc, tag, &bad),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn markers_inserted_at_page_boundaries() {
        let logical = vec![0xAB; PAGE_SIZE as usize * 2];
        let physical = add_markers(0, &logical);
        assert_eq!(physical.len() as u64, physical_len(0, logical.len() as u64));
        assert_eq!(physical[0], MARKER_DATA);
        assert_eq!(physical[PAGE_SIZE as usize], MARKER_DATA);
        assert_eq!(physical[PAGE_SIZE as usize * 2], MARKER_DATA);
        assert_eq!(strip_markers(0, &physical), logical);
    }

    #[test]
    fn markers_mid_page_start() {
        let start = PAGE_SIZE - 3;
        let logical = b"abcdefgh";
        let physical = add_markers(start, logical);
        assert_eq!(physical.len(), 9);
        assert_eq!(&physical[..3], b"abc");
        assert_eq!(physical[3], MARKER_DATA);
        assert_eq!(strip_markers(start, &physical), logical);
        assert_eq!(physical_len(start, 8), 9);
        assert_eq!(physical_len(start, 0), 0);
    }
}
