//! Database headers and the commit protocol.
//!
//! A header is the unit of atomic commit. It records the roots of both index
//! trees plus file-wide counters, and is appended at a page boundary after
//! everything it references. Opening a file means finding the last header
//! that validates; bytes after it belong to writes that never committed.

use crate::block::{BlockPos, BlockStore};
use crate::btree::RootPointer;
use crate::bytes::ByteReader;
use crate::codec::ByIdReduction;
use crate::error::{CoreError, CoreResult};
use crate::types::SequenceNumber;

/// On-disk format version written by this build.
pub const DISK_VERSION: u8 = 1;

/// A database header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Format version.
    pub version: u8,
    /// Sequence number of the latest write.
    pub update_seq: SequenceNumber,
    /// Highest sequence number whose tombstones have been purged.
    pub purge_seq: SequenceNumber,
    /// Root of the by-ID tree.
    pub by_id_root: Option<RootPointer>,
    /// Root of the by-seq tree.
    pub by_seq_root: Option<RootPointer>,
    /// Live documents.
    pub doc_count: u64,
    /// Tombstones.
    pub deleted_count: u64,
    /// File size when the header was written (where its data ends).
    pub file_size: u64,
    /// Where this header lives. Zero for headers not yet written.
    pub position: BlockPos,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            version: DISK_VERSION,
            update_seq: SequenceNumber::ZERO,
            purge_seq: SequenceNumber::ZERO,
            by_id_root: None,
            by_seq_root: None,
            doc_count: 0,
            deleted_count: 0,
            file_size: 0,
            position: 0,
        }
    }
}

impl Header {
    /// Returns true if `other` describes the same database state.
    ///
    /// Ignores where and when the headers were written.
    #[must_use]
    pub fn same_state(&self, other: &Self) -> bool {
        self.update_seq == other.update_seq
            && self.purge_seq == other.purge_seq
            && self.by_id_root == other.by_id_root
            && self.by_seq_root == other.by_seq_root
    }

    /// Recomputes the document counters from the by-ID root reduction.
    ///
    /// # Errors
    ///
    /// Returns `ReducerFailure` if the root reduction is malformed.
    pub fn refresh_counts(&mut self) -> CoreResult<()> {
        let reduction = match &self.by_id_root {
            Some(root) => ByIdReduction::decode(&root.reduction)?,
            None => ByIdReduction::default(),
        };
        self.doc_count = reduction.live;
        self.deleted_count = reduction.deleted;
        Ok(())
    }

    /// Encodes the header payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.push(self.version);
        out.extend_from_slice(&self.update_seq.as_u64().to_le_bytes());
        out.extend_from_slice(&self.purge_seq.as_u64().to_le_bytes());
        encode_root(&mut out, self.by_id_root.as_ref());
        encode_root(&mut out, self.by_seq_root.as_ref());
        out.extend_from_slice(&self.doc_count.to_le_bytes());
        out.extend_from_slice(&self.deleted_count.to_le_bytes());
        out.extend_from_slice(&self.file_size.to_le_bytes());
        out
    }

    /// Decodes a header payload found at `position`.
    ///
    /// # Errors
    ///
    /// - `HeaderVersionMismatch` if the version is not [`DISK_VERSION`]
    /// - `Corrupt` if the payload is malformed or a root points at or past
    ///   the header itself
    pub fn decode(payload: &[u8], position: BlockPos) -> CoreResult<Self> {
        let mut r = ByteReader::new(payload, "header");
        let version = r.u8()?;
        if version != DISK_VERSION {
            return Err(CoreError::HeaderVersionMismatch {
                found: version,
                supported: DISK_VERSION,
            });
        }
        let update_seq = SequenceNumber::new(r.u64()?);
        let purge_seq = SequenceNumber::new(r.u64()?);
        let by_id_root = decode_root(&mut r)?;
        let by_seq_root = decode_root(&mut r)?;
        let doc_count = r.u64()?;
        let deleted_count = r.u64()?;
        let file_size = r.u64()?;
        r.finish()?;

        for root in [&by_id_root, &by_seq_root].into_iter().flatten() {
            if root.pos >= position {
                return Err(CoreError::corrupt(format!(
                    "header at {position} references block at {}",
                    root.pos
                )));
            }
        }

        Ok(Self {
            version,
            update_seq,
            purge_seq,
            by_id_root,
            by_seq_root,
            doc_count,
            deleted_count,
            file_size,
            position,
        })
    }
}

fn encode_root(out: &mut Vec<u8>, root: Option<&RootPointer>) {
    match root {
        None => out.push(0),
        Some(root) => {
            out.push(1);
            out.extend_from_slice(&root.pos.to_le_bytes());
            out.push(root.reduction.len() as u8);
            out.extend_from_slice(&root.reduction);
        }
    }
}

fn decode_root(r: &mut ByteReader<'_>) -> CoreResult<Option<RootPointer>> {
    match r.u8()? {
        0 => Ok(None),
        1 => {
            let pos = r.u64()?;
            let len = r.u8()? as usize;
            let reduction = r.bytes(len)?.to_vec();
            Ok(Some(RootPointer { pos, reduction }))
        }
        other => Err(CoreError::corrupt(format!("invalid root marker {other}"))),
    }
}

/// Loads the last valid header in `store`.
///
/// # Errors
///
/// - `NoHeader` if the file holds no valid header
/// - `HeaderVersionMismatch` if the last valid header has another version
pub fn load_latest(store: &BlockStore) -> CoreResult<Header> {
    let (pos, payload) = store.find_last_header()?.ok_or(CoreError::NoHeader)?;
    let header = Header::decode(&payload, pos)?;
    tracing::debug!(
        pos,
        update_seq = header.update_seq.as_u64(),
        docs = header.doc_count,
        "loaded header"
    );
    Ok(header)
}

/// Durably writes `working` as the new current header and returns it as
/// committed.
///
/// Data blocks are flushed (and synced when `sync` is set) before the header
/// is appended, and the header is synced afterwards, so a crash at any point
/// leaves either the previous header or this one authoritative.
///
/// # Errors
///
/// Returns a write error if any append or sync fails. The previous header
/// remains authoritative in that case.
pub fn commit(store: &BlockStore, working: &Header, sync: bool) -> CoreResult<Header> {
    let mut header = working.clone();
    header.version = DISK_VERSION;
    header.refresh_counts()?;

    if sync {
        store.sync()?;
    } else {
        store.flush()?;
    }
    header.file_size = store.size()?;
    let position = store.write_header(&header.encode())?;
    if sync {
        store.sync()?;
    } else {
        store.flush()?;
    }
    header.position = position;
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockTag, PAGE_SIZE};
    use sofadb_storage::InMemoryBackend;

    fn store() -> BlockStore {
        BlockStore::new(Box::new(InMemoryBackend::new()))
    }

    #[test]
    fn empty_file_has_no_header() {
        assert!(matches!(load_latest(&store()), Err(CoreError::NoHeader)));
    }

    #[test]
    fn commit_then_load() {
        let store = store();
        let node = store.allocate(BlockTag::Node, b"root").unwrap();
        let working = Header {
            update_seq: SequenceNumber::new(5),
            by_seq_root: Some(RootPointer {
                pos: node,
                reduction: 3u64.to_le_bytes().to_vec(),
            }),
            ..Header::default()
        };
        let committed = commit(&store, &working, true).unwrap();
        assert_eq!(committed.position, PAGE_SIZE);
        assert!(committed.file_size > 0);

        let loaded = load_latest(&store).unwrap();
        assert_eq!(loaded, committed);
        assert!(loaded.same_state(&working));
    }

    #[test]
    fn latest_header_wins() {
        let store = store();
        commit(&store, &Header::default(), false).unwrap();
        let second = Header {
            update_seq: SequenceNumber::new(9),
            ..Header::default()
        };
        commit(&store, &second, false).unwrap();
        assert_eq!(load_latest(&store).unwrap().update_seq.as_u64(), 9);
    }

    #[test]
    fn unsupported_version_reported() {
        let store = store();
        let mut payload = Header::default().encode();
        payload[0] = DISK_VERSION + 1;
        store.write_header(&payload).unwrap();
        assert!(matches!(
            load_latest(&store),
            Err(CoreError::HeaderVersionMismatch { found: 2, supported: 1 })
        ));
    }

    #[test]
    fn forward_reference_is_corrupt() {
        let header = Header {
            by_id_root: Some(RootPointer {
                pos: 10_000,
                reduction: Vec::new(),
            }),
            ..Header::default()
        };
        assert!(matches!(
            Header::decode(&header.encode(), 4096),
            Err(CoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn counts_follow_by_id_reduction() {
        let mut header = Header {
            by_id_root: Some(RootPointer {
                pos: 0,
                reduction: ByIdReduction {
                    live: 4,
                    deleted: 2,
                    size: 100,
                }
                .encode(),
            }),
            ..Header::default()
        };
        header.refresh_counts().unwrap();
        assert_eq!((header.doc_count, header.deleted_count), (4, 2));
    }
}
