//! Document encoding.
//!
//! A document is stored as up to two blocks:
//!
//! ```text
//! body := codec:u8 id_len:u32 id body_bytes        (absent for tombstones)
//! info := id_len:u32 id db_seq:u64 rev_seq:u64 flags:u8 content_meta:u8
//!         meta_len:u32 meta
//! ```
//!
//! `codec` is [`BODY_RAW`] or [`BODY_LZ4`]; compression is chosen at write
//! time and is invisible to readers. The index trees store a [`DocPointer`]
//! per document rather than the document itself.

use crate::block::BlockPos;
use crate::btree::Reducer;
use crate::bytes::{put_len_prefixed, ByteReader};
use crate::error::{CoreError, CoreResult};
use crate::types::{SequenceNumber, MAX_ID_LEN};

/// Body stored as-is.
pub const BODY_RAW: u8 = 0;
/// Body compressed with LZ4 (size-prepended block format).
pub const BODY_LZ4: u8 = 1;

/// Per-document flags stored in info blocks and index values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DocFlags(u8);

impl DocFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Document is a tombstone.
    pub const DELETED: Self = Self(0x01);
    /// A body block exists.
    pub const HAS_BODY: Self = Self(0x02);

    /// Creates flags from the raw byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Self {
        Self(b)
    }

    /// Returns the raw byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Checks the deleted flag.
    #[must_use]
    pub const fn is_deleted(self) -> bool {
        self.0 & Self::DELETED.0 != 0
    }

    /// Checks the has-body flag.
    #[must_use]
    pub const fn has_body(self) -> bool {
        self.0 & Self::HAS_BODY.0 != 0
    }

    /// Combines two flag sets.
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// A document as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    /// Unique document ID. Ordered byte-wise.
    pub id: Vec<u8>,
    /// Opaque body. Always empty for tombstones.
    pub body: Vec<u8>,
    /// Opaque, small, application-defined revision metadata.
    pub meta: Vec<u8>,
    /// Revision number, monotonic per ID.
    pub rev_seq: u64,
    /// Database sequence number of the write that produced this revision.
    pub db_seq: SequenceNumber,
    /// Whether this revision is a tombstone.
    pub deleted: bool,
    /// Application-defined content type byte.
    pub content_meta: u8,
}

impl Document {
    /// Creates a live document. Sequence numbers are assigned on save.
    pub fn new(id: impl Into<Vec<u8>>, meta: impl Into<Vec<u8>>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            meta: meta.into(),
            ..Self::default()
        }
    }

    /// Creates a tombstone for `id`.
    pub fn tombstone(id: impl Into<Vec<u8>>, meta: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            meta: meta.into(),
            deleted: true,
            ..Self::default()
        }
    }
}

/// Metadata of a stored document, without its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocInfo {
    /// Document ID.
    pub id: Vec<u8>,
    /// Sequence number of the write.
    pub db_seq: SequenceNumber,
    /// Revision number.
    pub rev_seq: u64,
    /// Whether the document is deleted.
    pub deleted: bool,
    /// Application-defined content type byte.
    pub content_meta: u8,
    /// Revision metadata.
    pub meta: Vec<u8>,
    /// Bytes occupied by the document's blocks.
    pub physical_size: u64,
}

/// Block payloads for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedDocument {
    /// Body block payload, `None` for tombstones.
    pub body: Option<Vec<u8>>,
    /// Info block payload.
    pub info: Vec<u8>,
}

impl EncodedDocument {
    /// Total payload bytes.
    #[must_use]
    pub fn physical_size(&self) -> u64 {
        (self.info.len() + self.body.as_ref().map_or(0, Vec::len)) as u64
    }
}

/// Checks that `id` is usable as a document ID.
///
/// # Errors
///
/// Returns `InvalidArguments` for empty or oversized IDs.
pub fn validate_id(id: &[u8]) -> CoreResult<()> {
    if id.is_empty() {
        return Err(CoreError::invalid_arguments("document id must not be empty"));
    }
    if id.len() > MAX_ID_LEN {
        return Err(CoreError::invalid_arguments(format!(
            "document id is {} bytes (max {MAX_ID_LEN})",
            id.len()
        )));
    }
    Ok(())
}

/// Encodes `doc` into body and info payloads.
///
/// # Errors
///
/// Returns `InvalidArguments` if the ID is invalid or a tombstone carries a body.
pub fn encode(doc: &Document, compress: bool) -> CoreResult<EncodedDocument> {
    validate_id(&doc.id)?;
    if doc.deleted && !doc.body.is_empty() {
        return Err(CoreError::invalid_arguments("deleted document must have an empty body"));
    }

    let body = if doc.deleted {
        None
    } else {
        let (codec, bytes) = compress_body(&doc.body, compress);
        let mut out = Vec::with_capacity(5 + doc.id.len() + bytes.len());
        out.push(codec);
        put_len_prefixed(&mut out, &doc.id);
        out.extend_from_slice(&bytes);
        Some(out)
    };

    let mut flags = DocFlags::NONE;
    if doc.deleted {
        flags = flags.with(DocFlags::DELETED);
    }
    let mut info = Vec::with_capacity(30 + doc.id.len() + doc.meta.len());
    put_len_prefixed(&mut info, &doc.id);
    info.extend_from_slice(&doc.db_seq.as_u64().to_le_bytes());
    info.extend_from_slice(&doc.rev_seq.to_le_bytes());
    info.push(flags.as_byte());
    info.push(doc.content_meta);
    put_len_prefixed(&mut info, &doc.meta);

    Ok(EncodedDocument { body, info })
}

/// Decodes an info payload.
///
/// `physical_size` is left at zero; the caller knows where the blocks live.
///
/// # Errors
///
/// Returns `Corrupt` if the payload is malformed.
pub fn decode_info(info: &[u8]) -> CoreResult<DocInfo> {
    let mut r = ByteReader::new(info, "document info");
    let id = r.len_prefixed()?.to_vec();
    let db_seq = SequenceNumber::new(r.u64()?);
    let rev_seq = r.u64()?;
    let flags = DocFlags::from_byte(r.u8()?);
    let content_meta = r.u8()?;
    let meta = r.len_prefixed()?.to_vec();
    r.finish()?;
    Ok(DocInfo {
        id,
        db_seq,
        rev_seq,
        deleted: flags.is_deleted(),
        content_meta,
        meta,
        physical_size: 0,
    })
}

/// Decodes a document from its payloads.
///
/// # Errors
///
/// Returns `Corrupt` if either payload is malformed, the body belongs to a
/// different ID, or the presence of a body disagrees with the deleted flag.
pub fn decode(body: Option<&[u8]>, info: &[u8]) -> CoreResult<Document> {
    let info = decode_info(info)?;
    let body = match (body, info.deleted) {
        (None, true) => Vec::new(),
        (Some(payload), false) => {
            let mut r = ByteReader::new(payload, "document body");
            let codec = r.u8()?;
            let id = r.len_prefixed()?;
            if id != info.id.as_slice() {
                return Err(CoreError::corrupt(format!(
                    "body block belongs to {:?}, info to {:?}",
                    String::from_utf8_lossy(id),
                    String::from_utf8_lossy(&info.id)
                )));
            }
            decompress_body(codec, r.rest())?
        }
        (None, false) => return Err(CoreError::corrupt("live document has no body")),
        (Some(_), true) => return Err(CoreError::corrupt("deleted document has a body")),
    };
    Ok(Document {
        id: info.id,
        body,
        meta: info.meta,
        rev_seq: info.rev_seq,
        db_seq: info.db_seq,
        deleted: info.deleted,
        content_meta: info.content_meta,
    })
}

#[cfg(feature = "compression")]
fn compress_body(body: &[u8], compress: bool) -> (u8, Vec<u8>) {
    if compress && !body.is_empty() {
        let packed = lz4_flex::compress_prepend_size(body);
        if packed.len() < body.len() {
            return (BODY_LZ4, packed);
        }
    }
    (BODY_RAW, body.to_vec())
}

#[cfg(not(feature = "compression"))]
fn compress_body(body: &[u8], _compress: bool) -> (u8, Vec<u8>) {
    (BODY_RAW, body.to_vec())
}

fn decompress_body(codec: u8, bytes: &[u8]) -> CoreResult<Vec<u8>> {
    match codec {
        BODY_RAW => Ok(bytes.to_vec()),
        #[cfg(feature = "compression")]
        BODY_LZ4 => lz4_flex::decompress_size_prepended(bytes)
            .map_err(|e| CoreError::corrupt(format!("lz4 body: {e}"))),
        #[cfg(not(feature = "compression"))]
        BODY_LZ4 => Err(CoreError::corrupt(
            "compressed body requires the compression feature",
        )),
        other => Err(CoreError::corrupt(format!("unknown body codec {other}"))),
    }
}

/// By-ID index value: where a document's current revision lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocPointer {
    /// Sequence number of the revision.
    pub db_seq: SequenceNumber,
    /// Revision number.
    pub rev_seq: u64,
    /// Position of the info block.
    pub info_pos: BlockPos,
    /// Position of the body block, if any.
    pub body_pos: Option<BlockPos>,
    /// Whether the revision is a tombstone.
    pub deleted: bool,
    /// Payload bytes of the document's blocks.
    pub physical_size: u64,
}

impl DocPointer {
    const ENCODED_LEN: usize = 8 + 8 + 8 + 8 + 1 + 8;

    /// Encodes the pointer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut flags = DocFlags::NONE;
        if self.deleted {
            flags = flags.with(DocFlags::DELETED);
        }
        if self.body_pos.is_some() {
            flags = flags.with(DocFlags::HAS_BODY);
        }
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(&self.db_seq.as_u64().to_le_bytes());
        out.extend_from_slice(&self.rev_seq.to_le_bytes());
        out.extend_from_slice(&self.info_pos.to_le_bytes());
        out.extend_from_slice(&self.body_pos.unwrap_or(0).to_le_bytes());
        out.push(flags.as_byte());
        out.extend_from_slice(&self.physical_size.to_le_bytes());
        out
    }

    /// Decodes a pointer.
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` if the bytes are malformed.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let mut r = ByteReader::new(bytes, "document pointer");
        let pointer = Self::read(&mut r)?;
        r.finish()?;
        Ok(pointer)
    }

    fn read(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        let db_seq = SequenceNumber::new(r.u64()?);
        let rev_seq = r.u64()?;
        let info_pos = r.u64()?;
        let body_pos = r.u64()?;
        let flags = DocFlags::from_byte(r.u8()?);
        let physical_size = r.u64()?;
        Ok(Self {
            db_seq,
            rev_seq,
            info_pos,
            body_pos: flags.has_body().then_some(body_pos),
            deleted: flags.is_deleted(),
            physical_size,
        })
    }
}

/// By-seq index value: the ID written at that sequence and its pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqEntry {
    /// Document ID.
    pub id: Vec<u8>,
    /// Where the revision lives.
    pub pointer: DocPointer,
}

impl SeqEntry {
    /// Encodes the entry.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.id.len() + DocPointer::ENCODED_LEN);
        put_len_prefixed(&mut out, &self.id);
        out.extend_from_slice(&self.pointer.encode());
        out
    }

    /// Decodes an entry.
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` if the bytes are malformed.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let mut r = ByteReader::new(bytes, "sequence entry");
        let id = r.len_prefixed()?.to_vec();
        let pointer = DocPointer::read(&mut r)?;
        r.finish()?;
        Ok(Self { id, pointer })
    }
}

/// Summary of a by-ID subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByIdReduction {
    /// Live documents.
    pub live: u64,
    /// Tombstones.
    pub deleted: u64,
    /// Total payload bytes of current revisions.
    pub size: u64,
}

impl ByIdReduction {
    /// Encodes the reduction.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24);
        out.extend_from_slice(&self.live.to_le_bytes());
        out.extend_from_slice(&self.deleted.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out
    }

    /// Decodes a reduction.
    ///
    /// # Errors
    ///
    /// Returns `ReducerFailure` if the bytes are malformed.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != 24 {
            return Err(CoreError::reducer_failure(format!(
                "by-id reduction has {} bytes",
                bytes.len()
            )));
        }
        let word = |i: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
            u64::from_le_bytes(b)
        };
        Ok(Self {
            live: word(0),
            deleted: word(1),
            size: word(2),
        })
    }

    fn add(self, other: Self) -> Self {
        Self {
            live: self.live + other.live,
            deleted: self.deleted + other.deleted,
            size: self.size + other.size,
        }
    }
}

/// Reduces by-ID values ([`DocPointer`]s) to a [`ByIdReduction`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ByIdReducer;

impl Reducer for ByIdReducer {
    fn reduce(&self, values: &[&[u8]]) -> CoreResult<Vec<u8>> {
        let mut total = ByIdReduction::default();
        for value in values {
            let pointer = DocPointer::decode(value)
                .map_err(|e| CoreError::reducer_failure(e.to_string()))?;
            total = total.add(ByIdReduction {
                live: u64::from(!pointer.deleted),
                deleted: u64::from(pointer.deleted),
                size: pointer.physical_size,
            });
        }
        Ok(total.encode())
    }

    fn rereduce(&self, reductions: &[&[u8]]) -> CoreResult<Vec<u8>> {
        let mut total = ByIdReduction::default();
        for r in reductions {
            total = total.add(ByIdReduction::decode(r)?);
        }
        Ok(total.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        Document {
            id: b"doc-1".to_vec(),
            body: b"{\"hello\":\"world\"}".to_vec(),
            meta: b"rev-meta".to_vec(),
            rev_seq: 3,
            db_seq: SequenceNumber::new(17),
            deleted: false,
            content_meta: 0x80,
        }
    }

    #[test]
    fn round_trip_live_document() {
        let doc = sample();
        let encoded = encode(&doc, false).unwrap();
        assert!(encoded.body.is_some());
        assert_eq!(decode(encoded.body.as_deref(), &encoded.info).unwrap(), doc);
    }

    #[test]
    fn round_trip_tombstone() {
        let mut doc = Document::tombstone("gone", "m");
        doc.db_seq = SequenceNumber::new(4);
        doc.rev_seq = 2;
        let encoded = encode(&doc, true).unwrap();
        assert!(encoded.body.is_none());
        assert_eq!(decode(None, &encoded.info).unwrap(), doc);
    }

    #[test]
    fn round_trip_empty_body_and_meta() {
        let doc = Document::new("k", Vec::new(), Vec::new());
        let encoded = encode(&doc, true).unwrap();
        assert_eq!(decode(encoded.body.as_deref(), &encoded.info).unwrap(), doc);
    }

    #[cfg(feature = "compression")]
    #[test]
    fn compressible_body_is_compressed() {
        let mut doc = sample();
        doc.body = vec![b'a'; 10_000];
        let encoded = encode(&doc, true).unwrap();
        let body = encoded.body.as_ref().unwrap();
        assert_eq!(body[0], BODY_LZ4);
        assert!(body.len() < 1_000);
        assert_eq!(decode(Some(body), &encoded.info).unwrap(), doc);

        let raw = encode(&doc, false).unwrap();
        assert_eq!(raw.body.as_ref().unwrap()[0], BODY_RAW);
    }

    #[test]
    fn invalid_documents_rejected() {
        let empty_id = Document::new("", "", "x");
        assert!(matches!(
            encode(&empty_id, false),
            Err(CoreError::InvalidArguments { .. })
        ));

        let mut bad = Document::tombstone("k", "");
        bad.body = b"not allowed".to_vec();
        assert!(matches!(encode(&bad, false), Err(CoreError::InvalidArguments { .. })));

        let huge = Document::new(vec![b'x'; MAX_ID_LEN + 1], "", "");
        assert!(encode(&huge, false).is_err());
    }

    #[test]
    fn mismatched_body_rejected() {
        let a = encode(&Document::new("a", "", "1"), false).unwrap();
        let b = encode(&Document::new("b", "", "2"), false).unwrap();
        assert!(matches!(
            decode(a.body.as_deref(), &b.info),
            Err(CoreError::Corrupt { .. })
        ));
        assert!(decode(None, &a.info).is_err());
    }

    #[test]
    fn pointer_round_trip() {
        let pointer = DocPointer {
            db_seq: SequenceNumber::new(9),
            rev_seq: 2,
            info_pos: 4096,
            body_pos: Some(12),
            deleted: false,
            physical_size: 77,
        };
        assert_eq!(DocPointer::decode(&pointer.encode()).unwrap(), pointer);

        let tombstone = DocPointer {
            body_pos: None,
            deleted: true,
            ..pointer
        };
        assert_eq!(DocPointer::decode(&tombstone.encode()).unwrap(), tombstone);

        let entry = SeqEntry {
            id: b"doc".to_vec(),
            pointer,
        };
        assert_eq!(SeqEntry::decode(&entry.encode()).unwrap(), entry);
    }

    #[test]
    fn by_id_reducer_counts() {
        let live = DocPointer {
            db_seq: SequenceNumber::new(1),
            rev_seq: 1,
            info_pos: 0,
            body_pos: Some(0),
            deleted: false,
            physical_size: 10,
        };
        let dead = DocPointer {
            deleted: true,
            body_pos: None,
            physical_size: 5,
            ..live
        };
        let a = ByIdReducer.reduce(&[&live.encode(), &dead.encode()]).unwrap();
        let b = ByIdReducer.reduce(&[&live.encode()]).unwrap();
        let total = ByIdReduction::decode(&ByIdReducer.rereduce(&[&a, &b]).unwrap()).unwrap();
        assert_eq!(
            total,
            ByIdReduction {
                live: 2,
                deleted: 1,
                size: 25
            }
        );
        assert!(matches!(
            ByIdReducer.reduce(&[b"junk"]),
            Err(CoreError::ReducerFailure { .. })
        ));
    }
}
