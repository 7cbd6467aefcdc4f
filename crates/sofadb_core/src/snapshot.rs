//! Read-only views of one database header.

use crate::block::{BlockStore, BlockTag};
use crate::btree::{BTree, RootPointer};
use crate::codec::{self, DocInfo, DocPointer, Document, SeqEntry};
use crate::error::{CoreError, CoreResult};
use crate::header::Header;
use crate::types::SequenceNumber;
use std::sync::Arc;

/// A consistent, read-only view of the database as of one header.
///
/// A snapshot keeps the block store alive and only follows the roots recorded
/// in its header. Commits made after it was taken are invisible to it, even
/// while it is being read.
#[derive(Debug, Clone)]
pub struct Snapshot {
    store: Arc<BlockStore>,
    by_id: BTree,
    by_seq: BTree,
    header: Header,
}

impl Snapshot {
    pub(crate) fn new(store: Arc<BlockStore>, by_id: BTree, by_seq: BTree, header: Header) -> Self {
        Self {
            store,
            by_id,
            by_seq,
            header,
        }
    }

    /// The header this snapshot reads.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Sequence number of the latest write visible here.
    #[must_use]
    pub fn update_seq(&self) -> SequenceNumber {
        self.header.update_seq
    }

    /// Live documents.
    #[must_use]
    pub fn doc_count(&self) -> u64 {
        self.header.doc_count
    }

    /// Tombstones.
    #[must_use]
    pub fn deleted_count(&self) -> u64 {
        self.header.deleted_count
    }

    /// Current size of the underlying file.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn file_size(&self) -> CoreResult<u64> {
        self.store.size()
    }

    pub(crate) fn by_id_tree(&self) -> &BTree {
        &self.by_id
    }

    pub(crate) fn by_id_root(&self) -> Option<&RootPointer> {
        self.header.by_id_root.as_ref()
    }

    /// Returns the body of a live document.
    ///
    /// # Errors
    ///
    /// Returns `DocNotFound` if the document is absent or deleted.
    pub fn get(&self, id: &[u8]) -> CoreResult<Vec<u8>> {
        Ok(self.get_document(id)?.body)
    }

    /// Returns a live document.
    ///
    /// # Errors
    ///
    /// Returns `DocNotFound` if the document is absent or deleted,
    /// `InvalidArguments` for an invalid ID, or a read/corruption error.
    pub fn get_document(&self, id: &[u8]) -> CoreResult<Document> {
        let pointer = self.lookup(id)?;
        if pointer.deleted {
            return Err(CoreError::doc_not_found(id));
        }
        self.read_document(&pointer)
    }

    /// Returns the metadata of a document, including tombstones.
    ///
    /// # Errors
    ///
    /// Returns `DocNotFound` if the ID has never been written (or its
    /// tombstone has been purged).
    pub fn get_info(&self, id: &[u8]) -> CoreResult<DocInfo> {
        let pointer = self.lookup(id)?;
        self.read_info(&pointer)
    }

    /// Lists every revision written after `since`, in sequence order.
    ///
    /// Only the latest revision of each document appears.
    ///
    /// # Errors
    ///
    /// Returns a read or corruption error.
    pub fn changes_since(&self, since: SequenceNumber) -> CoreResult<Vec<DocInfo>> {
        let start = since.next().to_key();
        let mut out = Vec::new();
        for item in self
            .by_seq
            .iter_from(self.header.by_seq_root.as_ref(), Some(&start))
        {
            let (_, value) = item?;
            let entry = SeqEntry::decode(&value)?;
            out.push(self.read_info(&entry.pointer)?);
        }
        Ok(out)
    }

    /// Lists live documents in ID order, starting at the first ID `>= start`.
    ///
    /// # Errors
    ///
    /// Returns a read or corruption error.
    pub fn all_docs(&self, start: Option<&[u8]>) -> CoreResult<Vec<DocInfo>> {
        let mut out = Vec::new();
        for item in self.by_id.iter_from(self.by_id_root(), start) {
            let (_, value) = item?;
            let pointer = DocPointer::decode(&value)?;
            if !pointer.deleted {
                out.push(self.read_info(&pointer)?);
            }
        }
        Ok(out)
    }

    fn lookup(&self, id: &[u8]) -> CoreResult<DocPointer> {
        codec::validate_id(id)?;
        match self.by_id.lookup(self.by_id_root(), id)? {
            Some(value) => DocPointer::decode(&value),
            None => Err(CoreError::doc_not_found(id)),
        }
    }

    pub(crate) fn read_info(&self, pointer: &DocPointer) -> CoreResult<DocInfo> {
        let payload = self.store.read_tagged(pointer.info_pos, BlockTag::Info)?;
        let mut info = codec::decode_info(&payload)?;
        info.physical_size = pointer.physical_size;
        Ok(info)
    }

    pub(crate) fn read_document(&self, pointer: &DocPointer) -> CoreResult<Document> {
        let info = self.store.read_tagged(pointer.info_pos, BlockTag::Info)?;
        let body = match pointer.body_pos {
            Some(pos) => Some(self.store.read_tagged(pos, BlockTag::Body)?),
            None => None,
        };
        codec::decode(body.as_deref(), &info)
    }
}
