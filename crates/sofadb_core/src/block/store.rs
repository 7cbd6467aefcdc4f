//! Block allocation, reads and header placement.

use super::format::{
    add_markers, decode_prefix, encode_block, physical_len, strip_markers, verify, Block,
    BlockPos, BlockTag, BLOCK_PREFIX_LEN, MARKER_HEADER, MAX_BLOCK_SIZE, PAGE_SIZE,
};
use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use sofadb_storage::StorageBackend;
use std::fmt;

/// Appends and reads checksummed blocks on a [`StorageBackend`].
///
/// Offsets are assigned under the backend's write lock, so concurrent
/// `allocate` calls never interleave their bytes. Readers take the read lock
/// and only ever look at bytes below the size they observed.
pub struct BlockStore {
    backend: RwLock<Box<dyn StorageBackend>>,
}

impl BlockStore {
    /// Creates a block store over `backend`.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend: RwLock::new(backend),
        }
    }

    /// Returns the current size of the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.read().size()?)
    }

    /// Appends a block and returns its position.
    ///
    /// # Errors
    ///
    /// Returns `AllocFailed` if the payload exceeds [`MAX_BLOCK_SIZE`], or a
    /// write error if the backend rejects the append.
    pub fn allocate(&self, tag: BlockTag, payload: &[u8]) -> CoreResult<BlockPos> {
        if payload.len() > MAX_BLOCK_SIZE {
            return Err(CoreError::alloc_failed(format!(
                "{tag:?} block of {} bytes exceeds maximum of {MAX_BLOCK_SIZE}",
                payload.len()
            )));
        }
        let logical = encode_block(tag, payload);

        let mut backend = self.backend.write();
        let start = backend.size()?;
        let physical = add_markers(start, &logical);
        let offset = backend.append(&physical).map_err(CoreError::write)?;
        debug_assert_eq!(offset, start);
        Ok(start)
    }

    /// Appends a header block at the next page boundary and returns its position.
    ///
    /// The position is always a multiple of [`PAGE_SIZE`].
    ///
    /// # Errors
    ///
    /// Returns a write error if the backend rejects the append.
    pub fn write_header(&self, payload: &[u8]) -> CoreResult<BlockPos> {
        if payload.len() > MAX_BLOCK_SIZE {
            return Err(CoreError::alloc_failed("header too large"));
        }
        let logical = encode_block(BlockTag::Header, payload);

        let mut backend = self.backend.write();
        let size = backend.size()?;
        let pad = (PAGE_SIZE - size % PAGE_SIZE) % PAGE_SIZE;
        let start = size + pad;

        let mut physical = vec![0u8; pad as usize];
        let mut body = add_markers(start, &logical);
        body[0] = MARKER_HEADER;
        physical.append(&mut body);

        backend.append(&physical).map_err(CoreError::write)?;
        Ok(start)
    }

    /// Reads and validates the block at `pos`.
    ///
    /// # Errors
    ///
    /// - `Corrupt` if the block's length or tag is impossible, or it runs
    ///   past the end of the file
    /// - `ChecksumMismatch` if the stored checksum does not match
    /// - a read error if the backend fails
    pub fn read(&self, pos: BlockPos) -> CoreResult<Block> {
        let backend = self.backend.read();
        let size = backend.size()?;

        let prefix_span = physical_len(pos, BLOCK_PREFIX_LEN as u64);
        if pos.saturating_add(prefix_span) > size {
            return Err(CoreError::corrupt(format!(
                "block at {pos} starts beyond end of file ({size})"
            )));
        }
        let prefix_bytes = strip_markers(pos, &backend.read_at(pos, prefix_span as usize)?);
        let prefix: [u8; BLOCK_PREFIX_LEN] = prefix_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::corrupt("short block prefix"))?;
        let (len, crc, raw_tag) = decode_prefix(&prefix);

        if len > MAX_BLOCK_SIZE {
            return Err(CoreError::corrupt(format!(
                "block at {pos} claims {len} bytes"
            )));
        }
        let tag = BlockTag::from_u8(raw_tag)?;

        let payload_start = pos + prefix_span;
        let payload_span = physical_len(payload_start, len as u64);
        if payload_start.saturating_add(payload_span) > size {
            return Err(CoreError::corrupt(format!(
                "block at {pos} extends beyond end of file ({size})"
            )));
        }
        let payload = strip_markers(
            payload_start,
            &backend.read_at(payload_start, payload_span as usize)?,
        );
        verify(crc, raw_tag, &payload)?;

        Ok(Block { tag, payload })
    }

    /// Reads the block at `pos` and checks that it carries `expected`.
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` if the tag differs, plus everything [`Self::read`] returns.
    pub fn read_tagged(&self, pos: BlockPos, expected: BlockTag) -> CoreResult<Vec<u8>> {
        let block = self.read(pos)?;
        if block.tag != expected {
            return Err(CoreError::corrupt(format!(
                "expected {expected:?} block at {pos}, found {:?}",
                block.tag
            )));
        }
        Ok(block.payload)
    }

    /// Finds the last valid header by probing page boundaries backward from
    /// the end of the file.
    ///
    /// Pages marked as header pages whose block fails validation (a torn
    /// write) are skipped. Returns `None` if no valid header exists.
    ///
    /// # Errors
    ///
    /// Returns a read error if the backend fails.
    pub fn find_last_header(&self) -> CoreResult<Option<(BlockPos, Vec<u8>)>> {
        let size = self.size()?;
        if size == 0 {
            return Ok(None);
        }
        let mut page = (size - 1) / PAGE_SIZE * PAGE_SIZE;
        loop {
            let marker = self.backend.read().read_at(page, 1)?[0];
            if marker == MARKER_HEADER {
                match self.read(page) {
                    Ok(block) if block.tag == BlockTag::Header => {
                        return Ok(Some((page, block.payload)));
                    }
                    Ok(block) => {
                        tracing::warn!(pos = page, tag = ?block.tag, "header page holds non-header block");
                    }
                    Err(CoreError::Storage(e)) => return Err(CoreError::Storage(e)),
                    Err(e) => {
                        tracing::warn!(pos = page, error = %e, "skipping invalid header");
                    }
                }
            }
            if page == 0 {
                return Ok(None);
            }
            page -= PAGE_SIZE;
        }
    }

    /// Flushes pending writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns a write error if the flush fails.
    pub fn flush(&self) -> CoreResult<()> {
        self.backend.write().flush().map_err(CoreError::write)
    }

    /// Makes all appended bytes durable.
    ///
    /// # Errors
    ///
    /// Returns a write error if the sync fails.
    pub fn sync(&self) -> CoreResult<()> {
        let mut backend = self.backend.write();
        backend.flush().map_err(CoreError::write)?;
        backend.sync().map_err(CoreError::write)
    }

    /// Re-reads the file size from the backend and returns it.
    ///
    /// # Errors
    ///
    /// Returns a read error if the size cannot be determined.
    pub fn refresh(&self) -> CoreResult<u64> {
        Ok(self.backend.write().refresh()?)
    }

    /// Returns true if the file behind this store was replaced or removed
    /// since it was opened.
    ///
    /// # Errors
    ///
    /// Returns a read error if the file identity cannot be determined.
    pub fn is_detached(&self) -> CoreResult<bool> {
        Ok(self.backend.read().is_detached()?)
    }
}

impl fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockStore")
            .field("size", &self.size().ok())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MARKER_DATA;
    use sofadb_storage::InMemoryBackend;

    fn store() -> (BlockStore, InMemoryBackend) {
        let backend = InMemoryBackend::new();
        let view = backend.share();
        (BlockStore::new(Box::new(backend)), view)
    }

    #[test]
    fn allocate_and_read() {
        let (store, _) = store();
        let a = store.allocate(BlockTag::Body, b"first").unwrap();
        let b = store.allocate(BlockTag::Info, b"second").unwrap();
        assert!(b > a);

        let block = store.read(a).unwrap();
        assert_eq!(block.tag, BlockTag::Body);
        assert_eq!(block.payload, b"first");
        assert_eq!(store.read_tagged(b, BlockTag::Info).unwrap(), b"second");
        assert!(matches!(
            store.read_tagged(b, BlockTag::Node),
            Err(CoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn block_spanning_pages() {
        let (store, _) = store();
        store.allocate(BlockTag::Body, &[1u8; 100]).unwrap();
        let payload: Vec<u8> = (0..3 * PAGE_SIZE as usize).map(|i| i as u8).collect();
        let pos = store.allocate(BlockTag::Body, &payload).unwrap();
        assert_eq!(store.read(pos).unwrap().payload, payload);
    }

    #[test]
    fn empty_payload_block() {
        let (store, _) = store();
        let pos = store.allocate(BlockTag::Body, b"").unwrap();
        assert!(store.read(pos).unwrap().payload.is_empty());
    }

    #[test]
    fn oversized_block_fails_allocation() {
        let (store, _) = store();
        let big = vec![0u8; MAX_BLOCK_SIZE + 1];
        let err = store.allocate(BlockTag::Body, &big).unwrap_err();
        assert!(matches!(err, CoreError::AllocFailed { .. }));
        assert_eq!(store.size().unwrap(), 0);
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let (store, view) = store();
        let pos = store.allocate(BlockTag::Body, b"hello world").unwrap();

        let mut bytes = view.data();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x55;
        let damaged = BlockStore::new(Box::new(InMemoryBackend::with_data(bytes)));

        assert!(matches!(
            damaged.read(pos),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn truncated_block_is_corrupt() {
        let (store, view) = store();
        let pos = store.allocate(BlockTag::Body, &[9u8; 64]).unwrap();

        let mut bytes = view.data();
        bytes.truncate(bytes.len() - 10);
        let damaged = BlockStore::new(Box::new(InMemoryBackend::with_data(bytes)));

        assert!(matches!(damaged.read(pos), Err(CoreError::Corrupt { .. })));
        assert!(matches!(damaged.read(10_000), Err(CoreError::Corrupt { .. })));
    }

    #[test]
    fn headers_land_on_page_boundaries() {
        let (store, view) = store();
        store.allocate(BlockTag::Body, b"data").unwrap();
        let h1 = store.write_header(b"h1").unwrap();
        assert_eq!(h1 % PAGE_SIZE, 0);
        assert_eq!(h1, PAGE_SIZE);

        let bytes = view.data();
        assert_eq!(bytes[0], MARKER_DATA);
        assert_eq!(bytes[h1 as usize], MARKER_HEADER);
        assert_eq!(store.read_tagged(h1, BlockTag::Header).unwrap(), b"h1");
    }

    #[test]
    fn find_last_header_picks_latest() {
        let (store, _) = store();
        assert!(store.find_last_header().unwrap().is_none());

        store.write_header(b"first").unwrap();
        store.allocate(BlockTag::Node, &[0u8; 5000]).unwrap();
        let second = store.write_header(b"second").unwrap();
        store.allocate(BlockTag::Body, b"uncommitted tail").unwrap();

        let (pos, payload) = store.find_last_header().unwrap().unwrap();
        assert_eq!(pos, second);
        assert_eq!(payload, b"second");
    }

    #[test]
    fn find_last_header_skips_torn_header() {
        let (store, view) = store();
        let first = store.write_header(b"first").unwrap();
        store.allocate(BlockTag::Body, b"more").unwrap();
        store.write_header(b"second header payload").unwrap();

        let mut bytes = view.data();
        bytes.truncate(bytes.len() - 4);
        let torn = BlockStore::new(Box::new(InMemoryBackend::with_data(bytes)));

        let (pos, payload) = torn.find_last_header().unwrap().unwrap();
        assert_eq!(pos, first);
        assert_eq!(payload, b"first");
    }

    #[test]
    fn data_resembling_marker_is_not_a_header() {
        let (store, _) = store();
        store.allocate(BlockTag::Body, &[MARKER_HEADER; 3 * PAGE_SIZE as usize]).unwrap();
        assert!(store.find_last_header().unwrap().is_none());
    }
}
