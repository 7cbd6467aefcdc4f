//! Little-endian cursor used by the on-disk decoders.

use crate::error::{CoreError, CoreResult};

/// Reads fixed-width little-endian fields from a byte slice.
///
/// Every read is bounds-checked; running off the end is reported as
/// corruption with the name of the structure being decoded.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8], what: &'static str) -> Self {
        Self { data, pos: 0, what }
    }

    pub(crate) fn bytes(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| CoreError::corrupt(format!("{} truncated", self.what)))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn u32(&mut self) -> CoreResult<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self) -> CoreResult<u64> {
        let b = self.bytes(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Reads a `u32` length followed by that many bytes.
    pub(crate) fn len_prefixed(&mut self) -> CoreResult<&'a [u8]> {
        let len = self.u32()? as usize;
        self.bytes(len)
    }

    /// Returns everything not yet consumed.
    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    /// Fails unless every byte has been consumed.
    pub(crate) fn finish(self) -> CoreResult<()> {
        if self.pos == self.data.len() {
            Ok(())
        } else {
            Err(CoreError::corrupt(format!(
                "{} has {} trailing bytes",
                self.what,
                self.data.len() - self.pos
            )))
        }
    }
}

/// Appends a `u32` length prefix and the bytes.
pub(crate) fn put_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_fields_in_order() {
        let mut buf = vec![7u8];
        buf.extend_from_slice(&42u32.to_le_bytes());
        buf.extend_from_slice(&u64::MAX.to_le_bytes());
        put_len_prefixed(&mut buf, b"abc");

        let mut r = ByteReader::new(&buf, "test");
        assert_eq!(r.u8().unwrap(), 7);
        assert_eq!(r.u32().unwrap(), 42);
        assert_eq!(r.u64().unwrap(), u64::MAX);
        assert_eq!(r.len_prefixed().unwrap(), b"abc");
        r.finish().unwrap();
    }

    #[test]
    fn short_input_is_corrupt() {
        let mut r = ByteReader::new(&[1, 2], "thing");
        let err = r.u32().unwrap_err();
        assert_eq!(err.to_string(), "corrupt database: thing truncated");
    }

    #[test]
    fn oversized_length_prefix_is_corrupt() {
        let buf = u32::MAX.to_le_bytes();
        let mut r = ByteReader::new(&buf, "thing");
        assert!(matches!(r.len_prefixed(), Err(CoreError::Corrupt { .. })));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut r = ByteReader::new(&[1, 2], "thing");
        r.u8().unwrap();
        assert!(r.finish().is_err());
    }
}
