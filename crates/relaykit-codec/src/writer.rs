//! Growable output buffer with primitive and length-prefixed writers.

use crate::{varint, CodecError, NetworkReader};

/// An append-only byte buffer that knows the wire encodings.
///
/// Variable-size fields (strings, byte blobs, sequences) are always written
/// with a varint length prefix, never a fixed-width count.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NetworkWriter {
    buf: Vec<u8>,
}

impl NetworkWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty writer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Wraps an existing buffer, keeping its contents.
    pub fn from_vec(buf: Vec<u8>) -> Self {
        Self { buf }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    /// Writes `bytes` as-is, without a length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_var_u64(&mut self, value: u64) -> Result<(), CodecError> {
        varint::encode_unsigned(value, &mut self.buf).map(drop)
    }

    pub fn write_var_i64(&mut self, value: i64) -> Result<(), CodecError> {
        varint::encode_signed(value, &mut self.buf).map(drop)
    }

    /// Writes a length prefix.
    pub fn write_len(&mut self, len: usize) -> Result<(), CodecError> {
        self.write_var_u64(len as u64)
    }

    /// Writes a length-prefixed byte blob.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.write_len(bytes.len())?;
        self.write_raw(bytes);
        Ok(())
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) -> Result<(), CodecError> {
        self.write_bytes(value.as_bytes())
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_raw(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_raw(&value.to_le_bytes());
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Empties the buffer, keeping its allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Drops everything past `len`, used to roll back a partial write.
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    /// Allocated capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Returns a reader over the bytes written so far.
    pub fn reader(&self) -> NetworkReader<'_> {
        NetworkReader::new(&self.buf)
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl AsRef<[u8]> for NetworkWriter {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl From<NetworkWriter> for bytes::Bytes {
    fn from(writer: NetworkWriter) -> Self {
        bytes::Bytes::from(writer.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_is_length_prefixed_with_varint() {
        let mut w = NetworkWriter::new();
        w.write_str("hi").unwrap();
        assert_eq!(w.as_slice(), &[2, b'h', b'i']);
    }

    #[test]
    fn test_long_blob_prefix_grows_past_one_byte() {
        let mut w = NetworkWriter::new();
        w.write_bytes(&[7u8; 200]).unwrap();
        // 200 needs two varint bytes, not a fixed 4-byte count.
        assert_eq!(w.len(), 202);
        assert_eq!(&w.as_slice()[..2], &[0xC8, 0x01]);
    }

    #[test]
    fn test_truncate_rolls_back() {
        let mut w = NetworkWriter::new();
        w.write_u8(1);
        let mark = w.len();
        w.write_str("discard").unwrap();
        w.truncate(mark);
        assert_eq!(w.as_slice(), &[1]);
    }
}
