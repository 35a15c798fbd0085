//! Zero-copy byte views and their owned counterpart.

use std::fmt;
use std::ops::Deref;

use bytes::Bytes;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A view (buffer + offset + length) into a still-live input buffer.
///
/// The lifetime ties the view to the buffer it was read from: once that
/// buffer is handed back to its pool or reused, the borrow checker rejects
/// any remaining `ByteChunk`. Anything that must outlive the current message
/// (buffered RPC payloads, for instance) has to go through
/// [`to_owned_chunk`](Self::to_owned_chunk) first.
#[derive(Clone, Copy)]
pub struct ByteChunk<'a> {
    buf: &'a [u8],
    offset: usize,
    len: usize,
}

impl<'a> ByteChunk<'a> {
    /// Creates a view of `len` bytes starting at `offset`.
    ///
    /// # Panics
    /// Panics if the range is outside `buf`.
    pub fn new(buf: &'a [u8], offset: usize, len: usize) -> Self {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= buf.len()),
            "chunk {offset}+{len} outside buffer of {}",
            buf.len()
        );
        Self { buf, offset, len }
    }

    /// A view over the whole slice.
    pub fn from_slice(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            len: buf.len(),
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &'a [u8] {
        &self.buf[self.offset..self.offset + self.len]
    }

    /// Deep-copies the viewed bytes into an independent [`OwnedChunk`].
    pub fn to_owned_chunk(&self) -> OwnedChunk {
        OwnedChunk(Bytes::copy_from_slice(self.as_slice()))
    }
}

impl Deref for ByteChunk<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl PartialEq for ByteChunk<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for ByteChunk<'_> {}

impl fmt::Debug for ByteChunk<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteChunk")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

impl Serialize for ByteChunk<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(self.as_slice())
    }
}

impl<'de: 'a, 'a> Deserialize<'de> for ByteChunk<'a> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ChunkVisitor;

        impl<'de> Visitor<'de> for ChunkVisitor {
            type Value = ByteChunk<'de>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a borrowed byte blob")
            }

            fn visit_borrowed_bytes<E: de::Error>(self, v: &'de [u8]) -> Result<Self::Value, E> {
                Ok(ByteChunk::from_slice(v))
            }
        }

        deserializer.deserialize_bytes(ChunkVisitor)
    }
}

/// An owned, reference-counted copy of chunk bytes.
///
/// Cheap to clone (a refcount bump) and independent of any receive buffer.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct OwnedChunk(Bytes);

impl OwnedChunk {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_chunk(&self) -> ByteChunk<'_> {
        ByteChunk::from_slice(&self.0)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl Deref for OwnedChunk {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for OwnedChunk {
    fn from(v: Vec<u8>) -> Self {
        Self(Bytes::from(v))
    }
}

impl From<Bytes> for OwnedChunk {
    fn from(b: Bytes) -> Self {
        Self(b)
    }
}

impl From<ByteChunk<'_>> for OwnedChunk {
    fn from(chunk: ByteChunk<'_>) -> Self {
        chunk.to_owned_chunk()
    }
}

impl fmt::Debug for OwnedChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnedChunk({} bytes)", self.0.len())
    }
}

impl Serialize for OwnedChunk {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for OwnedChunk {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OwnedVisitor;

        impl<'de> Visitor<'de> for OwnedVisitor {
            type Value = OwnedChunk;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte blob")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(OwnedChunk(Bytes::copy_from_slice(v)))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                Ok(OwnedChunk::from(v))
            }
        }

        deserializer.deserialize_bytes(OwnedVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BufferPool;

    #[test]
    fn test_owned_copy_survives_source_reuse() {
        let pool = BufferPool::new(4, 64);
        let owned = {
            let mut buf = pool.acquire();
            buf.write_bytes(&[1, 2, 3, 4]).unwrap();
            let mut reader = buf.reader();
            let chunk = reader.read_chunk().unwrap();
            chunk.to_owned_chunk()
            // `buf` goes back to the pool here.
        };

        // The pool hands the same allocation out again; overwrite it.
        let mut reused = pool.acquire();
        reused.write_bytes(&[9, 9, 9, 9, 9, 9]).unwrap();

        assert_eq!(owned.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_chunk_equality_compares_bytes_not_offsets() {
        let a = [0u8, 1, 2];
        let b = [1u8, 2];
        assert_eq!(ByteChunk::new(&a, 1, 2), ByteChunk::from_slice(&b));
    }

    #[test]
    #[should_panic(expected = "outside buffer")]
    fn test_out_of_bounds_chunk_panics() {
        let a = [0u8; 3];
        let _ = ByteChunk::new(&a, 2, 5);
    }
}
