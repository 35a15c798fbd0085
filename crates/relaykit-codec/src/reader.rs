//! Cursor over a borrowed input buffer.

use crate::{varint, ByteChunk, CodecError};

/// Reads wire values from a borrowed byte slice.
///
/// Blobs and strings come back as views into the input (`ByteChunk<'a>`,
/// `&'a str`) rather than copies, so they cannot outlive the buffer.
#[derive(Debug, Clone)]
pub struct NetworkReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> NetworkReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Offset of the next unread byte.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// The unread tail of the input.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or(CodecError::UnexpectedEof { needed: 1 })?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidTag {
                what: "bool",
                value: other.into(),
            }),
        }
    }

    /// Reads exactly `len` raw bytes.
    pub fn read_raw(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if len > self.remaining() {
            return Err(CodecError::UnexpectedEof {
                needed: len - self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_raw(N)?);
        Ok(out)
    }

    pub fn read_var_u64(&mut self) -> Result<u64, CodecError> {
        let (value, used) = varint::decode_unsigned(self.rest())?;
        self.pos += used;
        Ok(value)
    }

    pub fn read_var_i64(&mut self) -> Result<i64, CodecError> {
        let (value, used) = varint::decode_signed(self.rest())?;
        self.pos += used;
        Ok(value)
    }

    /// Reads a length prefix, rejecting lengths larger than the input.
    pub fn read_len(&mut self) -> Result<usize, CodecError> {
        let len = self.read_var_u64()?;
        let remaining = self.remaining();
        if len > remaining as u64 {
            return Err(CodecError::LengthOverrun { len, remaining });
        }
        Ok(len as usize)
    }

    /// Reads a length-prefixed blob as a view into the input.
    pub fn read_chunk(&mut self) -> Result<ByteChunk<'a>, CodecError> {
        let len = self.read_len()?;
        let chunk = ByteChunk::new(self.buf, self.pos, len);
        self.pos += len;
        Ok(chunk)
    }

    /// Reads a length-prefixed UTF-8 string without copying it.
    pub fn read_str(&mut self) -> Result<&'a str, CodecError> {
        let len = self.read_len()?;
        let bytes = self.read_raw(len)?;
        std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }
}
