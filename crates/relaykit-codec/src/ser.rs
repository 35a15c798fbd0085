//! `serde` serializer for the binary format.
//!
//! Data model mapping:
//!
//! | serde            | wire                                        |
//! |------------------|---------------------------------------------|
//! | bool, u8, i8     | one byte                                    |
//! | u16..u64, usize  | unsigned varint                             |
//! | i16..i64         | signed varint                               |
//! | f32, f64         | little-endian IEEE 754                      |
//! | char             | unsigned varint of the scalar value         |
//! | str, bytes       | varint length + bytes                       |
//! | option           | presence byte (0/1) + value                 |
//! | seq, map         | varint length + elements                    |
//! | struct, tuple    | fields in declaration order, no framing     |
//! | enum             | varint variant index + variant content      |

use serde::ser::{self, Serialize};

use crate::{CodecError, NetworkWriter};

/// Serializes `value` into a fresh byte vector.
pub fn to_vec<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut writer = NetworkWriter::new();
    to_writer(value, &mut writer)?;
    Ok(writer.into_inner())
}

/// Serializes `value`, appending to `writer`.
///
/// On error the writer is rolled back to where it started.
pub fn to_writer<T: Serialize + ?Sized>(
    value: &T,
    writer: &mut NetworkWriter,
) -> Result<(), CodecError> {
    let mark = writer.len();
    let result = value.serialize(&mut Serializer { writer: &mut *writer });
    if result.is_err() {
        writer.truncate(mark);
    }
    result
}

/// The binary-format serializer. Use [`to_vec`] or [`to_writer`].
pub struct Serializer<'w> {
    writer: &'w mut NetworkWriter,
}

impl<'w> Serializer<'w> {
    pub fn new(writer: &'w mut NetworkWriter) -> Self {
        Self { writer }
    }

    fn write_variant(&mut self, index: u32) -> Result<(), CodecError> {
        self.writer.write_var_u64(index.into())
    }
}

impl<'a, 'w> ser::Serializer for &'a mut Serializer<'w> {
    type Ok = ();
    type Error = CodecError;

    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn is_human_readable(&self) -> bool {
        false
    }

    fn serialize_bool(self, v: bool) -> Result<(), CodecError> {
        self.writer.write_bool(v);
        Ok(())
    }

    fn serialize_i8(self, v: i8) -> Result<(), CodecError> {
        self.writer.write_u8(v as u8);
        Ok(())
    }

    fn serialize_i16(self, v: i16) -> Result<(), CodecError> {
        self.writer.write_var_i64(v.into())
    }

    fn serialize_i32(self, v: i32) -> Result<(), CodecError> {
        self.writer.write_var_i64(v.into())
    }

    fn serialize_i64(self, v: i64) -> Result<(), CodecError> {
        self.writer.write_var_i64(v)
    }

    fn serialize_i128(self, _v: i128) -> Result<(), CodecError> {
        Err(CodecError::Unsupported("i128"))
    }

    fn serialize_u8(self, v: u8) -> Result<(), CodecError> {
        self.writer.write_u8(v);
        Ok(())
    }

    fn serialize_u16(self, v: u16) -> Result<(), CodecError> {
        self.writer.write_var_u64(v.into())
    }

    fn serialize_u32(self, v: u32) -> Result<(), CodecError> {
        self.writer.write_var_u64(v.into())
    }

    fn serialize_u64(self, v: u64) -> Result<(), CodecError> {
        self.writer.write_var_u64(v)
    }

    fn serialize_u128(self, _v: u128) -> Result<(), CodecError> {
        Err(CodecError::Unsupported("u128"))
    }

    fn serialize_f32(self, v: f32) -> Result<(), CodecError> {
        self.writer.write_f32(v);
        Ok(())
    }

    fn serialize_f64(self, v: f64) -> Result<(), CodecError> {
        self.writer.write_f64(v);
        Ok(())
    }

    fn serialize_char(self, v: char) -> Result<(), CodecError> {
        self.writer.write_var_u64(u64::from(u32::from(v)))
    }

    fn serialize_str(self, v: &str) -> Result<(), CodecError> {
        self.writer.write_str(v)
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<(), CodecError> {
        self.writer.write_bytes(v)
    }

    fn serialize_none(self) -> Result<(), CodecError> {
        self.writer.write_u8(0);
        Ok(())
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<(), CodecError> {
        self.writer.write_u8(1);
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), CodecError> {
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<(), CodecError> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
    ) -> Result<(), CodecError> {
        self.write_variant(variant_index)
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<(), CodecError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<(), CodecError> {
        self.write_variant(variant_index)?;
        value.serialize(self)
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self, CodecError> {
        self.writer.write_len(len.ok_or(CodecError::LengthRequired)?)?;
        Ok(self)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self, CodecError> {
        Ok(self)
    }

    fn serialize_tuple_struct(self, _name: &'static str, _len: usize) -> Result<Self, CodecError> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self, CodecError> {
        self.write_variant(variant_index)?;
        Ok(self)
    }

    fn serialize_map(self, len: Option<usize>) -> Result<Self, CodecError> {
        self.writer.write_len(len.ok_or(CodecError::LengthRequired)?)?;
        Ok(self)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self, CodecError> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self, CodecError> {
        self.write_variant(variant_index)?;
        Ok(self)
    }
}

impl ser::SerializeSeq for &mut Serializer<'_> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

impl ser::SerializeTuple for &mut Serializer<'_> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for &mut Serializer<'_> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for &mut Serializer<'_> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

impl ser::SerializeMap for &mut Serializer<'_> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), CodecError> {
        key.serialize(&mut **self)
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

impl ser::SerializeStruct for &mut Serializer<'_> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), CodecError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

impl ser::SerializeStructVariant for &mut Serializer<'_> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), CodecError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}
