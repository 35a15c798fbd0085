//! `serde` deserializer for the binary format.
//!
//! The format is not self-describing, so `deserialize_any` and
//! `deserialize_ignored_any` are rejected. Strings and byte blobs are handed
//! to visitors as borrows of the input, which is what lets `&str` fields and
//! [`ByteChunk`](crate::ByteChunk) decode without copying.

use serde::de::value::U32Deserializer;
use serde::de::{self, DeserializeSeed, IntoDeserializer, Visitor};
use serde::Deserialize;

use crate::{CodecError, NetworkReader};

/// Decodes a `T` that must occupy all of `input`.
pub fn from_slice<'de, T: Deserialize<'de>>(input: &'de [u8]) -> Result<T, CodecError> {
    let mut reader = NetworkReader::new(input);
    let value = from_reader(&mut reader)?;
    if !reader.is_empty() {
        return Err(CodecError::TrailingBytes(reader.remaining()));
    }
    Ok(value)
}

/// Decodes a `T` from the front of `reader`, leaving the rest unread.
pub fn from_reader<'de, T: Deserialize<'de>>(
    reader: &mut NetworkReader<'de>,
) -> Result<T, CodecError> {
    T::deserialize(&mut Deserializer { reader })
}

/// The binary-format deserializer. Use [`from_slice`] or [`from_reader`].
pub struct Deserializer<'r, 'de> {
    reader: &'r mut NetworkReader<'de>,
}

impl<'r, 'de> Deserializer<'r, 'de> {
    pub fn new(reader: &'r mut NetworkReader<'de>) -> Self {
        Self { reader }
    }

    fn narrow_unsigned<T: TryFrom<u64>>(&mut self) -> Result<T, CodecError> {
        let raw = self.reader.read_var_u64()?;
        T::try_from(raw).map_err(|_| CodecError::ValueOutOfRange(raw.into()))
    }

    fn narrow_signed<T: TryFrom<i64>>(&mut self) -> Result<T, CodecError> {
        let raw = self.reader.read_var_i64()?;
        T::try_from(raw).map_err(|_| CodecError::ValueOutOfRange(raw.into()))
    }

    fn read_variant(&mut self) -> Result<u32, CodecError> {
        self.narrow_unsigned()
    }
}

impl<'de> de::Deserializer<'de> for &mut Deserializer<'_, 'de> {
    type Error = CodecError;

    fn is_human_readable(&self) -> bool {
        false
    }

    fn deserialize_any<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, CodecError> {
        Err(CodecError::Unsupported("deserialize_any"))
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(
        self,
        _visitor: V,
    ) -> Result<V::Value, CodecError> {
        Err(CodecError::Unsupported("deserialize_ignored_any"))
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_bool(self.reader.read_bool()?)
    }

    fn deserialize_i8<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_i8(self.reader.read_u8()? as i8)
    }

    fn deserialize_i16<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_i16(self.narrow_signed()?)
    }

    fn deserialize_i32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_i32(self.narrow_signed()?)
    }

    fn deserialize_i64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_i64(self.reader.read_var_i64()?)
    }

    fn deserialize_i128<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, CodecError> {
        Err(CodecError::Unsupported("i128"))
    }

    fn deserialize_u8<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_u8(self.reader.read_u8()?)
    }

    fn deserialize_u16<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_u16(self.narrow_unsigned()?)
    }

    fn deserialize_u32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_u32(self.narrow_unsigned()?)
    }

    fn deserialize_u64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_u64(self.reader.read_var_u64()?)
    }

    fn deserialize_u128<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, CodecError> {
        Err(CodecError::Unsupported("u128"))
    }

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_f32(self.reader.read_f32()?)
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_f64(self.reader.read_f64()?)
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        let raw: u32 = self.narrow_unsigned()?;
        let c = char::from_u32(raw).ok_or(CodecError::InvalidTag {
            what: "char",
            value: raw.into(),
        })?;
        visitor.visit_char(c)
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_borrowed_str(self.reader.read_str()?)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_borrowed_bytes(self.reader.read_chunk()?.as_slice())
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        match self.reader.read_u8()? {
            0 => visitor.visit_none(),
            1 => visitor.visit_some(self),
            other => Err(CodecError::InvalidTag {
                what: "option",
                value: other.into(),
            }),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        let len = self.reader.read_len()?;
        visitor.visit_seq(Counted { de: self, left: len })
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        len: usize,
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        visitor.visit_seq(Counted { de: self, left: len })
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        len: usize,
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        visitor.visit_seq(Counted { de: self, left: len })
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        let len = self.reader.read_len()?;
        visitor.visit_map(Counted { de: self, left: len })
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        visitor.visit_seq(Counted {
            de: self,
            left: fields.len(),
        })
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        visitor.visit_enum(self)
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_u32(self.read_variant()?)
    }
}

/// Access for a run of `left` consecutive elements (or key/value pairs).
struct Counted<'a, 'r, 'de> {
    de: &'a mut Deserializer<'r, 'de>,
    left: usize,
}

impl<'de> de::SeqAccess<'de> for Counted<'_, '_, 'de> {
    type Error = CodecError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, CodecError> {
        if self.left == 0 {
            return Ok(None);
        }
        self.left -= 1;
        seed.deserialize(&mut *self.de).map(Some)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.left)
    }
}

impl<'de> de::MapAccess<'de> for Counted<'_, '_, 'de> {
    type Error = CodecError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, CodecError> {
        if self.left == 0 {
            return Ok(None);
        }
        self.left -= 1;
        seed.deserialize(&mut *self.de).map(Some)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(
        &mut self,
        seed: V,
    ) -> Result<V::Value, CodecError> {
        seed.deserialize(&mut *self.de)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.left)
    }
}

impl<'de> de::EnumAccess<'de> for &mut Deserializer<'_, 'de> {
    type Error = CodecError;
    type Variant = Self;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, Self), CodecError> {
        let index = self.read_variant()?;
        let tag: U32Deserializer<CodecError> = index.into_deserializer();
        let value = seed.deserialize(tag)?;
        Ok((value, self))
    }
}

impl<'de> de::VariantAccess<'de> for &mut Deserializer<'_, 'de> {
    type Error = CodecError;

    fn unit_variant(self) -> Result<(), CodecError> {
        Ok(())
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(
        self,
        seed: T,
    ) -> Result<T::Value, CodecError> {
        seed.deserialize(self)
    }

    fn tuple_variant<V: Visitor<'de>>(
        self,
        len: usize,
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        de::Deserializer::deserialize_tuple(self, len, visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        de::Deserializer::deserialize_tuple(self, fields.len(), visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{to_vec, ByteChunk};
    use serde::Serialize;
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    enum Shape {
        Point,
        Circle(f32),
        Rect { w: u16, h: u16 },
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Frame<'a> {
        id: u32,
        delta: i16,
        label: &'a str,
        #[serde(borrow)]
        blob: ByteChunk<'a>,
        shape: Shape,
        tags: Vec<String>,
        extra: Option<u64>,
        attrs: BTreeMap<String, i32>,
    }

    #[test]
    fn test_struct_decodes_with_borrowed_fields() {
        let payload = [9u8, 8, 7];
        let frame = Frame {
            id: 70_000,
            delta: -2,
            label: "spawn",
            blob: ByteChunk::from_slice(&payload),
            shape: Shape::Rect { w: 3, h: 4 },
            tags: vec!["a".into(), "bc".into()],
            extra: None,
            attrs: BTreeMap::from([("hp".to_string(), -10)]),
        };
        let bytes = to_vec(&frame).unwrap();
        let back: Frame<'_> = from_slice(&bytes).unwrap();
        assert_eq!(back, frame);

        // The blob is a view into `bytes`, not a copy.
        let base = bytes.as_ptr() as usize;
        let blob = back.blob.as_slice().as_ptr() as usize;
        assert!(blob >= base && blob < base + bytes.len());
    }

    #[test]
    fn test_enum_is_tagged_by_variant_index() {
        assert_eq!(to_vec(&Shape::Point).unwrap(), vec![0]);
        assert_eq!(to_vec(&Shape::Rect { w: 1, h: 2 }).unwrap(), vec![2, 1, 2]);
    }

    #[test]
    fn test_unknown_variant_is_rejected() {
        assert!(from_slice::<Shape>(&[7]).is_err());
    }

    #[test]
    fn test_trailing_bytes_are_reported() {
        assert_eq!(from_slice::<u8>(&[1, 2]), Err(CodecError::TrailingBytes(1)));
    }

    #[test]
    fn test_narrowing_out_of_range() {
        let bytes = to_vec(&70_000u32).unwrap();
        assert_eq!(
            from_slice::<u16>(&bytes),
            Err(CodecError::ValueOutOfRange(70_000))
        );
    }

    #[test]
    fn test_bad_option_tag() {
        assert!(matches!(
            from_slice::<Option<u8>>(&[5, 0]),
            Err(CodecError::InvalidTag { what: "option", value: 5 })
        ));
    }

    #[test]
    fn test_unbounded_sequence_needs_length() {
        struct Unsized;
        impl Serialize for Unsized {
            fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                use serde::ser::SerializeSeq;
                s.serialize_seq(None)?.end()
            }
        }
        assert_eq!(to_vec(&Unsized), Err(CodecError::LengthRequired));
    }
}
