//! Error types for the codec layer.

use std::fmt;

/// Errors produced while encoding, decoding, or registering types.
///
/// Decode errors describe malformed input and are recoverable: the caller
/// drops the offending connection. Registration errors (`TypeNotRegistered`,
/// `DuplicateType`) are configuration mistakes and are meant to abort
/// startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The input ended before the value was complete.
    #[error("unexpected end of input: needed {needed} more byte(s)")]
    UnexpectedEof { needed: usize },

    /// A varint ran past its maximum encoded length.
    #[error("malformed varint: continuation past {0} bytes")]
    MalformedVarInt(usize),

    /// A value falls outside the domain the wire format can carry.
    #[error("value {0} is out of range for this encoding")]
    ValueOutOfRange(i128),

    /// A length prefix claims more bytes than remain in the input.
    #[error("length prefix {len} exceeds the {remaining} remaining byte(s)")]
    LengthOverrun { len: u64, remaining: usize },

    /// A string field was not valid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    /// A tag byte (bool, option presence, char) had an impossible value.
    #[error("invalid {what} tag: {value}")]
    InvalidTag { what: &'static str, value: u64 },

    /// Sequences and maps must know their length up front.
    #[error("sequence length must be known before serialization")]
    LengthRequired,

    /// The serde data model feature is not supported by this format.
    #[error("unsupported by the binary format: {0}")]
    Unsupported(&'static str),

    /// Bytes were left over after a complete value was decoded.
    #[error("{0} trailing byte(s) after value")]
    TrailingBytes(usize),

    /// A type has no resolver in the registry.
    #[error("type not registered: {0}")]
    TypeNotRegistered(&'static str),

    /// A resolver was registered twice for the same type.
    #[error("type already registered: {0}")]
    DuplicateType(&'static str),

    /// A dynamically typed value did not match the resolver it was given to.
    #[error("value does not match resolver for {0}")]
    TypeMismatch(&'static str),

    /// Custom message raised by a serde `Serialize`/`Deserialize` impl.
    #[error("{0}")]
    Message(String),
}

impl serde::ser::Error for CodecError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self::Message(msg.to_string())
    }
}

impl serde::de::Error for CodecError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self::Message(msg.to_string())
    }
}
