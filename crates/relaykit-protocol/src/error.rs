//! Error types for the protocol layer.

use relaykit_codec::CodecError;

use crate::MessageKind;

/// Errors that can occur while registering payload codes or while encoding
/// and decoding envelopes.
///
/// Registration variants (`DuplicateCode`, `DuplicateKind`, `ReservedCode`,
/// `AlreadyInitialized`) are startup configuration mistakes. The rest
/// describe bad input from a peer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The payload bytes could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Two kinds were registered under the same code.
    #[error("type code {0} is already registered")]
    DuplicateCode(u8),

    /// One kind was registered under two codes.
    #[error("{0:?} is already registered")]
    DuplicateKind(MessageKind),

    /// Codes below the registration minimum are reserved.
    #[error("type code {0} is reserved")]
    ReservedCode(u8),

    /// The process-wide registry was installed twice.
    #[error("payload registry is already initialized")]
    AlreadyInitialized,

    /// A kind has no code in the registry.
    #[error("{0:?} has no registered type code")]
    NotRegistered(MessageKind),

    /// An envelope carried a code nobody registered.
    #[error("unknown type code {0}")]
    UnknownCode(u8),

    /// A known payload arrived in the wrong direction (a command sent by a
    /// client, or a request sent by the server).
    #[error("{0:?} is not valid in this direction")]
    WrongDirection(MessageKind),

    /// The message is invalid at the protocol level.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
