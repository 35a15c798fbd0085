//! Unified error type for Relaykit.

use relaykit_codec::CodecError;
use relaykit_protocol::ProtocolError;
use relaykit_room::{BindError, RoomError};
use relaykit_transport::TransportError;

/// Top-level error that wraps every crate-specific error.
///
/// Only startup can fail with one of these: once rooms are running,
/// per-request failures stay inside the room that saw them.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Binding a listener or accepting connections failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Payload-code registration failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Room(#[from] RoomError),

    /// RPC bind tables were declared inconsistently.
    #[error(transparent)]
    Bind(#[from] BindError),

    /// The server config could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The server config is not valid JSON for [`ServerConfig`](crate::ServerConfig).
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid server config: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let relay_err: RelayError = err.into();
        assert!(matches!(relay_err, RelayError::Transport(_)));
        assert!(relay_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_codec_error() {
        let relay_err: RelayError = CodecError::UnexpectedEof { needed: 1 }.into();
        assert!(matches!(relay_err, RelayError::Codec(_)));
    }

    #[test]
    fn test_from_room_error() {
        let err = RoomError::NotFound(relaykit_protocol::RoomId(1));
        let relay_err: RelayError = err.into();
        assert!(matches!(relay_err, RelayError::Room(_)));
        assert!(relay_err.to_string().contains("R-1"));
    }

    #[test]
    fn test_from_json_error() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        let relay_err: RelayError = err.into();
        assert!(relay_err.to_string().starts_with("failed to parse config"));
    }
}
