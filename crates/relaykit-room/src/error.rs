//! Error types for the room layer.

use relaykit_codec::CodecError;
use relaykit_protocol::{BehaviorId, RoomId};

/// Errors surfaced by room handles and the directory.
///
/// Nothing in here comes out of a room's tick: per-request failures are
/// logged (and answered, for queries) inside the room.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room does not exist.
    #[error("room {0} not found")]
    NotFound(RoomId),

    /// The room is stopping or closed and takes no more events.
    #[error("room {0} is closed")]
    Closed(RoomId),

    /// Every id the pool can issue is in use.
    #[error("{0} id pool exhausted")]
    Exhausted(&'static str),

    /// The room config cannot be used.
    #[error("invalid room config: {0}")]
    InvalidConfig(String),
}

/// Configuration mistakes while building [`RpcBinds`](crate::RpcBinds).
/// Meant to abort startup.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("method {name} is already bound on {behavior}")]
    DuplicateMethod { behavior: BehaviorId, name: String },

    #[error("sync var {name} is already bound on {behavior}")]
    DuplicateSyncVar { behavior: BehaviorId, name: String },

    /// A parameter or value type has no resolver.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Failure reported by a server-side RPC handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
