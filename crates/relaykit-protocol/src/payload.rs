//! Payload kinds and the type-code registry.
//!
//! Every envelope starts with a one-byte type code. Codes are handed out
//! once, at startup, through [`PayloadRegistry`]; code `0` means "no
//! payload" and everything below [`MIN_CODE`] is left to the transport.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::Serialize;

use crate::ProtocolError;

/// The code of an empty envelope.
pub const NO_PAYLOAD: u8 = 0;

/// Lowest code available for registration.
pub const MIN_CODE: u8 = 100;

/// Which side sends a payload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server.
    Request,
    /// Server to client.
    Command,
}

macro_rules! message_kinds {
    (
        requests: [$($req:ident),* $(,)?],
        commands: [$($cmd:ident),* $(,)?] $(,)?
    ) => {
        /// Every payload type the relay understands.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum MessageKind {
            $($req,)*
            $($cmd,)*
        }

        impl MessageKind {
            /// All kinds, requests first, in declaration order.
            pub const ALL: &'static [MessageKind] = &[
                $(MessageKind::$req,)*
                $(MessageKind::$cmd,)*
            ];

            pub fn direction(self) -> Direction {
                match self {
                    $(MessageKind::$req => Direction::Request,)*
                    $(MessageKind::$cmd => Direction::Command,)*
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(MessageKind::$req => stringify!($req),)*
                    $(MessageKind::$cmd => stringify!($cmd),)*
                }
            }
        }
    };
}

message_kinds! {
    requests: [
        RegisterClientRequest,
        TimeSyncRequest,
        UpdateProfileRequest,
        JoinGroupRequest,
        LeaveGroupRequest,
        ChangeMasterRequest,
        KickClientRequest,
        UpdateRoomRequest,
        SpawnEntityRequest,
        DestroyEntityRequest,
        TakeoverEntityRequest,
        TransferEntityRequest,
        OrphanEntityRequest,
        UpdateEntityAttributesRequest,
        BroadcastRpcRequest,
        TargetRpcRequest,
        QueryRpcRequest,
        BufferRpcRequest,
        RprResponse,
        SyncVarRequest,
    ],
    commands: [
        RegisterClientResponse,
        ClientConnectedCommand,
        ClientDisconnectedCommand,
        ClientProfileChangedCommand,
        ChangeMasterCommand,
        RoomUpdatedCommand,
        TimeSyncResponse,
        SpawnEntityCommand,
        DestroyEntityCommand,
        ChangeOwnerCommand,
        OrphanEntityCommand,
        EntityAttributesCommand,
        BroadcastRpcCommand,
        TargetRpcCommand,
        QueryRpcCommand,
        RprCommand,
        SyncVarCommand,
    ],
}

/// A struct that travels as the body of one envelope.
pub trait Payload: Serialize {
    const KIND: MessageKind;
}

/// Bidirectional map between type codes and [`MessageKind`]s.
///
/// Built once and read-only afterwards; see [`global`] for the
/// process-wide instance.
#[derive(Debug, Clone, Default)]
pub struct PayloadRegistry {
    by_code: HashMap<u8, MessageKind>,
    by_kind: HashMap<MessageKind, u8>,
}

impl PayloadRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every [`MessageKind`] numbered from [`MIN_CODE`] in declaration
    /// order. Both ends of a connection must agree on this table.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for (kind, code) in MessageKind::ALL.iter().zip(MIN_CODE..) {
            registry.by_code.insert(code, *kind);
            registry.by_kind.insert(*kind, code);
        }
        registry
    }

    /// Assigns `code` to `kind`.
    pub fn register(&mut self, kind: MessageKind, code: u8) -> Result<&mut Self, ProtocolError> {
        if code < MIN_CODE {
            return Err(ProtocolError::ReservedCode(code));
        }
        if self.by_code.contains_key(&code) {
            return Err(ProtocolError::DuplicateCode(code));
        }
        if self.by_kind.contains_key(&kind) {
            return Err(ProtocolError::DuplicateKind(kind));
        }
        self.by_code.insert(code, kind);
        self.by_kind.insert(kind, code);
        Ok(self)
    }

    pub fn try_get_type(&self, code: u8) -> Option<MessageKind> {
        self.by_code.get(&code).copied()
    }

    pub fn try_get_code(&self, kind: MessageKind) -> Option<u8> {
        self.by_kind.get(&kind).copied()
    }

    /// Like [`try_get_code`](Self::try_get_code), as an error.
    pub fn code(&self, kind: MessageKind) -> Result<u8, ProtocolError> {
        self.try_get_code(kind)
            .ok_or(ProtocolError::NotRegistered(kind))
    }

    /// Like [`try_get_type`](Self::try_get_type), as an error.
    pub fn kind(&self, code: u8) -> Result<MessageKind, ProtocolError> {
        self.try_get_type(code)
            .ok_or(ProtocolError::UnknownCode(code))
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

static GLOBAL: OnceLock<PayloadRegistry> = OnceLock::new();

/// Installs the process-wide registry. Must run before the first call to
/// [`global`], and only once.
pub fn install(registry: PayloadRegistry) -> Result<(), ProtocolError> {
    GLOBAL
        .set(registry)
        .map_err(|_| ProtocolError::AlreadyInitialized)
}

/// The process-wide registry, defaulting to [`PayloadRegistry::standard`]
/// when nothing was installed.
pub fn global() -> &'static PayloadRegistry {
    GLOBAL.get_or_init(PayloadRegistry::standard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_covers_every_kind() {
        let registry = PayloadRegistry::standard();
        assert_eq!(registry.len(), MessageKind::ALL.len());
        for kind in MessageKind::ALL {
            let code = registry.try_get_code(*kind).unwrap();
            assert!(code >= MIN_CODE);
            assert_eq!(registry.try_get_type(code), Some(*kind));
        }
    }

    #[test]
    fn test_register_rejects_reserved_and_duplicates() {
        let mut registry = PayloadRegistry::new();
        assert_eq!(
            registry.register(MessageKind::SpawnEntityRequest, NO_PAYLOAD).unwrap_err(),
            ProtocolError::ReservedCode(0)
        );
        assert_eq!(
            registry.register(MessageKind::SpawnEntityRequest, 42).unwrap_err(),
            ProtocolError::ReservedCode(42)
        );
        registry.register(MessageKind::SpawnEntityRequest, 150).unwrap();
        assert_eq!(
            registry.register(MessageKind::DestroyEntityRequest, 150).unwrap_err(),
            ProtocolError::DuplicateCode(150)
        );
        assert_eq!(
            registry.register(MessageKind::SpawnEntityRequest, 151).unwrap_err(),
            ProtocolError::DuplicateKind(MessageKind::SpawnEntityRequest)
        );
    }

    #[test]
    fn test_unknown_lookups() {
        let registry = PayloadRegistry::new();
        assert_eq!(registry.try_get_type(200), None);
        assert_eq!(registry.kind(200), Err(ProtocolError::UnknownCode(200)));
        assert_eq!(
            registry.code(MessageKind::RprCommand),
            Err(ProtocolError::NotRegistered(MessageKind::RprCommand))
        );
    }

    #[test]
    fn test_directions() {
        assert_eq!(MessageKind::QueryRpcRequest.direction(), Direction::Request);
        assert_eq!(MessageKind::RprCommand.direction(), Direction::Command);
        assert_eq!(MessageKind::RprResponse.name(), "RprResponse");
    }
}
