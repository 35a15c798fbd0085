//! Identity and value types shared by requests and commands.

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;
use relaykit_codec::OwnedChunk;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A client's id, unique within one room and recycled after disconnect.
///
/// `ClientId(0)` is never issued to a client: it addresses the server
/// itself, e.g. as the target of a server-handled query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u16);

impl ClientId {
    pub const SERVER: ClientId = ClientId(0);

    pub fn is_server(self) -> bool {
        self == Self::SERVER
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C-{}", self.0)
    }
}

/// A replicated entity's id, scoped to its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E-{}", self.0)
    }
}

/// A room's id. Doubles as the transport context id clients send first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u32);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// Identifies a behavior type attached to entities; RPC and SyncVar binds
/// are looked up per behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BehaviorId(pub u16);

impl fmt::Display for BehaviorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Ownership class of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EntityType {
    /// Owned by the client that spawned it (or whoever it was transferred to).
    #[default]
    Dynamic,
    /// Placed by the master; always attributed to the current master.
    SceneObject,
    /// A former Dynamic entity whose owner let go of it; attributed to the
    /// current master.
    Orphan,
}

impl EntityType {
    /// SceneObject and Orphan entities belong to whoever is master.
    pub fn is_master_owned(self) -> bool {
        matches!(self, Self::SceneObject | Self::Orphan)
    }
}

bitflags! {
    /// What happens to an entity when its owner leaves.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PersistenceFlags: u8 {
        /// Become an Orphan instead of being destroyed.
        const ORPHAN_ON_LEAVE = 0b0000_0001;
    }
}

bitflags! {
    /// Rights required by a bound method, or held by a sender.
    ///
    /// A call is allowed when the sender holds at least one of the bits the
    /// bind requires, so `OWNER | MASTER` means "owner or master".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Authority: u8 {
        const ANY = 0b001;
        const OWNER = 0b010;
        const MASTER = 0b100;
    }
}

impl Authority {
    /// Whether a sender holding `held` satisfies this requirement.
    pub fn allows(self, held: Authority) -> bool {
        self.intersects(held)
    }
}

impl Default for Authority {
    fn default() -> Self {
        Self::ANY
    }
}

macro_rules! serde_as_bits {
    ($t:ty) => {
        impl Serialize for $t {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_u8(self.bits())
            }
        }

        impl<'de> Deserialize<'de> for $t {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let bits = u8::deserialize(deserializer)?;
                <$t>::from_bits(bits).ok_or_else(|| {
                    D::Error::custom(format_args!("unknown {} bits {bits:#04x}", stringify!($t)))
                })
            }
        }
    };
}

serde_as_bits!(PersistenceFlags);
serde_as_bits!(Authority);

// ---------------------------------------------------------------------------
// RPC
// ---------------------------------------------------------------------------

/// Whether a broadcast is retained for late joiners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BufferMode {
    /// Delivered now, never replayed.
    #[default]
    None,
    /// Replaces any earlier buffered call with the same key.
    Last,
    /// Appended after every earlier buffered call.
    All,
}

/// Outcome of a query, carried back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RprResult {
    Success,
    Disconnect,
    InvalidClient,
    InvalidEntity,
    FatalFailure,
    MethodNotFound,
    InvalidArguments,
    RuntimeException,
    InvalidAuthority,
}

// ---------------------------------------------------------------------------
// Clients and rooms
// ---------------------------------------------------------------------------

/// What a client tells the room about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub name: String,
    /// Application-defined, opaque to the relay.
    pub attributes: OwnedChunk,
}

impl ClientProfile {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: OwnedChunk::default(),
        }
    }
}

/// A client as seen by the other clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: ClientId,
    pub profile: ClientProfile,
}

/// Whether a room shows up in directory queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// Read-only description of a room, sent to clients and returned by the
/// directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub app_id: String,
    pub version: String,
    pub name: String,
    pub capacity: u16,
    pub occupancy: u16,
    pub visibility: Visibility,
    /// A locked room admits no new clients.
    pub locked: bool,
    pub has_password: bool,
    pub attributes: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(ClientId(3).to_string(), "C-3");
        assert_eq!(EntityId(9).to_string(), "E-9");
        assert_eq!(RoomId(1).to_string(), "R-1");
        assert_eq!(BehaviorId(2).to_string(), "B-2");
    }

    #[test]
    fn test_ids_encode_as_plain_varints() {
        assert_eq!(relaykit_codec::to_vec(&ClientId(5)).unwrap(), vec![5]);
        assert_eq!(relaykit_codec::to_vec(&EntityId(300)).unwrap(), vec![0xAC, 0x02]);
    }

    #[test]
    fn test_owner_or_master_requirement() {
        let required = Authority::OWNER | Authority::MASTER;
        assert!(!required.allows(Authority::ANY));
        assert!(required.allows(Authority::ANY | Authority::OWNER));
        assert!(required.allows(Authority::ANY | Authority::MASTER));
        assert!(Authority::ANY.allows(Authority::ANY));
    }

    #[test]
    fn test_flags_reject_unknown_bits() {
        let ok: PersistenceFlags = relaykit_codec::from_slice(&[1]).unwrap();
        assert_eq!(ok, PersistenceFlags::ORPHAN_ON_LEAVE);
        assert!(relaykit_codec::from_slice::<PersistenceFlags>(&[0x80]).is_err());
    }

    #[test]
    fn test_master_owned_types() {
        assert!(!EntityType::Dynamic.is_master_owned());
        assert!(EntityType::SceneObject.is_master_owned());
        assert!(EntityType::Orphan.is_master_owned());
    }
}
