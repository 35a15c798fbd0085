//! Request (client to server) and command (server to client) payloads.
//!
//! Requests borrow their blobs from the receive buffer as
//! [`ByteChunk`]s. Commands own theirs as [`OwnedChunk`]s, because the
//! room keeps them (message buffer, deferred sends) past the packet that
//! produced them. Turning a request into a command is therefore where the
//! copy happens.

use std::collections::BTreeMap;

use relaykit_codec::{ByteChunk, OwnedChunk};
use serde::{Deserialize, Serialize};

use crate::payload::{MessageKind, Payload};
use crate::types::{
    BehaviorId, BufferMode, ClientId, ClientInfo, ClientProfile, EntityId, EntityType,
    PersistenceFlags, RoomInfo, RprResult, Visibility,
};

macro_rules! payload {
    ($($t:ident $(<$lt:lifetime>)? => $kind:ident),* $(,)?) => {$(
        impl $(<$lt>)? Payload for $t $(<$lt>)? {
            const KIND: MessageKind = MessageKind::$kind;
        }
    )*};
}

// ---------------------------------------------------------------------------
// Session requests
// ---------------------------------------------------------------------------

/// First request on a connection after the context selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterClientRequest {
    pub profile: ClientProfile,
    pub password: Option<String>,
    pub time_sync: TimeSyncRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSyncRequest {
    /// Client clock, echoed back untouched.
    pub client_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProfileRequest {
    pub profile: ClientProfile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinGroupRequest {
    pub group: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveGroupRequest {
    pub group: String,
}

// ---------------------------------------------------------------------------
// Master requests
// ---------------------------------------------------------------------------

/// Master hands mastership to another client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMasterRequest {
    pub client: ClientId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KickClientRequest {
    pub client: ClientId,
}

/// Master edits room settings. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRoomRequest {
    pub locked: Option<bool>,
    pub visibility: Option<Visibility>,
    pub attributes: Option<BTreeMap<String, String>>,
}

// ---------------------------------------------------------------------------
// Entity requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnEntityRequest<'a> {
    /// Chosen by the requester to match the reply to this request.
    pub token: u32,
    pub resource: String,
    pub entity_type: EntityType,
    pub persistence: PersistenceFlags,
    #[serde(borrow)]
    pub attributes: ByteChunk<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyEntityRequest {
    pub entity: EntityId,
}

/// The sender asks to become the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeoverEntityRequest {
    pub entity: EntityId,
}

/// The owner (or master) gives the entity to `client`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEntityRequest {
    pub entity: EntityId,
    pub client: ClientId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanEntityRequest {
    pub entity: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEntityAttributesRequest<'a> {
    pub entity: EntityId,
    #[serde(borrow)]
    pub attributes: ByteChunk<'a>,
}

// ---------------------------------------------------------------------------
// RPC requests
// ---------------------------------------------------------------------------

/// Delivered to every ready client, optionally narrowed to a group and
/// optionally skipping one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastRpcRequest<'a> {
    pub entity: EntityId,
    pub behavior: BehaviorId,
    pub method: String,
    #[serde(borrow)]
    pub args: ByteChunk<'a>,
    pub buffer: BufferMode,
    pub group: Option<String>,
    pub exclude: Option<ClientId>,
}

/// Delivered to exactly one client, or run on the server when `target` is
/// [`ClientId::SERVER`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRpcRequest<'a> {
    pub entity: EntityId,
    pub behavior: BehaviorId,
    pub method: String,
    #[serde(borrow)]
    pub args: ByteChunk<'a>,
    pub target: ClientId,
}

/// A targeted call expecting exactly one [`RprCommand`] back on `channel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRpcRequest<'a> {
    pub entity: EntityId,
    pub behavior: BehaviorId,
    pub method: String,
    #[serde(borrow)]
    pub args: ByteChunk<'a>,
    pub target: ClientId,
    pub channel: u32,
}

/// Stored in the message buffer only; never delivered immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferRpcRequest<'a> {
    pub entity: EntityId,
    pub behavior: BehaviorId,
    pub method: String,
    #[serde(borrow)]
    pub args: ByteChunk<'a>,
    pub mode: BufferMode,
}

/// The queried client's answer, routed back to `requester`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RprResponse<'a> {
    pub channel: u32,
    pub requester: ClientId,
    pub result: RprResult,
    #[serde(borrow)]
    pub payload: ByteChunk<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncVarRequest<'a> {
    pub entity: EntityId,
    pub behavior: BehaviorId,
    pub name: String,
    #[serde(borrow)]
    pub value: ByteChunk<'a>,
}

// ---------------------------------------------------------------------------
// Session commands
// ---------------------------------------------------------------------------

/// Room snapshot sent in answer to a registration. Buffered messages
/// follow it in the same packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterClientResponse {
    pub client: ClientId,
    pub master: ClientId,
    /// Every registered client, including the new one.
    pub clients: Vec<ClientInfo>,
    pub room: RoomInfo,
    pub time: TimeSyncResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConnectedCommand {
    pub client: ClientInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDisconnectedCommand {
    pub client: ClientId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProfileChangedCommand {
    pub client: ClientInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMasterCommand {
    pub master: ClientId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomUpdatedCommand {
    pub room: RoomInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSyncResponse {
    pub client_time: u64,
    /// Milliseconds since the room started.
    pub server_time: u64,
}

// ---------------------------------------------------------------------------
// Entity commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnEntityCommand {
    pub entity: EntityId,
    /// `None` for master-owned entities: their owner is whoever is master.
    pub owner: Option<ClientId>,
    pub entity_type: EntityType,
    pub token: u32,
    pub requester: ClientId,
    pub resource: String,
    pub persistence: PersistenceFlags,
    pub attributes: OwnedChunk,
}

impl SpawnEntityCommand {
    /// A copy with a different type. Master-owned types drop the owner.
    pub fn with_type(&self, entity_type: EntityType) -> Self {
        let owner = if entity_type.is_master_owned() {
            None
        } else {
            self.owner
        };
        Self {
            entity_type,
            owner,
            ..self.clone()
        }
    }

    /// A copy with a different owner.
    pub fn with_owner(&self, owner: Option<ClientId>) -> Self {
        Self {
            owner,
            ..self.clone()
        }
    }

    /// A copy with replaced attributes.
    pub fn with_attributes(&self, attributes: OwnedChunk) -> Self {
        Self {
            attributes,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyEntityCommand {
    pub entity: EntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeOwnerCommand {
    pub entity: EntityId,
    pub owner: ClientId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanEntityCommand {
    pub entity: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAttributesCommand {
    pub entity: EntityId,
    pub attributes: OwnedChunk,
}

// ---------------------------------------------------------------------------
// RPC commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastRpcCommand {
    pub sender: ClientId,
    pub entity: EntityId,
    pub behavior: BehaviorId,
    pub method: String,
    pub args: OwnedChunk,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRpcCommand {
    pub sender: ClientId,
    pub entity: EntityId,
    pub behavior: BehaviorId,
    pub method: String,
    pub args: OwnedChunk,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRpcCommand {
    pub sender: ClientId,
    pub entity: EntityId,
    pub behavior: BehaviorId,
    pub method: String,
    pub args: OwnedChunk,
    pub channel: u32,
}

/// Resolution of a query, sent to the client that asked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RprCommand {
    pub channel: u32,
    pub result: RprResult,
    pub payload: OwnedChunk,
}

impl RprCommand {
    /// A payload-less resolution, used for every failure outcome.
    pub fn failed(channel: u32, result: RprResult) -> Self {
        Self {
            channel,
            result,
            payload: OwnedChunk::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncVarCommand {
    pub sender: ClientId,
    pub entity: EntityId,
    pub behavior: BehaviorId,
    pub name: String,
    pub value: OwnedChunk,
}

payload! {
    RegisterClientRequest => RegisterClientRequest,
    TimeSyncRequest => TimeSyncRequest,
    UpdateProfileRequest => UpdateProfileRequest,
    JoinGroupRequest => JoinGroupRequest,
    LeaveGroupRequest => LeaveGroupRequest,
    ChangeMasterRequest => ChangeMasterRequest,
    KickClientRequest => KickClientRequest,
    UpdateRoomRequest => UpdateRoomRequest,
    SpawnEntityRequest<'a> => SpawnEntityRequest,
    DestroyEntityRequest => DestroyEntityRequest,
    TakeoverEntityRequest => TakeoverEntityRequest,
    TransferEntityRequest => TransferEntityRequest,
    OrphanEntityRequest => OrphanEntityRequest,
    UpdateEntityAttributesRequest<'a> => UpdateEntityAttributesRequest,
    BroadcastRpcRequest<'a> => BroadcastRpcRequest,
    TargetRpcRequest<'a> => TargetRpcRequest,
    QueryRpcRequest<'a> => QueryRpcRequest,
    BufferRpcRequest<'a> => BufferRpcRequest,
    RprResponse<'a> => RprResponse,
    SyncVarRequest<'a> => SyncVarRequest,
    RegisterClientResponse => RegisterClientResponse,
    ClientConnectedCommand => ClientConnectedCommand,
    ClientDisconnectedCommand => ClientDisconnectedCommand,
    ClientProfileChangedCommand => ClientProfileChangedCommand,
    ChangeMasterCommand => ChangeMasterCommand,
    RoomUpdatedCommand => RoomUpdatedCommand,
    TimeSyncResponse => TimeSyncResponse,
    SpawnEntityCommand => SpawnEntityCommand,
    DestroyEntityCommand => DestroyEntityCommand,
    ChangeOwnerCommand => ChangeOwnerCommand,
    OrphanEntityCommand => OrphanEntityCommand,
    EntityAttributesCommand => EntityAttributesCommand,
    BroadcastRpcCommand => BroadcastRpcCommand,
    TargetRpcCommand => TargetRpcCommand,
    QueryRpcCommand => QueryRpcCommand,
    RprCommand => RprCommand,
    SyncVarCommand => SyncVarCommand,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_type_is_a_copy() {
        let spawn = SpawnEntityCommand {
            entity: EntityId(4),
            owner: Some(ClientId(2)),
            entity_type: EntityType::Dynamic,
            token: 11,
            requester: ClientId(2),
            resource: "crate".into(),
            persistence: PersistenceFlags::ORPHAN_ON_LEAVE,
            attributes: OwnedChunk::from(vec![1]),
        };
        let orphan = spawn.with_type(EntityType::Orphan);
        assert_eq!(orphan.owner, None);
        assert_eq!(orphan.entity_type, EntityType::Orphan);
        assert_eq!(spawn.owner, Some(ClientId(2)));
        assert_eq!(orphan.token, spawn.token);
    }

    #[test]
    fn test_request_args_borrow_from_input() {
        let request = QueryRpcRequest {
            entity: EntityId(1),
            behavior: BehaviorId(3),
            method: "ping".into(),
            args: ByteChunk::from_slice(&[1, 2]),
            target: ClientId(7),
            channel: 99,
        };
        let bytes = relaykit_codec::to_vec(&request).unwrap();
        let decoded: QueryRpcRequest<'_> = relaykit_codec::from_slice(&bytes).unwrap();
        assert_eq!(decoded, request);
        let base = bytes.as_ptr() as usize;
        assert!((decoded.args.as_slice().as_ptr() as usize) >= base);
    }
}
