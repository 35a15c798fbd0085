//! Typed views of decoded envelopes.
//!
//! [`ClientMessage`] is what the room dispatches on: one variant per
//! request kind, borrowing from the packet. [`ServerMessage`] is the owned
//! counterpart for the client side (and for tests).

use crate::messages::*;
use crate::payload::{Direction, MessageKind, PayloadRegistry};
use crate::{Envelope, ProtocolError};

/// The four RPC delivery forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcRequest<'a> {
    Broadcast(BroadcastRpcRequest<'a>),
    Target(TargetRpcRequest<'a>),
    Query(QueryRpcRequest<'a>),
    Buffer(BufferRpcRequest<'a>),
}

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage<'a> {
    Register(RegisterClientRequest),
    TimeSync(TimeSyncRequest),
    UpdateProfile(UpdateProfileRequest),
    JoinGroup(JoinGroupRequest),
    LeaveGroup(LeaveGroupRequest),
    ChangeMaster(ChangeMasterRequest),
    Kick(KickClientRequest),
    UpdateRoom(UpdateRoomRequest),
    Spawn(SpawnEntityRequest<'a>),
    Destroy(DestroyEntityRequest),
    Takeover(TakeoverEntityRequest),
    Transfer(TransferEntityRequest),
    Orphan(OrphanEntityRequest),
    UpdateAttributes(UpdateEntityAttributesRequest<'a>),
    Rpc(RpcRequest<'a>),
    Rpr(RprResponse<'a>),
    SyncVar(SyncVarRequest<'a>),
}

impl<'a> ClientMessage<'a> {
    /// Decodes one request body.
    ///
    /// Fails with `UnknownCode` for unregistered codes and with
    /// `WrongDirection` when a client sends a command kind.
    pub fn decode(
        registry: &PayloadRegistry,
        code: u8,
        payload: &'a [u8],
    ) -> Result<Self, ProtocolError> {
        let kind = registry.kind(code)?;
        Ok(match kind {
            MessageKind::RegisterClientRequest => Self::Register(body(payload)?),
            MessageKind::TimeSyncRequest => Self::TimeSync(body(payload)?),
            MessageKind::UpdateProfileRequest => Self::UpdateProfile(body(payload)?),
            MessageKind::JoinGroupRequest => Self::JoinGroup(body(payload)?),
            MessageKind::LeaveGroupRequest => Self::LeaveGroup(body(payload)?),
            MessageKind::ChangeMasterRequest => Self::ChangeMaster(body(payload)?),
            MessageKind::KickClientRequest => Self::Kick(body(payload)?),
            MessageKind::UpdateRoomRequest => Self::UpdateRoom(body(payload)?),
            MessageKind::SpawnEntityRequest => Self::Spawn(body(payload)?),
            MessageKind::DestroyEntityRequest => Self::Destroy(body(payload)?),
            MessageKind::TakeoverEntityRequest => Self::Takeover(body(payload)?),
            MessageKind::TransferEntityRequest => Self::Transfer(body(payload)?),
            MessageKind::OrphanEntityRequest => Self::Orphan(body(payload)?),
            MessageKind::UpdateEntityAttributesRequest => {
                Self::UpdateAttributes(body(payload)?)
            }
            MessageKind::BroadcastRpcRequest => Self::Rpc(RpcRequest::Broadcast(body(payload)?)),
            MessageKind::TargetRpcRequest => Self::Rpc(RpcRequest::Target(body(payload)?)),
            MessageKind::QueryRpcRequest => Self::Rpc(RpcRequest::Query(body(payload)?)),
            MessageKind::BufferRpcRequest => Self::Rpc(RpcRequest::Buffer(body(payload)?)),
            MessageKind::RprResponse => Self::Rpr(body(payload)?),
            MessageKind::SyncVarRequest => Self::SyncVar(body(payload)?),
            other => {
                debug_assert_eq!(other.direction(), Direction::Command);
                return Err(ProtocolError::WrongDirection(other));
            }
        })
    }

    /// Decodes the body of `envelope`.
    pub fn from_envelope(
        registry: &PayloadRegistry,
        envelope: &'a Envelope,
    ) -> Result<Self, ProtocolError> {
        Self::decode(registry, envelope.code, &envelope.payload)
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Register(_) => MessageKind::RegisterClientRequest,
            Self::TimeSync(_) => MessageKind::TimeSyncRequest,
            Self::UpdateProfile(_) => MessageKind::UpdateProfileRequest,
            Self::JoinGroup(_) => MessageKind::JoinGroupRequest,
            Self::LeaveGroup(_) => MessageKind::LeaveGroupRequest,
            Self::ChangeMaster(_) => MessageKind::ChangeMasterRequest,
            Self::Kick(_) => MessageKind::KickClientRequest,
            Self::UpdateRoom(_) => MessageKind::UpdateRoomRequest,
            Self::Spawn(_) => MessageKind::SpawnEntityRequest,
            Self::Destroy(_) => MessageKind::DestroyEntityRequest,
            Self::Takeover(_) => MessageKind::TakeoverEntityRequest,
            Self::Transfer(_) => MessageKind::TransferEntityRequest,
            Self::Orphan(_) => MessageKind::OrphanEntityRequest,
            Self::UpdateAttributes(_) => MessageKind::UpdateEntityAttributesRequest,
            Self::Rpc(RpcRequest::Broadcast(_)) => MessageKind::BroadcastRpcRequest,
            Self::Rpc(RpcRequest::Target(_)) => MessageKind::TargetRpcRequest,
            Self::Rpc(RpcRequest::Query(_)) => MessageKind::QueryRpcRequest,
            Self::Rpc(RpcRequest::Buffer(_)) => MessageKind::BufferRpcRequest,
            Self::Rpr(_) => MessageKind::RprResponse,
            Self::SyncVar(_) => MessageKind::SyncVarRequest,
        }
    }
}

/// A decoded server command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Registered(RegisterClientResponse),
    ClientConnected(ClientConnectedCommand),
    ClientDisconnected(ClientDisconnectedCommand),
    ClientProfileChanged(ClientProfileChangedCommand),
    ChangeMaster(ChangeMasterCommand),
    RoomUpdated(RoomUpdatedCommand),
    TimeSync(TimeSyncResponse),
    Spawn(SpawnEntityCommand),
    Destroy(DestroyEntityCommand),
    ChangeOwner(ChangeOwnerCommand),
    Orphan(OrphanEntityCommand),
    EntityAttributes(EntityAttributesCommand),
    BroadcastRpc(BroadcastRpcCommand),
    TargetRpc(TargetRpcCommand),
    QueryRpc(QueryRpcCommand),
    Rpr(RprCommand),
    SyncVar(SyncVarCommand),
}

impl ServerMessage {
    /// Decodes one command body.
    pub fn decode(
        registry: &PayloadRegistry,
        code: u8,
        payload: &[u8],
    ) -> Result<Self, ProtocolError> {
        let kind = registry.kind(code)?;
        Ok(match kind {
            MessageKind::RegisterClientResponse => Self::Registered(body(payload)?),
            MessageKind::ClientConnectedCommand => Self::ClientConnected(body(payload)?),
            MessageKind::ClientDisconnectedCommand => Self::ClientDisconnected(body(payload)?),
            MessageKind::ClientProfileChangedCommand => {
                Self::ClientProfileChanged(body(payload)?)
            }
            MessageKind::ChangeMasterCommand => Self::ChangeMaster(body(payload)?),
            MessageKind::RoomUpdatedCommand => Self::RoomUpdated(body(payload)?),
            MessageKind::TimeSyncResponse => Self::TimeSync(body(payload)?),
            MessageKind::SpawnEntityCommand => Self::Spawn(body(payload)?),
            MessageKind::DestroyEntityCommand => Self::Destroy(body(payload)?),
            MessageKind::ChangeOwnerCommand => Self::ChangeOwner(body(payload)?),
            MessageKind::OrphanEntityCommand => Self::Orphan(body(payload)?),
            MessageKind::EntityAttributesCommand => Self::EntityAttributes(body(payload)?),
            MessageKind::BroadcastRpcCommand => Self::BroadcastRpc(body(payload)?),
            MessageKind::TargetRpcCommand => Self::TargetRpc(body(payload)?),
            MessageKind::QueryRpcCommand => Self::QueryRpc(body(payload)?),
            MessageKind::RprCommand => Self::Rpr(body(payload)?),
            MessageKind::SyncVarCommand => Self::SyncVar(body(payload)?),
            other => return Err(ProtocolError::WrongDirection(other)),
        })
    }

    pub fn from_envelope(
        registry: &PayloadRegistry,
        envelope: &Envelope,
    ) -> Result<Self, ProtocolError> {
        Self::decode(registry, envelope.code, &envelope.payload)
    }

    /// Decodes every non-empty envelope of a packet.
    pub fn decode_packet(
        registry: &PayloadRegistry,
        packet: &[u8],
    ) -> Result<Vec<Self>, ProtocolError> {
        let packet = bytes::Bytes::copy_from_slice(packet);
        crate::decode_batch(&packet)?
            .iter()
            .filter(|envelope| !envelope.is_empty())
            .map(|envelope| Self::from_envelope(registry, envelope))
            .collect()
    }
}

fn body<'a, T: serde::Deserialize<'a>>(payload: &'a [u8]) -> Result<T, ProtocolError> {
    Ok(relaykit_codec::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClientId, EntityId};

    #[test]
    fn test_command_from_client_is_wrong_direction() {
        let registry = PayloadRegistry::standard();
        let envelope =
            Envelope::from_payload(&registry, &DestroyEntityCommand { entity: EntityId(1) })
                .unwrap();
        assert_eq!(
            ClientMessage::from_envelope(&registry, &envelope),
            Err(ProtocolError::WrongDirection(MessageKind::DestroyEntityCommand))
        );
    }

    #[test]
    fn test_request_kind_matches_code() {
        let registry = PayloadRegistry::standard();
        let envelope =
            Envelope::from_payload(&registry, &KickClientRequest { client: ClientId(3) })
                .unwrap();
        let message = ClientMessage::from_envelope(&registry, &envelope).unwrap();
        assert_eq!(message.kind(), MessageKind::KickClientRequest);
        assert_eq!(
            message,
            ClientMessage::Kick(KickClientRequest { client: ClientId(3) })
        );
    }
}
