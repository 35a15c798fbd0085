//! Packets as the room sees them: a batch of envelopes decoded into typed
//! requests, and a batch of commands decoded on the client side.

use bytes::Bytes;
use relaykit_codec::{ByteChunk, OwnedChunk};
use relaykit_protocol::messages::*;
use relaykit_protocol::{
    decode_batch, encode_batch, BehaviorId, BufferMode, ClientId, ClientMessage, ClientProfile,
    EntityId, EntityType, Envelope, MessageKind, PayloadRegistry, PersistenceFlags,
    ProtocolError, RpcRequest, RprResult, ServerMessage,
};

#[test]
fn test_client_batch_decodes_in_order() {
    let registry = PayloadRegistry::standard();
    let batch = vec![
        Envelope::from_payload(
            &registry,
            &RegisterClientRequest {
                profile: ClientProfile::named("ada"),
                password: None,
                time_sync: TimeSyncRequest { client_time: 17 },
            },
        )
        .unwrap(),
        Envelope::from_payload(
            &registry,
            &SpawnEntityRequest {
                token: 5,
                resource: "ship".into(),
                entity_type: EntityType::Dynamic,
                persistence: PersistenceFlags::empty(),
                attributes: ByteChunk::from_slice(&[1, 2, 3]),
            },
        )
        .unwrap(),
        Envelope::from_payload(
            &registry,
            &BroadcastRpcRequest {
                entity: EntityId(1),
                behavior: BehaviorId(2),
                method: "fire".into(),
                args: ByteChunk::from_slice(&[9]),
                buffer: BufferMode::Last,
                group: Some("red".into()),
                exclude: None,
            },
        )
        .unwrap(),
    ];
    let packet = Bytes::from(encode_batch(&batch).unwrap());
    let envelopes = decode_batch(&packet).unwrap();

    let messages: Vec<_> = envelopes
        .iter()
        .map(|envelope| ClientMessage::from_envelope(&registry, envelope).unwrap())
        .collect();
    assert_eq!(messages[0].kind(), MessageKind::RegisterClientRequest);
    match &messages[1] {
        ClientMessage::Spawn(spawn) => {
            assert_eq!(spawn.token, 5);
            assert_eq!(spawn.attributes.as_slice(), &[1, 2, 3]);
        }
        other => panic!("expected spawn, got {other:?}"),
    }
    match &messages[2] {
        ClientMessage::Rpc(RpcRequest::Broadcast(rpc)) => {
            assert_eq!(rpc.method, "fire");
            assert_eq!(rpc.group.as_deref(), Some("red"));
        }
        other => panic!("expected broadcast, got {other:?}"),
    }
}

#[test]
fn test_unknown_code_is_reported() {
    let registry = PayloadRegistry::standard();
    assert_eq!(
        ClientMessage::decode(&registry, 250, &[]),
        Err(ProtocolError::UnknownCode(250))
    );
}

#[test]
fn test_truncated_payload_is_a_codec_error() {
    let registry = PayloadRegistry::standard();
    let code = registry.code(MessageKind::TransferEntityRequest).unwrap();
    let result = ClientMessage::decode(&registry, code, &[1]);
    assert!(matches!(result, Err(ProtocolError::Codec(_))));
}

#[test]
fn test_server_packet_round_trip() {
    let registry = PayloadRegistry::standard();
    let rpr = RprCommand {
        channel: 3,
        result: RprResult::Success,
        payload: OwnedChunk::from(vec![4, 2]),
    };
    let batch = [
        Envelope::from_payload(&registry, &ChangeMasterCommand { master: ClientId(2) }).unwrap(),
        Envelope::empty(),
        Envelope::from_payload(&registry, &rpr).unwrap(),
    ];
    let packet = encode_batch(&batch).unwrap();
    let messages = ServerMessage::decode_packet(&registry, &packet).unwrap();
    assert_eq!(
        messages,
        vec![
            ServerMessage::ChangeMaster(ChangeMasterCommand { master: ClientId(2) }),
            ServerMessage::Rpr(rpr),
        ]
    );
}

#[test]
fn test_request_sent_to_client_is_wrong_direction() {
    let registry = PayloadRegistry::standard();
    let envelope = Envelope::from_payload(
        &registry,
        &TimeSyncRequest { client_time: 1 },
    )
    .unwrap();
    assert_eq!(
        ServerMessage::from_envelope(&registry, &envelope),
        Err(ProtocolError::WrongDirection(MessageKind::TimeSyncRequest))
    );
}

#[test]
fn test_custom_registry_codes() {
    let mut registry = PayloadRegistry::new();
    registry
        .register(MessageKind::TimeSyncRequest, 200)
        .unwrap()
        .register(MessageKind::TimeSyncResponse, 201)
        .unwrap();
    let envelope = Envelope::from_payload(&registry, &TimeSyncRequest { client_time: 8 }).unwrap();
    assert_eq!(envelope.code, 200);
    assert_eq!(
        ClientMessage::from_envelope(&registry, &envelope).unwrap(),
        ClientMessage::TimeSync(TimeSyncRequest { client_time: 8 })
    );
    assert!(Envelope::from_payload(&registry, &DestroyEntityCommand { entity: EntityId(1) }).is_err());
}
