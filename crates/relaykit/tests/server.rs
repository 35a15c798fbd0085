//! Integration tests for the relay server, handler, and full connection flow.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use relaykit::prelude::*;
use relaykit::protocol::messages::{RegisterClientRequest, SpawnEntityRequest, TimeSyncRequest};
use relaykit::protocol::{encode_batch, global, ClientProfile, Envelope, Payload, ServerMessage};
use relaykit::transport::{Connection, DeliveryMode, UdpConnection};
use relaykit::codec::ByteChunk;
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Starts a server on random ports with one open room.
async fn start_server() -> (RelayServer, RoomId) {
    let server = RelayServer::builder()
        .websocket("127.0.0.1:0")
        .udp("127.0.0.1:0")
        .room(RoomConfig {
            name: "main".into(),
            capacity: 4,
            ..RoomConfig::default()
        })
        .build()
        .await
        .expect("server should build");
    let room = server.rooms()[0].id;
    (server, room)
}

fn spawn_server(server: RelayServer) {
    tokio::spawn(async move {
        let _ = server.run().await;
    });
}

async fn connect(addr: std::net::SocketAddr) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

fn packet<P: Payload>(payload: &P) -> Vec<u8> {
    let envelope = Envelope::from_payload(global(), payload).unwrap();
    encode_batch([&envelope]).unwrap()
}

fn register(name: &str) -> Vec<u8> {
    packet(&RegisterClientRequest {
        profile: ClientProfile::named(name),
        password: None,
        time_sync: TimeSyncRequest { client_time: 1 },
    })
}

/// Reads binary frames until one decodes to something.
async fn recv_messages(ws: &mut ClientWs) -> Vec<ServerMessage> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .expect("ws error");
        if let Message::Binary(data) = msg {
            return ServerMessage::decode_packet(global(), &data).unwrap();
        }
    }
}

/// Reads until the server closes the socket and returns its code.
async fn recv_close(ws: &mut ClientWs) -> Option<DisconnectCode> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out");
        match msg {
            Some(Ok(Message::Close(Some(frame)))) => {
                return DisconnectCode::from_ws_close_code(u16::from(frame.code));
            }
            Some(Ok(Message::Close(None))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

// =========================================================================
// WebSocket
// =========================================================================

#[tokio::test]
async fn test_register_over_websocket() {
    let (server, room) = start_server().await;
    let addr = server.ws_addr().unwrap();
    spawn_server(server);

    let mut a = connect(addr).await;
    a.send(Message::binary(room.0.to_ne_bytes().to_vec())).await.unwrap();
    a.send(Message::binary(register("a"))).await.unwrap();
    let messages = recv_messages(&mut a).await;
    let ServerMessage::Registered(snapshot) = &messages[0] else {
        panic!("expected snapshot, got {messages:?}");
    };
    assert_eq!(snapshot.client, ClientId(1));
    assert_eq!(snapshot.master, ClientId(1));
    assert_eq!(snapshot.room.name, "main");
    assert_eq!(snapshot.time.client_time, 1);

    let mut b = connect(addr).await;
    b.send(Message::binary(room.0.to_ne_bytes().to_vec())).await.unwrap();
    b.send(Message::binary(register("b"))).await.unwrap();
    let messages = recv_messages(&mut b).await;
    assert!(matches!(&messages[0], ServerMessage::Registered(s) if s.room.occupancy == 2));

    let joined = recv_messages(&mut a).await;
    assert!(joined.iter().any(|m| matches!(
        m,
        ServerMessage::ClientConnected(cmd) if cmd.client.profile.name == "b"
    )));

    a.send(Message::binary(packet(&SpawnEntityRequest {
        token: 3,
        resource: "ball".into(),
        entity_type: EntityType::Dynamic,
        persistence: PersistenceFlags::empty(),
        attributes: ByteChunk::from_slice(&[]),
    })))
    .await
    .unwrap();
    let spawned = recv_messages(&mut b).await;
    assert!(spawned.iter().any(|m| matches!(
        m,
        ServerMessage::Spawn(cmd) if cmd.token == 3 && cmd.owner == Some(ClientId(1))
    )));
}

#[tokio::test]
async fn test_unknown_room_context_is_rejected() {
    let (server, room) = start_server().await;
    let addr = server.ws_addr().unwrap();
    spawn_server(server);

    let mut ws = connect(addr).await;
    let unknown = room.0 + 100;
    ws.send(Message::binary(unknown.to_ne_bytes().to_vec())).await.unwrap();
    assert_eq!(recv_close(&mut ws).await, Some(DisconnectCode::InvalidContext));
}

#[tokio::test]
async fn test_malformed_context_is_rejected() {
    let (server, _) = start_server().await;
    let addr = server.ws_addr().unwrap();
    spawn_server(server);

    let mut ws = connect(addr).await;
    ws.send(Message::binary(vec![1, 2])).await.unwrap();
    assert_eq!(recv_close(&mut ws).await, Some(DisconnectCode::InvalidData));
}

#[tokio::test]
async fn test_truncated_packet_closes_connection() {
    let (server, room) = start_server().await;
    let addr = server.ws_addr().unwrap();
    spawn_server(server);

    let mut ws = connect(addr).await;
    ws.send(Message::binary(room.0.to_ne_bytes().to_vec())).await.unwrap();
    let mut data = register("a");
    data.truncate(data.len() - 1);
    ws.send(Message::binary(data)).await.unwrap();
    assert_eq!(recv_close(&mut ws).await, Some(DisconnectCode::InvalidData));
}

#[tokio::test]
async fn test_shutdown_closes_rooms() {
    let (server, room) = start_server().await;
    let addr = server.ws_addr().unwrap();
    let directory = server.directory().clone();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = server
            .run_until(async {
                let _ = stop_rx.await;
            })
            .await;
    });

    let mut ws = connect(addr).await;
    ws.send(Message::binary(room.0.to_ne_bytes().to_vec())).await.unwrap();
    ws.send(Message::binary(register("a"))).await.unwrap();
    recv_messages(&mut ws).await;

    stop_tx.send(()).unwrap();
    assert_eq!(recv_close(&mut ws).await, Some(DisconnectCode::ServerClosed));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(directory.is_empty());
}

// =========================================================================
// UDP
// =========================================================================

#[tokio::test]
async fn test_register_over_udp() {
    let (server, room) = start_server().await;
    let addr = server.udp_addr().unwrap();
    spawn_server(server);

    let conn = UdpConnection::connect(addr, UdpConfig::default()).await.unwrap();
    conn.send(&room.0.to_ne_bytes(), DeliveryMode::Reliable).await.unwrap();
    conn.send(&register("udp"), DeliveryMode::Reliable).await.unwrap();

    let data = tokio::time::timeout(Duration::from_secs(2), conn.recv())
        .await
        .expect("timed out")
        .unwrap()
        .expect("connection open");
    let messages = ServerMessage::decode_packet(global(), &data).unwrap();
    assert!(matches!(
        &messages[0],
        ServerMessage::Registered(s) if s.client == ClientId(1) && s.clients[0].profile.name == "udp"
    ));
}
