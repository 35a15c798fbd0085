//! Integration tests for the WebSocket transport.
//!
//! These spin up a real listener on an OS-assigned port and talk to it
//! with a plain `tokio-tungstenite` client.

#[cfg(feature = "websocket")]
mod websocket {
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use relaykit_transport::{
        Connection, DeliveryMode, DisconnectCode, Transport, WebSocketTransport,
    };
    use tokio_tungstenite::tungstenite::Message;

    type ClientWs = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn pair() -> (relaykit_transport::WebSocketConnection, ClientWs) {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("should have addr");

        let server = tokio::spawn(async move { transport.accept().await.expect("should accept") });
        let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("client should connect");
        (server.await.expect("task should complete"), client)
    }

    #[tokio::test]
    async fn test_websocket_accept_and_send_receive() {
        let (server_conn, mut client_ws) = pair().await;
        assert!(server_conn.id().into_inner() > 0);

        server_conn
            .send(b"hello from server", DeliveryMode::Unreliable)
            .await
            .expect("send should succeed");
        let msg = client_ws.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data().as_ref(), b"hello from server");

        client_ws
            .send(Message::Binary(b"hello from client".to_vec().into()))
            .await
            .unwrap();
        let received = server_conn
            .recv()
            .await
            .expect("recv should succeed")
            .expect("should have data");
        assert_eq!(received, b"hello from client");
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_client_close() {
        let (server_conn, mut client_ws) = pair().await;
        client_ws.send(Message::Close(None)).await.unwrap();

        let result = server_conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }

    #[tokio::test]
    async fn test_send_is_not_blocked_by_pending_recv() {
        let (server_conn, mut client_ws) = pair().await;
        let server_conn = Arc::new(server_conn);

        // Park a reader on the connection; nothing will arrive for it yet.
        let reader = {
            let conn = Arc::clone(&server_conn);
            tokio::spawn(async move { conn.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(
            Duration::from_secs(1),
            server_conn.send(b"ping", DeliveryMode::Reliable),
        )
        .await
        .expect("send must not wait for recv")
        .expect("send should succeed");
        let msg = client_ws.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data().as_ref(), b"ping");

        client_ws
            .send(Message::Binary(b"pong".to_vec().into()))
            .await
            .unwrap();
        let got = reader.await.unwrap().unwrap();
        assert_eq!(got.as_deref(), Some(&b"pong"[..]));
    }

    #[tokio::test]
    async fn test_close_sends_disconnect_code() {
        let (server_conn, mut client_ws) = pair().await;
        server_conn
            .close(DisconnectCode::RoomFull)
            .await
            .expect("close should succeed");

        match client_ws.next().await {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(
                    DisconnectCode::from_ws_close_code(u16::from(frame.code)),
                    Some(DisconnectCode::RoomFull)
                );
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }
}
