//! Integration tests for the reliable UDP transport over loopback.

#[cfg(feature = "udp")]
mod udp {
    use std::time::Duration;

    use relaykit_transport::{
        Connection, DeliveryMode, DisconnectCode, Transport, TransportError, UdpConfig,
        UdpConnection, UdpTransport,
    };

    fn fast_config() -> UdpConfig {
        UdpConfig {
            resend_interval: Duration::from_millis(30),
            heartbeat_interval: Duration::from_millis(100),
            idle_timeout: Duration::from_millis(600),
            poll_interval: Duration::from_millis(10),
            ..UdpConfig::default()
        }
    }

    async fn pair(config: UdpConfig) -> (UdpTransport, UdpConnection, UdpConnection) {
        let mut transport = UdpTransport::bind("127.0.0.1:0", config)
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("should have addr");

        let client = UdpConnection::connect(addr, config)
            .await
            .expect("should connect");
        let server = tokio::time::timeout(Duration::from_secs(2), transport.accept())
            .await
            .expect("accept should not hang")
            .expect("should accept");
        (transport, server, client)
    }

    async fn recv(conn: &UdpConnection) -> Option<Vec<u8>> {
        tokio::time::timeout(Duration::from_secs(2), conn.recv())
            .await
            .expect("recv should not hang")
            .expect("recv should succeed")
    }

    #[tokio::test]
    async fn test_reliable_messages_arrive_in_order() {
        let (_transport, server, client) = pair(fast_config()).await;

        for i in 0u32..50 {
            client
                .send(&i.to_le_bytes(), DeliveryMode::Reliable)
                .await
                .unwrap();
        }
        for i in 0u32..50 {
            assert_eq!(recv(&server).await, Some(i.to_le_bytes().to_vec()));
        }

        server.send(b"back", DeliveryMode::Reliable).await.unwrap();
        assert_eq!(recv(&client).await.as_deref(), Some(&b"back"[..]));
    }

    #[tokio::test]
    async fn test_unreliable_and_sequenced_deliver_on_loopback() {
        let (_transport, server, client) = pair(fast_config()).await;
        client.send(b"u", DeliveryMode::Unreliable).await.unwrap();
        assert_eq!(recv(&server).await.as_deref(), Some(&b"u"[..]));
        client.send(b"s", DeliveryMode::Sequenced).await.unwrap();
        assert_eq!(recv(&server).await.as_deref(), Some(&b"s"[..]));
    }

    #[tokio::test]
    async fn test_close_reaches_the_peer() {
        let (_transport, server, client) = pair(fast_config()).await;
        server.close(DisconnectCode::Kicked).await.unwrap();
        assert_eq!(recv(&client).await, None);
        assert!(matches!(
            client.send(b"late", DeliveryMode::Reliable).await,
            Err(TransportError::ConnectionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let config = fast_config();
        let (_transport, server, client) = pair(config).await;
        // Dropping the client stops its heartbeats without a goodbye packet.
        drop(client);
        let ended = tokio::time::timeout(Duration::from_secs(3), server.recv())
            .await
            .expect("server should notice the silence");
        assert_eq!(ended.unwrap(), None);
    }

    #[tokio::test]
    async fn test_connect_to_nothing_times_out() {
        // Bind and drop to find a port with no listener.
        let addr = {
            let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            socket.local_addr().unwrap()
        };
        let config = UdpConfig {
            connect_timeout: Duration::from_millis(150),
            ..fast_config()
        };
        assert!(matches!(
            UdpConnection::connect(addr, config).await,
            Err(TransportError::ConnectTimeout(_) | TransportError::ReceiveFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_large_payload_is_rejected() {
        let (_transport, _server, client) = pair(fast_config()).await;
        let big = vec![0u8; 70_000];
        assert!(matches!(
            client.send(&big, DeliveryMode::Reliable).await,
            Err(TransportError::PayloadTooLarge { .. })
        ));
    }
}
