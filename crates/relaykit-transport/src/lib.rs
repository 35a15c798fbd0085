//! Transport abstraction layer for Relaykit.
//!
//! Provides the [`Transport`] and [`Connection`] traits that abstract over
//! the network protocols a relay can listen on. Everything above this crate
//! sees only opaque byte payloads, a [`DeliveryMode`] per send, and a
//! [`DisconnectCode`] per close.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`
//! - `udp` (default): reliable UDP with acks, resends and sequencing

mod error;
#[cfg(feature = "udp")]
mod reliable;
#[cfg(feature = "udp")]
mod udp;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "udp")]
pub use reliable::MAX_BODY as MAX_UDP_PAYLOAD;
#[cfg(feature = "udp")]
pub use udp::{UdpConfig, UdpConnection, UdpTransport};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates a process-unique id. Shared by every backend so ids from
    /// different transports never collide inside one room.
    pub fn next() -> Self {
        static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// How a payload should be delivered.
///
/// Stream transports (WebSocket) are always reliable and ordered and treat
/// every mode the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeliveryMode {
    /// Acknowledged, resent until acked, delivered once and in order.
    #[default]
    Reliable,
    /// Fire and forget. May be lost, duplicated or reordered.
    Unreliable,
    /// Fire and forget, but anything older than the newest packet already
    /// received is dropped.
    Sequenced,
}

/// Reason attached to a transport-level close.
///
/// Collaborators outside the relay only need to treat this as an opaque
/// code for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DisconnectCode {
    Normal = 0,
    ServerClosed = 1,
    InvalidContext = 2,
    InvalidData = 3,
    ConnectionRejected = 4,
    RoomFull = 5,
    InvalidPassword = 6,
    MasterLeft = 7,
    Kicked = 8,
    Timeout = 9,
}

impl DisconnectCode {
    /// WebSocket close codes 4000-4999 are reserved for applications.
    const WS_CLOSE_BASE: u16 = 4000;

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(raw: u16) -> Option<Self> {
        Some(match raw {
            0 => Self::Normal,
            1 => Self::ServerClosed,
            2 => Self::InvalidContext,
            3 => Self::InvalidData,
            4 => Self::ConnectionRejected,
            5 => Self::RoomFull,
            6 => Self::InvalidPassword,
            7 => Self::MasterLeft,
            8 => Self::Kicked,
            9 => Self::Timeout,
            _ => return None,
        })
    }

    /// The WebSocket close code carrying this reason.
    pub fn ws_close_code(self) -> u16 {
        Self::WS_CLOSE_BASE + self.as_u16()
    }

    /// Inverse of [`ws_close_code`](Self::ws_close_code).
    pub fn from_ws_close_code(code: u16) -> Option<Self> {
        code.checked_sub(Self::WS_CLOSE_BASE).and_then(Self::from_u16)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::ServerClosed => "server closed",
            Self::InvalidContext => "invalid context",
            Self::InvalidData => "invalid data",
            Self::ConnectionRejected => "connection rejected",
            Self::RoomFull => "room full",
            Self::InvalidPassword => "invalid password",
            Self::MasterLeft => "master left",
            Self::Kicked => "kicked",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for DisconnectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Waits for and accepts the next incoming connection.
    fn accept(&mut self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;

    /// Gracefully shuts down the transport, stopping new connections.
    fn shutdown(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// The address the transport is listening on.
    fn local_addr(&self) -> Result<SocketAddr, Self::Error>;
}

/// A single connection that can send and receive whole payloads.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends one payload to the remote peer.
    fn send(
        &self,
        data: &[u8],
        mode: DeliveryMode,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next payload from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is closed.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Closes the connection, telling the peer why.
    fn close(&self, code: DisconnectCode) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_next_connection_ids_are_distinct() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_disconnect_code_round_trips_through_u16() {
        for raw in 0..=9 {
            let code = DisconnectCode::from_u16(raw).unwrap();
            assert_eq!(code.as_u16(), raw);
        }
        assert_eq!(DisconnectCode::from_u16(10), None);
    }

    #[test]
    fn test_ws_close_code_mapping() {
        assert_eq!(DisconnectCode::RoomFull.ws_close_code(), 4005);
        assert_eq!(
            DisconnectCode::from_ws_close_code(4003),
            Some(DisconnectCode::InvalidData)
        );
        assert_eq!(DisconnectCode::from_ws_close_code(1000), None);
    }

    #[test]
    fn test_default_delivery_is_reliable() {
        assert_eq!(DeliveryMode::default(), DeliveryMode::Reliable);
    }
}
