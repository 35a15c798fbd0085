use crate::DisconnectCode;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The peer closed the connection with a reason code.
    #[error("disconnected by peer: {0}")]
    Disconnected(DisconnectCode),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// A payload does not fit in one datagram.
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    /// The remote side never answered the connection request.
    #[error("connect to {0} timed out")]
    ConnectTimeout(std::net::SocketAddr),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
