//! Per-connection handler: room context selection and packet pumping.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive the 4-byte room context id → attach to that room
//!   2. Spawn a writer draining the room's outbound queue
//!   3. Loop: receive packets → split into envelopes → queue on the room

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use relaykit_protocol::{decode_batch, RoomId};
use relaykit_room::{Outbound, RoomDirectory, RoomHandle};
use relaykit_transport::{Connection, DisconnectCode};
use tokio::sync::mpsc;

/// How long a fresh connection may take to name its room.
const CONTEXT_TIMEOUT: Duration = Duration::from_secs(10);

/// Reads the room context id a connection opens with.
pub(crate) fn parse_context(data: &[u8]) -> Option<RoomId> {
    let raw: [u8; 4] = data.try_into().ok()?;
    Some(RoomId(u32::from_ne_bytes(raw)))
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C: Connection>(conn: C, directory: RoomDirectory) {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    let Some(handle) = select_room(conn.as_ref(), &directory).await else {
        return;
    };
    let room = handle.id();

    let (tx, rx) = mpsc::unbounded_channel();
    if let Err(e) = handle.connect(conn_id, tx) {
        tracing::debug!(%conn_id, %room, error = %e, "room refused connection");
        let _ = conn.close(DisconnectCode::ConnectionRejected).await;
        return;
    }
    tracing::debug!(%conn_id, %room, "connection attached");
    let writer = tokio::spawn(write_loop(Arc::clone(&conn), rx));

    loop {
        let data = match conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::debug!(%conn_id, %room, "connection closed");
                break;
            }
            Err(e) => {
                tracing::debug!(%conn_id, %room, error = %e, "recv error");
                break;
            }
        };

        let packet = Bytes::from(data);
        match decode_batch(&packet) {
            Ok(envelopes) => {
                if handle.deliver(conn_id, envelopes).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(%conn_id, %room, error = %e, "malformed packet");
                let _ = conn.close(DisconnectCode::InvalidData).await;
                break;
            }
        }
    }

    // The room drops its sink once it has processed the disconnect, which
    // ends the writer.
    let _ = handle.disconnect(conn_id);
    let _ = writer.await;
}

/// Waits for the context id and resolves it to a room, closing the
/// connection with the matching code on failure.
async fn select_room<C: Connection>(conn: &C, directory: &RoomDirectory) -> Option<RoomHandle> {
    let conn_id = conn.id();
    let data = match tokio::time::timeout(CONTEXT_TIMEOUT, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => return None,
        Ok(Err(e)) => {
            tracing::debug!(%conn_id, error = %e, "recv error before context");
            return None;
        }
        Err(_) => {
            tracing::debug!(%conn_id, "no context received");
            let _ = conn.close(DisconnectCode::Timeout).await;
            return None;
        }
    };

    let code = match parse_context(&data) {
        None => DisconnectCode::InvalidData,
        Some(room) => match directory.get(room) {
            Some(handle) => return Some(handle),
            None => DisconnectCode::InvalidContext,
        },
    };
    tracing::debug!(%conn_id, len = data.len(), %code, "context rejected");
    let _ = conn.close(code).await;
    None
}

/// Writes whatever the room queues for this connection until the room
/// closes it or lets go of it.
async fn write_loop<C: Connection>(conn: Arc<C>, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    let conn_id = conn.id();
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Packet { bytes, mode } => {
                if let Err(e) = conn.send(&bytes, mode).await {
                    tracing::debug!(%conn_id, error = %e, "send failed");
                    break;
                }
            }
            Outbound::Close(code) => {
                tracing::debug!(%conn_id, %code, "closing connection");
                let _ = conn.close(code).await;
                return;
            }
        }
    }
    let _ = conn.close(DisconnectCode::ServerClosed).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_is_four_native_endian_bytes() {
        let raw = 258u32.to_ne_bytes();
        assert_eq!(parse_context(&raw), Some(RoomId(258)));
        assert_eq!(parse_context(&raw[..3]), None);
        assert_eq!(parse_context(&[0; 5]), None);
    }
}
