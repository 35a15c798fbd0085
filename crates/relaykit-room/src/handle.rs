//! The room's input queue and the handle that feeds it.
//!
//! Transport tasks never touch room state. They push [`RoomEvent`]s onto
//! the room's queue and return; the room drains the queue on its own tick.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use relaykit_protocol::{Envelope, RoomId, RoomInfo};
use relaykit_transport::{ConnectionId, DeliveryMode, DisconnectCode};
use tokio::sync::{mpsc, oneshot};

use crate::{Room, RoomError, RoomState};

/// What a room writes to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// One encoded batch of envelopes.
    Packet { bytes: Bytes, mode: DeliveryMode },
    /// Close the connection with this code. Nothing follows it.
    Close(DisconnectCode),
}

/// Where a room writes a connection's outbound traffic.
pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// One queued input for a room.
pub enum RoomEvent {
    /// A connection selected this room as its context.
    Connected { conn: ConnectionId, sink: OutboundSender },
    /// A decoded packet from a connection.
    Message {
        conn: ConnectionId,
        envelopes: Vec<Envelope>,
    },
    /// The transport lost the connection.
    Disconnected { conn: ConnectionId },
    /// Arbitrary work to run against the room on its tick.
    Run(Box<dyn FnOnce(&mut Room) + Send>),
    /// Disconnect everyone with `ServerClosed` and close the room.
    Shutdown,
}

impl fmt::Debug for RoomEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected { conn, .. } => f.debug_struct("Connected").field("conn", conn).finish(),
            Self::Message { conn, envelopes } => f
                .debug_struct("Message")
                .field("conn", conn)
                .field("envelopes", &envelopes.len())
                .finish(),
            Self::Disconnected { conn } => {
                f.debug_struct("Disconnected").field("conn", conn).finish()
            }
            Self::Run(_) => f.write_str("Run"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// State other threads may read without going through the queue.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) info: RwLock<RoomInfo>,
    pub(crate) state: RwLock<RoomState>,
}

/// Cheap, cloneable handle to a room.
#[derive(Clone)]
pub struct RoomHandle {
    id: RoomId,
    events: mpsc::UnboundedSender<RoomEvent>,
    shared: Arc<Shared>,
}

impl RoomHandle {
    pub(crate) fn new(
        id: RoomId,
        events: mpsc::UnboundedSender<RoomEvent>,
        shared: Arc<Shared>,
    ) -> Self {
        Self { id, events, shared }
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    /// Snapshot of the room's public description.
    pub fn info(&self) -> RoomInfo {
        self.shared.info.read().clone()
    }

    pub fn state(&self) -> RoomState {
        *self.shared.state.read()
    }

    /// Queues a new connection. Fails once the room is stopping.
    pub fn connect(&self, conn: ConnectionId, sink: OutboundSender) -> Result<(), RoomError> {
        if !self.state().accepts_connections() {
            return Err(RoomError::Closed(self.id));
        }
        self.send(RoomEvent::Connected { conn, sink })
    }

    pub fn deliver(&self, conn: ConnectionId, envelopes: Vec<Envelope>) -> Result<(), RoomError> {
        self.send(RoomEvent::Message { conn, envelopes })
    }

    pub fn disconnect(&self, conn: ConnectionId) -> Result<(), RoomError> {
        self.send(RoomEvent::Disconnected { conn })
    }

    pub fn shutdown(&self) -> Result<(), RoomError> {
        self.send(RoomEvent::Shutdown)
    }

    /// Runs `f` on the room's next tick.
    pub fn run(&self, f: impl FnOnce(&mut Room) + Send + 'static) -> Result<(), RoomError> {
        self.send(RoomEvent::Run(Box::new(f)))
    }

    /// Runs `f` on the room's next tick and waits for its result.
    pub async fn query<R, F>(&self, f: F) -> Result<R, RoomError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Room) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.run(move |room| {
            let _ = reply_tx.send(f(room));
        })?;
        reply_rx.await.map_err(|_| RoomError::Closed(self.id))
    }

    fn send(&self, event: RoomEvent) -> Result<(), RoomError> {
        self.events
            .send(event)
            .map_err(|_| RoomError::Closed(self.id))
    }
}

impl fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
