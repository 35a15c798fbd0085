//! Reliable UDP transport.
//!
//! One socket serves every peer; datagrams are demultiplexed by source
//! address. A peer becomes a connection after a `Connect`/`Accept`
//! exchange, and from then on each peer gets a maintenance task that
//! resends unacked reliable packets, sends heartbeats when idle and drops
//! the peer after [`UdpConfig::idle_timeout`] of silence.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::reliable::{self, Channel, PacketKind, Timing, MAX_BODY, MAX_DATAGRAM};
use crate::{Connection, ConnectionId, DeliveryMode, DisconnectCode, Transport, TransportError};

type PeerTable = Arc<Mutex<HashMap<SocketAddr, Arc<Peer>>>>;

/// Tuning for the UDP transport.
#[derive(Debug, Clone, Copy)]
pub struct UdpConfig {
    /// How long a reliable packet waits for its ack before being resent.
    pub resend_interval: Duration,
    /// Resends of a single packet before the peer is declared lost.
    pub max_resends: u32,
    /// A heartbeat is sent after this long without any outgoing traffic.
    pub heartbeat_interval: Duration,
    /// The peer is dropped after this long without hearing from it.
    pub idle_timeout: Duration,
    /// How long [`UdpConnection::connect`] keeps retrying.
    pub connect_timeout: Duration,
    /// Granularity of the per-peer maintenance loop.
    pub poll_interval: Duration,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            resend_interval: Duration::from_millis(200),
            max_resends: 15,
            heartbeat_interval: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl UdpConfig {
    fn timing(&self) -> Timing {
        Timing {
            resend_interval: self.resend_interval,
            max_resends: self.max_resends,
            heartbeat_interval: self.heartbeat_interval,
            idle_timeout: self.idle_timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

/// State shared between a connection handle, the socket reader and the
/// maintenance task.
struct Peer {
    id: ConnectionId,
    addr: SocketAddr,
    socket: Arc<UdpSocket>,
    channel: Mutex<Channel>,
    inbox: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    closed: AtomicBool,
}

impl Peer {
    fn new(addr: SocketAddr, socket: Arc<UdpSocket>) -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Arc::new(Self {
            id: ConnectionId::next(),
            addr,
            socket,
            channel: Mutex::new(Channel::new(Instant::now())),
            inbox: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
        });
        (peer, rx)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the peer closed and ends its inbox. Idempotent.
    fn close_local(&self, code: DisconnectCode) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.inbox.lock().take();
            tracing::debug!(id = %self.id, addr = %self.addr, %code, "UDP peer closed");
        }
    }

    fn on_datagram(&self, kind: PacketKind, seq: u32, body: &[u8]) {
        let incoming = self
            .channel
            .lock()
            .incoming(kind, seq, body, Instant::now());

        if let Some(reply) = incoming.reply {
            // A dropped ack just means the sender resends.
            let _ = self.socket.try_send_to(&reply, self.addr);
        }
        if !incoming.deliver.is_empty() {
            if let Some(tx) = self.inbox.lock().as_ref() {
                for payload in incoming.deliver {
                    let _ = tx.send(payload);
                }
            }
        }
        if let Some(code) = incoming.disconnected {
            self.close_local(code);
        }
    }

    async fn send(&self, data: &[u8], mode: DeliveryMode) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed(self.id.to_string()));
        }
        if data.len() > MAX_BODY {
            return Err(TransportError::PayloadTooLarge {
                len: data.len(),
                max: MAX_BODY,
            });
        }
        let datagram = self.channel.lock().outgoing(mode, data, Instant::now());
        self.socket
            .send_to(&datagram, self.addr)
            .await
            .map(drop)
            .map_err(TransportError::SendFailed)
    }
}

/// Resends, heartbeats and timeout detection for one peer.
async fn maintain(peer: Arc<Peer>, config: UdpConfig, table: Option<PeerTable>) {
    let timing = config.timing();
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !peer.is_closed() {
        ticker.tick().await;
        let work = peer.channel.lock().poll(Instant::now(), &timing);
        if work.timed_out {
            tracing::info!(id = %peer.id, addr = %peer.addr, "UDP peer timed out");
            let _ = peer
                .socket
                .send_to(&reliable::disconnect_packet(DisconnectCode::Timeout), peer.addr)
                .await;
            peer.close_local(DisconnectCode::Timeout);
            break;
        }
        for datagram in work.resend.iter().chain(work.heartbeat.iter()) {
            if let Err(e) = peer.socket.send_to(datagram, peer.addr).await {
                tracing::debug!(id = %peer.id, error = %e, "UDP resend failed");
            }
        }
    }

    if let Some(table) = table {
        let mut table = table.lock();
        if table.get(&peer.addr).is_some_and(|p| Arc::ptr_eq(p, &peer)) {
            table.remove(&peer.addr);
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// A UDP-based [`Transport`] that listens for incoming peers.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    peers: PeerTable,
    incoming: mpsc::UnboundedReceiver<UdpConnection>,
    reader: JoinHandle<()>,
}

impl UdpTransport {
    /// Binds a UDP transport to the given address.
    pub async fn bind(addr: &str, config: UdpConfig) -> Result<Self, TransportError> {
        let socket = Arc::new(
            UdpSocket::bind(addr)
                .await
                .map_err(TransportError::AcceptFailed)?,
        );
        tracing::info!(addr, "UDP transport listening");

        let peers: PeerTable = Arc::default();
        let (tx, incoming) = mpsc::unbounded_channel();
        let reader = tokio::spawn(serve(Arc::clone(&socket), Arc::clone(&peers), tx, config));
        Ok(Self {
            socket,
            peers,
            incoming,
            reader,
        })
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl Transport for UdpTransport {
    type Connection = UdpConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        self.incoming.recv().await.ok_or(TransportError::Shutdown)
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        self.reader.abort();
        let peers: Vec<Arc<Peer>> = self.peers.lock().drain().map(|(_, p)| p).collect();
        let goodbye = reliable::disconnect_packet(DisconnectCode::ServerClosed);
        for peer in peers {
            let _ = self.socket.send_to(&goodbye, peer.addr).await;
            peer.close_local(DisconnectCode::ServerClosed);
        }
        Ok(())
    }

    fn local_addr(&self) -> Result<SocketAddr, Self::Error> {
        self.socket
            .local_addr()
            .map_err(TransportError::AcceptFailed)
    }
}

/// Server-side socket reader: demultiplexes datagrams to peers and turns
/// `Connect` packets from new addresses into connections.
async fn serve(
    socket: Arc<UdpSocket>,
    peers: PeerTable,
    accepted: mpsc::UnboundedSender<UdpConnection>,
    config: UdpConfig,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let accept_packet = reliable::encode(PacketKind::Accept, 0, &[]);

    loop {
        let (len, addr) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "UDP recv failed");
                continue;
            }
        };
        let Some((kind, seq, body)) = reliable::decode(&buf[..len]) else {
            tracing::trace!(%addr, len, "dropping malformed datagram");
            continue;
        };

        let known = peers.lock().get(&addr).cloned();
        match known {
            Some(peer) if !peer.is_closed() => {
                if kind == PacketKind::Connect {
                    // The peer missed our Accept.
                    let _ = socket.try_send_to(&accept_packet, addr);
                }
                peer.on_datagram(kind, seq, body);
            }
            _ if kind == PacketKind::Connect => {
                let (peer, inbox) = Peer::new(addr, Arc::clone(&socket));
                peers.lock().insert(addr, Arc::clone(&peer));
                let _ = socket.try_send_to(&accept_packet, addr);
                tracing::debug!(id = %peer.id, %addr, "accepted UDP peer");

                // Not owned by the connection: the task must outlive it to
                // unregister the peer once it closes.
                tokio::spawn(maintain(Arc::clone(&peer), config, Some(Arc::clone(&peers))));
                let conn = UdpConnection::from_parts(peer, inbox, Vec::new());
                if accepted.send(conn).is_err() {
                    break;
                }
            }
            _ if kind != PacketKind::Disconnect => {
                let rejection = reliable::disconnect_packet(DisconnectCode::ConnectionRejected);
                let _ = socket.try_send_to(&rejection, addr);
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A single reliable-UDP connection, either accepted by a
/// [`UdpTransport`] or opened with [`UdpConnection::connect`].
pub struct UdpConnection {
    peer: Arc<Peer>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl UdpConnection {
    fn from_parts(
        peer: Arc<Peer>,
        inbox: mpsc::UnboundedReceiver<Vec<u8>>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            peer,
            inbox: tokio::sync::Mutex::new(inbox),
            tasks,
        }
    }

    /// Opens a connection to a [`UdpTransport`] at `server`.
    pub async fn connect(server: SocketAddr, config: UdpConfig) -> Result<Self, TransportError> {
        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = Arc::new(
            UdpSocket::bind(local)
                .await
                .map_err(TransportError::AcceptFailed)?,
        );

        let hello = reliable::encode(PacketKind::Connect, 0, &[]);
        let deadline = Instant::now() + config.connect_timeout;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        'handshake: loop {
            if Instant::now() >= deadline {
                return Err(TransportError::ConnectTimeout(server));
            }
            socket
                .send_to(&hello, server)
                .await
                .map_err(TransportError::SendFailed)?;

            let wait = tokio::time::timeout(config.resend_interval, socket.recv_from(&mut buf)).await;
            let Ok(received) = wait else { continue };
            let (len, from) = received.map_err(TransportError::ReceiveFailed)?;
            if from != server {
                continue;
            }
            match reliable::decode(&buf[..len]) {
                Some((PacketKind::Accept, _, _)) => break 'handshake,
                Some((PacketKind::Disconnect, _, body)) => {
                    return Err(TransportError::Disconnected(reliable::disconnect_code(body)));
                }
                _ => {}
            }
        }

        let (peer, inbox) = Peer::new(server, Arc::clone(&socket));
        tracing::debug!(id = %peer.id, %server, "connected UDP peer");
        let reader = tokio::spawn(read_from_server(Arc::clone(&peer)));
        let upkeep = tokio::spawn(maintain(Arc::clone(&peer), config, None));
        Ok(Self::from_parts(peer, inbox, vec![reader, upkeep]))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer.addr
    }
}

/// Client-side socket reader.
async fn read_from_server(peer: Arc<Peer>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while !peer.is_closed() {
        let (len, from) = match peer.socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(id = %peer.id, error = %e, "UDP recv failed");
                continue;
            }
        };
        if from != peer.addr {
            continue;
        }
        if let Some((kind, seq, body)) = reliable::decode(&buf[..len]) {
            peer.on_datagram(kind, seq, body);
        }
    }
}

impl Drop for UdpConnection {
    fn drop(&mut self) {
        self.peer.close_local(DisconnectCode::Normal);
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Connection for UdpConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8], mode: DeliveryMode) -> Result<(), Self::Error> {
        self.peer.send(data, mode).await
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.inbox.lock().await.recv().await)
    }

    async fn close(&self, code: DisconnectCode) -> Result<(), Self::Error> {
        if self.peer.is_closed() {
            return Ok(());
        }
        let goodbye = reliable::disconnect_packet(code);
        let sent = self.peer.socket.send_to(&goodbye, self.peer.addr).await;
        self.peer.close_local(code);
        sent.map(drop).map_err(TransportError::SendFailed)
    }

    fn id(&self) -> ConnectionId {
        self.peer.id
    }
}
