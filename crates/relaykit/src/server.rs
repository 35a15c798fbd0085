//! `RelayServer` builder and accept loops.
//!
//! This is the entry point for running a relay. It ties together all the
//! layers: transport → handler → room directory → rooms.

use std::future::Future;
use std::net::SocketAddr;

use relaykit_protocol::RoomInfo;
use relaykit_room::{RoomConfig, RoomDirectory, RpcBinds};
use relaykit_transport::{Transport, TransportError, UdpConfig, UdpTransport, WebSocketTransport};
use tokio::task::JoinSet;

use crate::handler::handle_connection;
use crate::{RelayError, ServerConfig};

/// Builder for configuring and starting a relay server.
///
/// # Example
///
/// ```rust,no_run
/// use relaykit::prelude::*;
///
/// # async fn run() -> Result<(), RelayError> {
/// let server = RelayServer::builder()
///     .websocket("0.0.0.0:7777")
///     .room(RoomConfig::default())
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
#[derive(Debug)]
pub struct RelayServerBuilder {
    ws_addr: Option<String>,
    udp_addr: Option<String>,
    udp_config: UdpConfig,
    binds: Option<RpcBinds>,
    rooms: Vec<RoomConfig>,
}

impl RelayServerBuilder {
    /// Creates a builder with no listeners and no rooms.
    pub fn new() -> Self {
        Self {
            ws_addr: None,
            udp_addr: None,
            udp_config: UdpConfig::default(),
            binds: None,
            rooms: Vec::new(),
        }
    }

    /// Takes listeners and rooms from a loaded config.
    pub fn config(mut self, config: &ServerConfig) -> Self {
        self.ws_addr = config.ws_addr.clone();
        self.udp_addr = config.udp_addr.clone();
        self.rooms.extend(config.rooms.iter().cloned());
        self
    }

    /// Listens for WebSocket clients on `addr`.
    pub fn websocket(mut self, addr: &str) -> Self {
        self.ws_addr = Some(addr.to_string());
        self
    }

    /// Listens for reliable-UDP clients on `addr`.
    pub fn udp(mut self, addr: &str) -> Self {
        self.udp_addr = Some(addr.to_string());
        self
    }

    pub fn udp_config(mut self, config: UdpConfig) -> Self {
        self.udp_config = config;
        self
    }

    /// The RPC and SyncVar binds every room validates against. Without
    /// this, rooms relay no RPCs at all.
    pub fn binds(mut self, binds: RpcBinds) -> Self {
        self.binds = Some(binds);
        self
    }

    /// Opens a room at startup.
    pub fn room(mut self, config: RoomConfig) -> Self {
        self.rooms.push(config);
        self
    }

    /// Binds the listeners and opens the configured rooms.
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn build(self) -> Result<RelayServer, RelayError> {
        if self.ws_addr.is_none() && self.udp_addr.is_none() {
            return Err(RelayError::Config("no listener configured".into()));
        }
        let websocket = match &self.ws_addr {
            Some(addr) => Some(WebSocketTransport::bind(addr).await?),
            None => None,
        };
        let udp = match &self.udp_addr {
            Some(addr) => Some(UdpTransport::bind(addr, self.udp_config).await?),
            None => None,
        };

        let directory = RoomDirectory::new(self.binds.unwrap_or_default());
        let mut rooms = Vec::with_capacity(self.rooms.len());
        for config in self.rooms {
            rooms.push(directory.create_room(config)?);
        }

        Ok(RelayServer {
            directory,
            websocket,
            udp,
            rooms,
        })
    }
}

impl Default for RelayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A relay with bound listeners and open rooms.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct RelayServer {
    directory: RoomDirectory,
    websocket: Option<WebSocketTransport>,
    udp: Option<UdpTransport>,
    rooms: Vec<RoomInfo>,
}

impl RelayServer {
    /// Creates a new builder.
    pub fn builder() -> RelayServerBuilder {
        RelayServerBuilder::new()
    }

    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    /// The rooms opened at startup.
    pub fn rooms(&self) -> &[RoomInfo] {
        &self.rooms
    }

    pub fn ws_addr(&self) -> Option<SocketAddr> {
        self.websocket.as_ref()?.local_addr().ok()
    }

    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp.as_ref()?.local_addr().ok()
    }

    /// Runs the accept loops until the process is terminated.
    pub async fn run(self) -> Result<(), RelayError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loops until `signal` resolves, then closes every
    /// room with `ServerClosed`.
    pub async fn run_until(self, signal: impl Future<Output = ()>) -> Result<(), RelayError> {
        let mut listeners = JoinSet::new();
        if let Some(websocket) = self.websocket {
            listeners.spawn(accept_loop(websocket, self.directory.clone(), "websocket"));
        }
        if let Some(udp) = self.udp {
            listeners.spawn(accept_loop(udp, self.directory.clone(), "udp"));
        }
        tracing::info!(rooms = self.rooms.len(), "relay server running");

        tokio::select! {
            _ = signal => tracing::info!("shutdown requested"),
            _ = async { while listeners.join_next().await.is_some() {} } => {
                tracing::warn!("all listeners stopped");
            }
        }

        listeners.shutdown().await;
        self.directory.shutdown_all();
        Ok(())
    }
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("ws_addr", &self.ws_addr())
            .field("udp_addr", &self.udp_addr())
            .field("rooms", &self.rooms.len())
            .finish()
    }
}

/// Accepts connections from one backend and spawns a handler for each.
async fn accept_loop<T>(mut transport: T, directory: RoomDirectory, backend: &'static str)
where
    T: Transport<Error = TransportError>,
{
    loop {
        match transport.accept().await {
            Ok(conn) => {
                tokio::spawn(handle_connection(conn, directory.clone()));
            }
            Err(TransportError::Shutdown) => {
                tracing::info!(backend, "listener shut down");
                return;
            }
            Err(e) => {
                tracing::error!(backend, error = %e, "accept failed");
            }
        }
    }
}
