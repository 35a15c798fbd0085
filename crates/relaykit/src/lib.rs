//! # Relaykit
//!
//! Room-based real-time relay for multiplayer games.
//!
//! Clients connect over WebSocket or reliable UDP, name a room with a
//! 4-byte context id, and from then on exchange batched envelopes with
//! that room. The room assigns client and entity ids, elects a master,
//! enforces authority on every request and relays RPCs, query replies and
//! SyncVar updates between clients.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relaykit::prelude::*;
//!
//! # async fn run() -> Result<(), RelayError> {
//! let binds = RpcBinds::builder(ResolverRegistry::with_primitives())
//!     .rpc(BehaviorId(1), "Jump", Authority::OWNER, &[Param::of::<f32>()])?
//!     .build();
//! let server = RelayServer::builder()
//!     .websocket("0.0.0.0:7777")
//!     .binds(binds)
//!     .room(RoomConfig::default())
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod config;
mod error;
mod handler;
mod logging;
mod server;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use config::ServerConfig;
pub use error::RelayError;
pub use logging::init_tracing;
pub use server::{RelayServer, RelayServerBuilder};

pub use relaykit_codec as codec;
pub use relaykit_protocol as protocol;
pub use relaykit_room as room;
pub use relaykit_tick as tick;
pub use relaykit_transport as transport;

/// Everything needed to configure and run a relay.
pub mod prelude {
    pub use crate::{init_tracing, RelayError, RelayServer, RelayServerBuilder, ServerConfig};

    pub use relaykit_codec::{OwnedChunk, ResolverRegistry};
    pub use relaykit_protocol::{
        Authority, BehaviorId, BufferMode, ClientId, EntityId, EntityType, PersistenceFlags,
        RoomId, RoomInfo, RprResult, Visibility,
    };
    pub use relaykit_room::{
        HandlerError, MigrationPolicy, Param, RoomConfig, RoomDirectory, RoomHandle, RoomState,
        RpcBinds, ServerCall,
    };
    pub use relaykit_tick::{TickConfig, TickPolicy};
    pub use relaykit_transport::{DisconnectCode, UdpConfig};
}
