//! Rooms for Relaykit.
//!
//! Each room is a single-threaded state machine over its clients, entities
//! and message buffer. Transport tasks feed it through a [`RoomHandle`];
//! the room applies queued events on its tick and writes batched replies
//! to per-connection sinks.
//!
//! # Key types
//!
//! - [`Room`]: the state machine, driven by [`Room::tick`]
//! - [`RoomHandle`]: queue events into a running room
//! - [`RoomDirectory`]: creates rooms and answers lobby queries
//! - [`RpcBinds`]: which methods and SyncVars may be called, by whom
//! - [`RoomConfig`] / [`RoomState`]: settings and lifecycle

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod binds;
mod buffer;
mod client;
mod config;
mod directory;
mod entity;
mod error;
mod handle;
mod id_pool;
mod room;
mod rpc;
mod runner;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use binds::{Args, MethodBind, Param, RpcBinds, RpcBindsBuilder, RpcHandler, ServerCall, SyncVarBind};
pub use buffer::{BufferKey, MessageBuffer};
pub use client::Client;
pub use config::{MigrationPolicy, RoomConfig, RoomState};
pub use directory::RoomDirectory;
pub use entity::Entity;
pub use error::{BindError, HandlerError, RoomError};
pub use handle::{Outbound, OutboundSender, RoomEvent, RoomHandle};
pub use id_pool::IdPool;
pub use room::{Room, MAX_PACKET, MAX_REQUEST};
pub use runner::{run_room, spawn_room};
