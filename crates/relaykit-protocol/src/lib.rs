//! Wire protocol for Relaykit.
//!
//! - **Payloads** ([`messages`]): one struct per request or command kind,
//!   serialized with the `relaykit-codec` binary format.
//! - **Codes** ([`PayloadRegistry`]): the one-byte type code in front of
//!   every payload, assigned once at startup.
//! - **Envelopes** ([`Envelope`], [`encode_batch`], [`decode_batch`]):
//!   many payloads packed into one transport packet.
//! - **Dispatch** ([`ClientMessage`], [`ServerMessage`]): typed views of a
//!   decoded envelope.
//!
//! ```text
//! Transport (packet) → decode_batch → Envelope → ClientMessage → Room
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod envelope;
mod error;
mod message;
pub mod messages;
mod payload;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use envelope::{decode_batch, encode_batch, encode_batch_into, Envelope};
pub use error::ProtocolError;
pub use message::{ClientMessage, RpcRequest, ServerMessage};
pub use payload::{
    global, install, Direction, MessageKind, Payload, PayloadRegistry, MIN_CODE, NO_PAYLOAD,
};
pub use types::{
    Authority, BehaviorId, BufferMode, ClientId, ClientInfo, ClientProfile, EntityId, EntityType,
    PersistenceFlags, RoomId, RoomInfo, RprResult, Visibility,
};

pub use relaykit_transport::{DeliveryMode, DisconnectCode};
