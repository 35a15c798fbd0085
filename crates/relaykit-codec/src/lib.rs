//! Binary codec for Relaykit.
//!
//! This crate owns the byte-level format every other layer speaks:
//!
//! - **Varints** ([`varint`]): compact integers, at most 8 bytes, used for
//!   every length prefix and most integer fields.
//! - **Buffers** ([`NetworkWriter`], [`NetworkReader`], [`BufferPool`]):
//!   primitive writes/reads and pooled scratch space.
//! - **Chunks** ([`ByteChunk`], [`OwnedChunk`]): zero-copy views into a
//!   receive buffer, and the owned copy you take before keeping one.
//! - **serde format** ([`to_vec`], [`from_slice`], ...): lets message
//!   structs derive `Serialize`/`Deserialize` and travel in this format.
//! - **Resolvers** ([`ResolverRegistry`]): runtime type-to-codec table for
//!   dynamically typed values such as RPC arguments.
//!
//! ```text
//! Transport (bytes) → Codec (values) → Protocol (envelopes, messages)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod chunk;
mod de;
mod error;
mod pool;
mod reader;
mod registry;
mod ser;
pub mod varint;
mod writer;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use chunk::{ByteChunk, OwnedChunk};
pub use de::{from_reader, from_slice, Deserializer};
pub use error::CodecError;
pub use pool::{BufferPool, PooledBuffer};
pub use reader::NetworkReader;
pub use registry::{EnumRepr, NetworkEnum, Resolver, ResolverKind, ResolverRegistry};
pub use ser::{to_vec, to_writer, Serializer};
pub use writer::NetworkWriter;
