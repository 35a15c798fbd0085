//! Envelopes and batches.
//!
//! ```text
//! envelope: [code: u8][len: varint][payload: len bytes]
//! empty:    [0]
//! packet:   envelope envelope envelope ...   (until the buffer ends)
//! ```

use std::sync::Arc;

use bytes::Bytes;
use relaykit_codec::{BufferPool, NetworkReader, NetworkWriter};

use crate::payload::{Payload, PayloadRegistry, NO_PAYLOAD};
use crate::{MessageKind, ProtocolError};

/// One typed payload on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub code: u8,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(code: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }

    /// The reserved no-payload envelope.
    pub fn empty() -> Self {
        Self::new(NO_PAYLOAD, Bytes::new())
    }

    /// Serializes `payload` under the code `registry` assigns to its kind.
    pub fn from_payload<P: Payload>(
        registry: &PayloadRegistry,
        payload: &P,
    ) -> Result<Self, ProtocolError> {
        let code = registry.code(P::KIND)?;
        let body = relaykit_codec::to_vec(payload)?;
        Ok(Self::new(code, body))
    }

    /// Like [`from_payload`](Self::from_payload), serializing into a
    /// scratch buffer borrowed from `pool`.
    pub fn from_payload_pooled<P: Payload>(
        registry: &PayloadRegistry,
        payload: &P,
        pool: &Arc<BufferPool>,
    ) -> Result<Self, ProtocolError> {
        let code = registry.code(P::KIND)?;
        let mut scratch = pool.acquire();
        relaykit_codec::to_writer(payload, &mut scratch)?;
        Ok(Self::new(code, Bytes::copy_from_slice(scratch.as_slice())))
    }

    pub fn is_empty(&self) -> bool {
        self.code == NO_PAYLOAD
    }

    pub fn kind(&self, registry: &PayloadRegistry) -> Option<MessageKind> {
        registry.try_get_type(self.code)
    }

    /// Bytes this envelope occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        if self.is_empty() {
            1
        } else {
            1 + relaykit_codec::varint::unsigned_len(self.payload.len() as u64) + self.payload.len()
        }
    }

    /// Appends this envelope to `writer`.
    pub fn write_to(&self, writer: &mut NetworkWriter) -> Result<(), ProtocolError> {
        writer.write_u8(self.code);
        if !self.is_empty() {
            writer.write_bytes(&self.payload)?;
        }
        Ok(())
    }

    /// Reads one envelope, copying its payload out of the reader's buffer.
    pub fn read_from(reader: &mut NetworkReader<'_>) -> Result<Self, ProtocolError> {
        let code = reader.read_u8()?;
        if code == NO_PAYLOAD {
            return Ok(Self::empty());
        }
        let chunk = reader.read_chunk()?;
        Ok(Self::new(code, Bytes::copy_from_slice(&chunk)))
    }
}

/// Concatenates envelopes into one packet.
pub fn encode_batch<'a>(
    envelopes: impl IntoIterator<Item = &'a Envelope>,
) -> Result<Vec<u8>, ProtocolError> {
    let mut writer = NetworkWriter::new();
    encode_batch_into(envelopes, &mut writer)?;
    Ok(writer.into_inner())
}

/// Appends envelopes to `writer`, which may be a pooled buffer.
pub fn encode_batch_into<'a>(
    envelopes: impl IntoIterator<Item = &'a Envelope>,
    writer: &mut NetworkWriter,
) -> Result<(), ProtocolError> {
    for envelope in envelopes {
        envelope.write_to(writer)?;
    }
    Ok(())
}

/// Splits a packet into its envelopes.
///
/// Payloads are slices of `packet` (a refcount bump, not a copy). Fails if
/// the packet ends in the middle of an envelope.
pub fn decode_batch(packet: &Bytes) -> Result<Vec<Envelope>, ProtocolError> {
    let mut reader = NetworkReader::new(packet);
    let mut envelopes = Vec::new();
    while !reader.is_empty() {
        let code = reader.read_u8()?;
        if code == NO_PAYLOAD {
            envelopes.push(Envelope::empty());
            continue;
        }
        let chunk = reader.read_chunk()?;
        let start = chunk.offset();
        envelopes.push(Envelope::new(code, packet.slice(start..start + chunk.len())));
    }
    Ok(envelopes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaykit_codec::CodecError;

    #[test]
    fn test_batch_preserves_order_and_payloads() {
        let batch = vec![
            Envelope::new(120, vec![1, 2, 3]),
            Envelope::empty(),
            Envelope::new(101, Vec::new()),
            Envelope::new(133, vec![7; 300]),
        ];
        let packet = Bytes::from(encode_batch(&batch).unwrap());
        assert_eq!(
            packet.len(),
            batch.iter().map(Envelope::encoded_len).sum::<usize>()
        );
        assert_eq!(decode_batch(&packet).unwrap(), batch);
    }

    #[test]
    fn test_empty_envelope_is_one_byte() {
        assert_eq!(encode_batch(&[Envelope::empty()]).unwrap(), vec![0]);
    }

    #[test]
    fn test_truncated_batch_is_rejected() {
        let packet = Bytes::from(encode_batch(&[Envelope::new(120, vec![1, 2, 3])]).unwrap());
        let cut = packet.slice(..packet.len() - 1);
        assert!(matches!(
            decode_batch(&cut),
            Err(ProtocolError::Codec(CodecError::LengthOverrun { .. }))
        ));
    }

    #[test]
    fn test_decoded_payload_shares_packet_memory() {
        let packet = Bytes::from(encode_batch(&[Envelope::new(120, vec![9; 16])]).unwrap());
        let decoded = decode_batch(&packet).unwrap();
        let base = packet.as_ptr() as usize;
        let payload = decoded[0].payload.as_ptr() as usize;
        assert!(payload > base && payload < base + packet.len());
    }

    #[test]
    fn test_pooled_encoding_matches_and_returns_the_buffer() {
        let registry = crate::PayloadRegistry::standard();
        let pool = BufferPool::new(4, 64);
        let payload = crate::messages::TimeSyncRequest { client_time: 77 };

        let pooled = Envelope::from_payload_pooled(&registry, &payload, &pool).unwrap();
        assert_eq!(pooled, Envelope::from_payload(&registry, &payload).unwrap());
        assert_eq!(pool.idle(), 1);

        let mut scratch = pool.acquire();
        encode_batch_into([&pooled, &pooled], &mut scratch).unwrap();
        assert_eq!(scratch.as_slice(), encode_batch([&pooled, &pooled]).unwrap());
    }

    #[test]
    fn test_read_from_consumes_one_envelope() {
        let packet = encode_batch(&[Envelope::new(110, vec![5]), Envelope::new(111, vec![6])]).unwrap();
        let mut reader = NetworkReader::new(&packet);
        assert_eq!(Envelope::read_from(&mut reader).unwrap(), Envelope::new(110, vec![5]));
        assert_eq!(reader.remaining(), 3);
    }
}
