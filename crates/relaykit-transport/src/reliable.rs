//! Packet framing and the per-peer reliability state machine.
//!
//! This is the IO-free half of the UDP transport: it turns payloads into
//! datagrams and datagrams back into payloads, tracking acks, resends,
//! duplicates and ordering. The socket side lives in `udp.rs`.
//!
//! ```text
//! datagram: [kind: u8][seq: u32 LE][body...]
//! ```

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::{DeliveryMode, DisconnectCode};

pub(crate) const HEADER_LEN: usize = 5;

/// Largest UDP payload over IPv4.
pub(crate) const MAX_DATAGRAM: usize = 65_507;

/// Largest payload one datagram carries.
pub const MAX_BODY: usize = MAX_DATAGRAM - HEADER_LEN;

/// Reliable packets further ahead of the next expected sequence than this
/// are dropped unacked; the sender will resend them later.
const REORDER_WINDOW: u32 = 1024;

/// Out-of-order bytes held per peer. A packet that would push past this is
/// dropped unacked, like one outside the window.
const MAX_REORDER_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum PacketKind {
    Connect = 0,
    Accept = 1,
    Reliable = 2,
    Unreliable = 3,
    Sequenced = 4,
    Ack = 5,
    Disconnect = 6,
    Heartbeat = 7,
}

impl PacketKind {
    fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::Connect,
            1 => Self::Accept,
            2 => Self::Reliable,
            3 => Self::Unreliable,
            4 => Self::Sequenced,
            5 => Self::Ack,
            6 => Self::Disconnect,
            7 => Self::Heartbeat,
            _ => return None,
        })
    }
}

/// Builds one datagram.
pub(crate) fn encode(kind: PacketKind, seq: u32, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.push(kind as u8);
    out.extend_from_slice(&seq.to_le_bytes());
    out.extend_from_slice(body);
    out
}

/// Splits a datagram into kind, sequence and body.
pub(crate) fn decode(datagram: &[u8]) -> Option<(PacketKind, u32, &[u8])> {
    if datagram.len() < HEADER_LEN {
        return None;
    }
    let kind = PacketKind::from_u8(datagram[0])?;
    let seq = u32::from_le_bytes([datagram[1], datagram[2], datagram[3], datagram[4]]);
    Some((kind, seq, &datagram[HEADER_LEN..]))
}

pub(crate) fn disconnect_packet(code: DisconnectCode) -> Vec<u8> {
    encode(PacketKind::Disconnect, 0, &code.as_u16().to_le_bytes())
}

pub(crate) fn disconnect_code(body: &[u8]) -> DisconnectCode {
    match body {
        [lo, hi, ..] => {
            DisconnectCode::from_u16(u16::from_le_bytes([*lo, *hi])).unwrap_or(DisconnectCode::Normal)
        }
        _ => DisconnectCode::Normal,
    }
}

/// Timing knobs for [`Channel::poll`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timing {
    pub resend_interval: Duration,
    pub max_resends: u32,
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
}

/// What an incoming datagram produced.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Incoming {
    /// Payloads ready for the application, in delivery order.
    pub deliver: Vec<Vec<u8>>,
    /// Ack datagram to send back, if any.
    pub reply: Option<Vec<u8>>,
    /// The peer said goodbye.
    pub disconnected: Option<DisconnectCode>,
}

/// What a periodic [`Channel::poll`] asks the socket to do.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Maintenance {
    pub resend: Vec<Vec<u8>>,
    pub heartbeat: Option<Vec<u8>>,
    pub timed_out: bool,
}

#[derive(Debug)]
struct InFlight {
    datagram: Vec<u8>,
    last_sent: Instant,
    resends: u32,
}

/// Sequencing, ack and reorder state for one peer.
#[derive(Debug)]
pub(crate) struct Channel {
    next_reliable: u32,
    next_sequenced: u32,
    in_flight: BTreeMap<u32, InFlight>,

    expected: u32,
    reorder: BTreeMap<u32, Vec<u8>>,
    reorder_bytes: usize,
    newest_sequenced: Option<u32>,

    last_heard: Instant,
    last_sent: Instant,
}

impl Channel {
    pub fn new(now: Instant) -> Self {
        Self {
            next_reliable: 0,
            next_sequenced: 0,
            in_flight: BTreeMap::new(),
            expected: 0,
            reorder: BTreeMap::new(),
            reorder_bytes: 0,
            newest_sequenced: None,
            last_heard: now,
            last_sent: now,
        }
    }

    /// Frames `body` for sending. Reliable datagrams are remembered until
    /// acked.
    pub fn outgoing(&mut self, mode: DeliveryMode, body: &[u8], now: Instant) -> Vec<u8> {
        self.last_sent = now;
        match mode {
            DeliveryMode::Reliable => {
                let seq = self.next_reliable;
                self.next_reliable = seq.wrapping_add(1);
                let datagram = encode(PacketKind::Reliable, seq, body);
                self.in_flight.insert(
                    seq,
                    InFlight {
                        datagram: datagram.clone(),
                        last_sent: now,
                        resends: 0,
                    },
                );
                datagram
            }
            DeliveryMode::Unreliable => encode(PacketKind::Unreliable, 0, body),
            DeliveryMode::Sequenced => {
                let seq = self.next_sequenced;
                self.next_sequenced = seq.wrapping_add(1);
                encode(PacketKind::Sequenced, seq, body)
            }
        }
    }

    /// Processes one datagram from the peer.
    pub fn incoming(&mut self, kind: PacketKind, seq: u32, body: &[u8], now: Instant) -> Incoming {
        self.last_heard = now;
        let mut out = Incoming::default();
        match kind {
            PacketKind::Reliable => {
                // Everything at or below `expected` gets acked, including
                // duplicates whose first ack was lost.
                let ahead = seq.wrapping_sub(self.expected);
                if ahead >= REORDER_WINDOW && ahead < u32::MAX / 2 {
                    return out;
                }
                if ahead > 0 && ahead < REORDER_WINDOW && !self.reorder.contains_key(&seq) {
                    if self.reorder_bytes + body.len() > MAX_REORDER_BYTES {
                        return out;
                    }
                    self.reorder_bytes += body.len();
                    self.reorder.insert(seq, body.to_vec());
                }
                out.reply = Some(encode(PacketKind::Ack, seq, &[]));
                if ahead == 0 {
                    out.deliver.push(body.to_vec());
                    self.expected = self.expected.wrapping_add(1);
                    while let Some(payload) = self.reorder.remove(&self.expected) {
                        self.reorder_bytes -= payload.len();
                        out.deliver.push(payload);
                        self.expected = self.expected.wrapping_add(1);
                    }
                }
            }
            PacketKind::Unreliable => out.deliver.push(body.to_vec()),
            PacketKind::Sequenced => {
                let fresh = self
                    .newest_sequenced
                    .is_none_or(|newest| seq.wrapping_sub(newest).wrapping_sub(1) < u32::MAX / 2);
                if fresh {
                    self.newest_sequenced = Some(seq);
                    out.deliver.push(body.to_vec());
                }
            }
            PacketKind::Ack => {
                self.in_flight.remove(&seq);
            }
            PacketKind::Disconnect => out.disconnected = Some(disconnect_code(body)),
            // Connect/Accept retries and keepalives only refresh `last_heard`.
            PacketKind::Connect | PacketKind::Accept | PacketKind::Heartbeat => {}
        }
        out
    }

    /// Collects resends and keepalives that are due.
    pub fn poll(&mut self, now: Instant, timing: &Timing) -> Maintenance {
        let mut out = Maintenance::default();
        if now.duration_since(self.last_heard) >= timing.idle_timeout {
            out.timed_out = true;
            return out;
        }
        for flight in self.in_flight.values_mut() {
            if now.duration_since(flight.last_sent) < timing.resend_interval {
                continue;
            }
            if flight.resends >= timing.max_resends {
                out.timed_out = true;
                return out;
            }
            flight.resends += 1;
            flight.last_sent = now;
            out.resend.push(flight.datagram.clone());
        }
        if !out.resend.is_empty() {
            self.last_sent = now;
        } else if now.duration_since(self.last_sent) >= timing.heartbeat_interval {
            self.last_sent = now;
            out.heartbeat = Some(encode(PacketKind::Heartbeat, 0, &[]));
        }
        out
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Bytes held waiting for an earlier reliable packet.
    pub fn reorder_bytes(&self) -> usize {
        self.reorder_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMING: Timing = Timing {
        resend_interval: Duration::from_millis(100),
        max_resends: 3,
        heartbeat_interval: Duration::from_secs(1),
        idle_timeout: Duration::from_secs(5),
    };

    fn feed(rx: &mut Channel, datagram: &[u8], now: Instant) -> Incoming {
        let (kind, seq, body) = decode(datagram).unwrap();
        rx.incoming(kind, seq, body, now)
    }

    #[test]
    fn test_header_round_trip() {
        let d = encode(PacketKind::Sequenced, 0x0102_0304, b"xy");
        assert_eq!(d, vec![4, 4, 3, 2, 1, b'x', b'y']);
        assert_eq!(decode(&d), Some((PacketKind::Sequenced, 0x0102_0304, &b"xy"[..])));
        assert_eq!(decode(&[2, 0, 0]), None);
        assert_eq!(decode(&[99, 0, 0, 0, 0]), None);
    }

    #[test]
    fn test_reliable_reordered_packets_are_delivered_in_order() {
        let now = Instant::now();
        let mut tx = Channel::new(now);
        let mut rx = Channel::new(now);
        let a = tx.outgoing(DeliveryMode::Reliable, b"a", now);
        let b = tx.outgoing(DeliveryMode::Reliable, b"b", now);
        let c = tx.outgoing(DeliveryMode::Reliable, b"c", now);

        assert!(feed(&mut rx, &c, now).deliver.is_empty());
        assert!(feed(&mut rx, &b, now).deliver.is_empty());
        let got = feed(&mut rx, &a, now);
        assert_eq!(got.deliver, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_reorder_buffer_is_capped_in_bytes() {
        let now = Instant::now();
        let mut tx = Channel::new(now);
        let mut rx = Channel::new(now);
        let body = vec![7u8; MAX_BODY];
        let first = tx.outgoing(DeliveryMode::Reliable, b"first", now);

        // Everything after `first` arrives early; only what fits is kept.
        let mut acked = 0;
        let mut refused = Vec::new();
        for _ in 0..32 {
            let d = tx.outgoing(DeliveryMode::Reliable, &body, now);
            if feed(&mut rx, &d, now).reply.is_some() {
                acked += 1;
            } else {
                refused.push(d);
            }
        }
        assert_eq!(acked, MAX_REORDER_BYTES / MAX_BODY);
        assert!(rx.reorder_bytes() <= MAX_REORDER_BYTES);
        assert!(!refused.is_empty());

        // The gap fills, the buffer drains and a resend is accepted again.
        let got = feed(&mut rx, &first, now);
        assert_eq!(got.deliver.len(), 1 + acked);
        assert_eq!(rx.reorder_bytes(), 0);
        assert_eq!(feed(&mut rx, &refused[0], now).deliver.len(), 1);
    }

    #[test]
    fn test_duplicate_reliable_is_acked_but_not_redelivered() {
        let now = Instant::now();
        let mut tx = Channel::new(now);
        let mut rx = Channel::new(now);
        let a = tx.outgoing(DeliveryMode::Reliable, b"a", now);

        assert_eq!(feed(&mut rx, &a, now).deliver.len(), 1);
        let again = feed(&mut rx, &a, now);
        assert!(again.deliver.is_empty());
        assert!(again.reply.is_some());
    }

    #[test]
    fn test_ack_clears_in_flight_and_stops_resends() {
        let start = Instant::now();
        let mut tx = Channel::new(start);
        let mut rx = Channel::new(start);
        let a = tx.outgoing(DeliveryMode::Reliable, b"a", start);
        assert_eq!(tx.in_flight(), 1);

        let later = start + Duration::from_millis(150);
        assert_eq!(tx.poll(later, &TIMING).resend, vec![a.clone()]);

        let ack = feed(&mut rx, &a, later).reply.unwrap();
        feed(&mut tx, &ack, later);
        assert_eq!(tx.in_flight(), 0);
        assert!(tx.poll(later + Duration::from_millis(150), &TIMING).resend.is_empty());
    }

    #[test]
    fn test_unacked_packet_times_out_after_max_resends() {
        let start = Instant::now();
        let mut tx = Channel::new(start);
        tx.outgoing(DeliveryMode::Reliable, b"lost", start);

        let mut now = start;
        for _ in 0..TIMING.max_resends {
            now += Duration::from_millis(100);
            let m = tx.poll(now, &TIMING);
            assert_eq!(m.resend.len(), 1);
            assert!(!m.timed_out);
        }
        now += Duration::from_millis(100);
        assert!(tx.poll(now, &TIMING).timed_out);
    }

    #[test]
    fn test_sequenced_drops_stale_packets() {
        let now = Instant::now();
        let mut tx = Channel::new(now);
        let mut rx = Channel::new(now);
        let first = tx.outgoing(DeliveryMode::Sequenced, b"1", now);
        let second = tx.outgoing(DeliveryMode::Sequenced, b"2", now);

        assert_eq!(feed(&mut rx, &second, now).deliver, vec![b"2".to_vec()]);
        assert!(feed(&mut rx, &first, now).deliver.is_empty());
        assert!(feed(&mut rx, &second, now).deliver.is_empty());
    }

    #[test]
    fn test_idle_peer_times_out_and_quiet_peer_heartbeats() {
        let start = Instant::now();
        let mut ch = Channel::new(start);
        let m = ch.poll(start + Duration::from_secs(1), &TIMING);
        assert!(m.heartbeat.is_some());
        assert!(!m.timed_out);
        assert!(ch.poll(start + Duration::from_secs(5), &TIMING).timed_out);
    }

    #[test]
    fn test_disconnect_carries_code() {
        let now = Instant::now();
        let mut rx = Channel::new(now);
        let got = feed(&mut rx, &disconnect_packet(DisconnectCode::Kicked), now);
        assert_eq!(got.disconnected, Some(DisconnectCode::Kicked));
    }
}
