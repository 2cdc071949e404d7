//! Outbound state for alternating-bit reliability.
//!
//! [`Sender`] tracks the send-sequence bit and the single in-flight DATA
//! packet.  It does **not** touch the socket; [`crate::connection::Connection`]
//! calls these methods and owns the actual send/wait/retransmit loop.
//!
//! # Stop-and-Wait contract
//! - At most **one** DATA packet is in flight at any moment (`unacked`).
//! - On ACK for the current bit: flip `next_seq`; clear `unacked`.
//! - On ACK for the other bit, or a corrupted packet: ignore, keep waiting.
//! - On timeout: increment `tx_count`; resend the same bytes unchanged.
//! - On a well-formed DATA packet from the peer: the peer could only have
//!   started a new message after our ACK reached it, so treat the ACK as
//!   received.  This shortcut can be fooled by a duplicate DATA packet.

use crate::packet::{Packet, PacketError, MAX_PAYLOAD};
use crate::state::{SenderState, SeqBit};

// ---------------------------------------------------------------------------
// RetransmitEntry
// ---------------------------------------------------------------------------

/// A DATA packet that has been sent but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmitEntry {
    /// Encoded datagram, resent verbatim on timeout.
    pub wire: Vec<u8>,
    /// Payload bytes carried (header excluded).
    pub payload_len: usize,
    /// How many times this packet has been transmitted (1 = first send).
    pub tx_count: u32,
}

/// Why an inbound packet did not end the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    Corrupt,
    /// An ACK for the other bit, or any packet while nothing is in flight.
    Stale,
}

/// Outcome of feeding one inbound packet to the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendEvent {
    /// Keep waiting.
    Discarded(Discard),
    /// The expected ACK arrived; `usize` payload bytes were delivered.
    Acked(usize),
    /// Peer DATA arrived while waiting and was taken as the ACK.  The caller
    /// must acknowledge `data` and hand it to the receiver.
    ImplicitAck { sent: usize, data: Packet },
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Stop-and-wait send-side state for one connection.
#[derive(Debug, Default)]
pub struct Sender {
    /// Sequence bit of the next (or in-flight) DATA packet.
    next_seq: SeqBit,
    state: SenderState,
    /// The in-flight packet, or `None` when the sender is idle.
    unacked: Option<RetransmitEntry>,
}

impl Sender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_seq(&self) -> SeqBit {
        self.next_seq
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn in_flight(&self) -> Option<&RetransmitEntry> {
        self.unacked.as_ref()
    }

    /// Build a DATA packet for `message`, truncated to [`MAX_PAYLOAD`].
    pub fn build_data_packet(&self, message: &[u8]) -> Packet {
        let len = message.len().min(MAX_PAYLOAD);
        Packet::data(self.next_seq, message[..len].to_vec())
    }

    /// Encode `packet` into the in-flight slot and enter `AWAIT_ACK`.
    ///
    /// Returns the bytes to put on the wire.
    pub fn record_sent(&mut self, packet: &Packet) -> Result<&[u8], PacketError> {
        let wire = packet.encode()?;
        self.state = SenderState::AwaitAck;
        let entry = self.unacked.insert(RetransmitEntry {
            wire,
            payload_len: packet.payload.len(),
            tx_count: 1,
        });
        Ok(entry.wire.as_slice())
    }

    /// Bump the transmit count of the in-flight packet and return its bytes.
    pub fn on_retransmit(&mut self) -> Option<&[u8]> {
        let entry = self.unacked.as_mut()?;
        entry.tx_count += 1;
        Some(entry.wire.as_slice())
    }

    /// Number of transmissions of the in-flight packet, `0` when idle.
    pub fn retransmit_count(&self) -> u32 {
        self.unacked.as_ref().map_or(0, |e| e.tx_count)
    }

    /// Classify an inbound datagram received while in `AWAIT_ACK`.
    pub fn on_packet(&mut self, decoded: Result<Packet, PacketError>) -> SendEvent {
        let Some(sent) = self.unacked.as_ref().map(|e| e.payload_len) else {
            return SendEvent::Discarded(Discard::Stale);
        };
        let pkt = match decoded {
            Ok(pkt) => pkt,
            Err(_) => return SendEvent::Discarded(Discard::Corrupt),
        };

        if pkt.is_data() {
            self.complete();
            SendEvent::ImplicitAck { sent, data: pkt }
        } else if pkt.is_ack_for(self.next_seq) {
            self.complete();
            SendEvent::Acked(sent)
        } else {
            SendEvent::Discarded(Discard::Stale)
        }
    }

    /// Give up on the in-flight packet without flipping the bit, so the next
    /// message reuses the same sequence number.
    pub fn abandon(&mut self) {
        self.unacked = None;
        self.state = SenderState::Idle;
    }

    fn complete(&mut self) {
        self.unacked = None;
        self.state = SenderState::Idle;
        self.next_seq = self.next_seq.flip();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sent(s: &mut Sender, msg: &[u8]) -> Vec<u8> {
        let pkt = s.build_data_packet(msg);
        s.record_sent(&pkt).unwrap().to_vec()
    }

    #[test]
    fn new_sender_is_idle_on_zero() {
        let s = Sender::new();
        assert_eq!(s.next_seq(), SeqBit::Zero);
        assert_eq!(s.state(), SenderState::Idle);
        assert!(s.in_flight().is_none());
        assert_eq!(s.retransmit_count(), 0);
    }

    #[test]
    fn oversized_message_is_truncated() {
        let s = Sender::new();
        let pkt = s.build_data_packet(&vec![1u8; MAX_PAYLOAD + 250]);
        assert_eq!(pkt.payload.len(), MAX_PAYLOAD);
    }

    #[test]
    fn record_sent_enters_await_ack() {
        let mut s = Sender::new();
        let wire = sent(&mut s, b"hello");
        assert_eq!(s.state(), SenderState::AwaitAck);
        assert_eq!(s.retransmit_count(), 1);

        let decoded = Packet::decode(&wire).unwrap();
        assert_eq!(decoded.header.seq, SeqBit::Zero);
        assert_eq!(decoded.payload, b"hello");
    }

    #[test]
    fn matching_ack_flips_bit() {
        let mut s = Sender::new();
        sent(&mut s, b"abc");
        assert_eq!(s.on_packet(Ok(Packet::ack(SeqBit::Zero))), SendEvent::Acked(3));
        assert_eq!(s.state(), SenderState::Idle);
        assert_eq!(s.next_seq(), SeqBit::One);
    }

    #[test]
    fn bits_alternate_over_successive_messages() {
        let mut s = Sender::new();
        let mut seen = Vec::new();
        for _ in 0..4 {
            let wire = sent(&mut s, b"m");
            let seq = Packet::decode(&wire).unwrap().header.seq;
            seen.push(seq.to_u8());
            s.on_packet(Ok(Packet::ack(seq)));
        }
        assert_eq!(seen, vec![0, 1, 0, 1]);
    }

    #[test]
    fn stale_ack_and_corruption_keep_waiting() {
        let mut s = Sender::new();
        sent(&mut s, b"abc");
        assert_eq!(
            s.on_packet(Ok(Packet::ack(SeqBit::One))),
            SendEvent::Discarded(Discard::Stale)
        );
        assert_eq!(
            s.on_packet(Err(PacketError::ChecksumFailed)),
            SendEvent::Discarded(Discard::Corrupt)
        );
        assert_eq!(s.state(), SenderState::AwaitAck);
        assert_eq!(s.next_seq(), SeqBit::Zero);
    }

    #[test]
    fn peer_data_counts_as_ack() {
        let mut s = Sender::new();
        sent(&mut s, b"mine");
        let theirs = Packet::decode(&Packet::data(SeqBit::Zero, b"theirs".to_vec()).encode().unwrap())
            .unwrap();

        match s.on_packet(Ok(theirs)) {
            SendEvent::ImplicitAck { sent, data } => {
                assert_eq!(sent, 4);
                assert_eq!(data.payload, b"theirs");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(s.next_seq(), SeqBit::One);
        assert_eq!(s.state(), SenderState::Idle);
    }

    #[test]
    fn retransmit_resends_identical_bytes() {
        let mut s = Sender::new();
        let first = sent(&mut s, b"again");
        let again = s.on_retransmit().unwrap().to_vec();
        assert_eq!(first, again);
        assert_eq!(s.retransmit_count(), 2);
    }

    #[test]
    fn idle_sender_ignores_packets() {
        let mut s = Sender::new();
        assert_eq!(
            s.on_packet(Ok(Packet::ack(SeqBit::Zero))),
            SendEvent::Discarded(Discard::Stale)
        );
        assert!(s.on_retransmit().is_none());
        assert_eq!(s.next_seq(), SeqBit::Zero);
    }

    #[test]
    fn abandon_keeps_sequence_bit() {
        let mut s = Sender::new();
        sent(&mut s, b"x");
        s.abandon();
        assert_eq!(s.state(), SenderState::Idle);
        assert_eq!(s.next_seq(), SeqBit::Zero);
    }
}
