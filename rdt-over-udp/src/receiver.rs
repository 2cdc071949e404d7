//! Inbound state for alternating-bit reliability.
//!
//! The [`Receiver`] decides, for every datagram that arrives while the
//! application waits in `recv`:
//! - whether it is the expected in-sequence DATA packet (deliver it),
//! - or corrupted / a duplicate of the previous message (re-ACK the
//!   previous bit so the peer's retransmission eventually succeeds).
//!
//! It also owns the *early-data buffer*: DATA packets the sender path
//! already acknowledged while waiting for its own ACK, queued here until the
//! application calls `recv`.
//!
//! The [`Receiver`] does **not** send ACKs itself; it returns the bit that
//! [`crate::connection::Connection`] must acknowledge.

use std::collections::VecDeque;

use crate::packet::{Packet, PacketError};
use crate::state::SeqBit;

/// What the connection must do with an inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvAction {
    /// ACK `ack`, then return `payload` to the application.
    Deliver { ack: SeqBit, payload: Vec<u8> },
    /// ACK this (previous) bit again and keep waiting.
    Reack(SeqBit),
    /// Nothing to send; keep waiting.
    Ignore,
}

/// Receive-side state for one connection.
#[derive(Debug, Default)]
pub struct Receiver {
    /// Sequence bit of the next DATA packet to deliver.
    expected: SeqBit,
    /// Payload-bearing packets acknowledged ahead of a `recv` call, oldest first.
    early: VecDeque<Packet>,
    /// Most recent bit this side acknowledged as newly accepted.
    last_acked: Option<SeqBit>,
}

impl Receiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expected(&self) -> SeqBit {
        self.expected
    }

    pub fn last_acked(&self) -> Option<SeqBit> {
        self.last_acked
    }

    pub fn early_len(&self) -> usize {
        self.early.len()
    }

    /// Queue a DATA packet the sender path has just acknowledged.
    pub fn buffer_early(&mut self, pkt: Packet) {
        self.last_acked = Some(pkt.header.seq);
        self.early.push_back(pkt);
    }

    /// Pop buffered packets until one carries the expected bit.
    ///
    /// Mismatched entries are dropped without another ACK; they were
    /// acknowledged when they were buffered.
    pub fn take_early(&mut self) -> Option<Vec<u8>> {
        while let Some(pkt) = self.early.pop_front() {
            if pkt.header.seq == self.expected {
                self.expected = self.expected.flip();
                return Some(pkt.payload);
            }
            log::debug!(
                "[rdt] dropping buffered DATA seq={} (expecting {})",
                pkt.header.seq,
                self.expected
            );
        }
        None
    }

    /// Classify a datagram received by `recv`.
    pub fn on_packet(&mut self, decoded: Result<Packet, PacketError>) -> RecvAction {
        let previous = self.expected.flip();
        let pkt = match decoded {
            Ok(pkt) => pkt,
            Err(_) => return RecvAction::Reack(previous),
        };

        if !pkt.is_data() {
            // A stray ACK carries nothing to deliver.
            return RecvAction::Ignore;
        }
        if pkt.header.seq != self.expected {
            return RecvAction::Reack(previous);
        }

        let ack = self.expected;
        self.last_acked = Some(ack);
        self.expected = previous;
        RecvAction::Deliver {
            ack,
            payload: pkt.payload,
        }
    }

    /// During teardown: the bit to re-ACK for a straggler, if any.
    ///
    /// Only an intact DATA packet repeating the last acknowledged message
    /// earns an ACK; everything else is ignored.
    pub fn straggler_ack(&self, decoded: &Result<Packet, PacketError>) -> Option<SeqBit> {
        let last = self.last_acked?;
        match decoded {
            Ok(pkt) if pkt.is_data() && pkt.header.seq == last => Some(last),
            _ => None,
        }
    }
}
