//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module:
//! - Defines the on-wire binary layout (type, sequence bit, checksum, length).
//! - Serialises a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialises a raw byte slice back into a [`Packet`], returning errors
//!   for malformed, truncated or corrupted input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! Multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Type (11/12) |   Seq (0/1)   |           Checksum            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Payload Length         |          Payload ...          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 6 bytes.  The checksum (see
//! [`crate::checksum`]) covers the header with its checksum field zeroed,
//! followed by the payload.

use thiserror::Error;

use crate::checksum::{internet_checksum, verify};
use crate::state::SeqBit;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 6;

/// Largest payload a single DATA packet carries.  Longer application messages
/// are truncated by the sender, never fragmented.
pub const MAX_PAYLOAD: usize = 1000;

/// Type byte of an acknowledgement.
pub const TYPE_ACK: u8 = 11;
/// Type byte of a data packet.
pub const TYPE_DATA: u8 = 12;

// Byte offsets of each field within the serialised header.
const OFF_TYPE: usize = 0;
const OFF_SEQ: usize = 1;
pub(crate) const OFF_CHECKSUM: usize = 2;
const OFF_PAYLOAD_LEN: usize = 4;

/// Packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Ack,
    Data,
}

impl PacketKind {
    pub fn to_u8(self) -> u8 {
        match self {
            PacketKind::Ack => TYPE_ACK,
            PacketKind::Data => TYPE_DATA,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            TYPE_ACK => Some(PacketKind::Ack),
            TYPE_DATA => Some(PacketKind::Data),
            _ => None,
        }
    }
}

/// Fixed-size protocol header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub kind: PacketKind,
    pub seq: SeqBit,
    /// Internet checksum over the serialised packet.
    ///
    /// Computed by [`Packet::encode`]; verified by [`Packet::decode`].
    pub checksum: u16,
    /// Length of the payload in bytes.  Always 0 for ACKs.
    pub payload_len: u16,
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a DATA packet.  `payload_len` and `checksum` are filled in by
    /// [`encode`](Self::encode).
    pub fn data(seq: SeqBit, payload: Vec<u8>) -> Self {
        Packet {
            header: Header {
                kind: PacketKind::Data,
                seq,
                checksum: 0,
                payload_len: 0,
            },
            payload,
        }
    }

    /// Build an ACK for sequence bit `seq`.
    pub fn ack(seq: SeqBit) -> Self {
        Packet {
            header: Header {
                kind: PacketKind::Ack,
                seq,
                checksum: 0,
                payload_len: 0,
            },
            payload: Vec::new(),
        }
    }

    pub fn is_data(&self) -> bool {
        self.header.kind == PacketKind::Data
    }

    /// `true` if this is an ACK carrying sequence bit `seq`.
    pub fn is_ack_for(&self, seq: SeqBit) -> bool {
        self.header.kind == PacketKind::Ack && self.header.seq == seq
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// `header.payload_len` and `header.checksum` are computed from the actual
    /// payload; any values already stored in those fields are ignored.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let payload_len = self.payload.len();
        if payload_len > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge(payload_len));
        }
        if self.header.kind == PacketKind::Ack && payload_len != 0 {
            return Err(PacketError::AckWithPayload);
        }

        let mut buf = vec![0u8; HEADER_LEN + payload_len];
        buf[OFF_TYPE] = self.header.kind.to_u8();
        buf[OFF_SEQ] = self.header.seq.to_u8();
        // Checksum field stays zero while computing the checksum.
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 2]
            .copy_from_slice(&(payload_len as u16).to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        let csum = internet_checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());

        Ok(buf)
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// The checksum is verified before any field is interpreted, so a
    /// damaged datagram reports [`PacketError::ChecksumFailed`] rather than a
    /// misleading field error.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort);
        }

        let (header, payload) = buf.split_at(HEADER_LEN);
        let payload_len =
            u16::from_be_bytes([header[OFF_PAYLOAD_LEN], header[OFF_PAYLOAD_LEN + 1]]);
        let checksum = u16::from_be_bytes([header[OFF_CHECKSUM], header[OFF_CHECKSUM + 1]]);

        if !verify(header, payload) {
            return Err(PacketError::ChecksumFailed);
        }
        if payload.len() != payload_len as usize {
            return Err(PacketError::LengthMismatch);
        }

        let kind =
            PacketKind::from_u8(header[OFF_TYPE]).ok_or(PacketError::UnknownKind(header[OFF_TYPE]))?;
        let seq = SeqBit::from_u8(header[OFF_SEQ]).ok_or(PacketError::InvalidSeq(header[OFF_SEQ]))?;
        if kind == PacketKind::Ack && payload_len != 0 {
            return Err(PacketError::AckWithPayload);
        }

        Ok(Packet {
            header: Header {
                kind,
                seq,
                checksum,
                payload_len,
            },
            payload: payload.to_vec(),
        })
    }
}

/// Errors that can arise when building or parsing a raw datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("buffer too short to contain a header")]
    BufferTooShort,
    #[error("payload_len field does not match remaining bytes")]
    LengthMismatch,
    #[error("checksum verification failed")]
    ChecksumFailed,
    #[error("unknown packet type {0}")]
    UnknownKind(u8),
    #[error("sequence byte {0} is not a single bit")]
    InvalidSeq(u8),
    #[error("ACK packets carry no payload")]
    AckWithPayload,
    #[error("payload of {0} bytes exceeds the {max}-byte limit", max = MAX_PAYLOAD)]
    PayloadTooLarge(usize),
}
