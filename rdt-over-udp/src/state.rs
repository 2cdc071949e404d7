//! Finite-state-machine types shared by the sender and receiver.
//!
//! The alternating-bit protocol needs very little state: one sequence bit per
//! direction and whether a DATA packet is waiting for its ACK.  Transitions
//! live in [`crate::sender`] and [`crate::receiver`]; this module only defines
//! the vocabulary.

/// One-bit sequence number.
///
/// ```text
///   Zero ──accepted/acked──▶ One ──accepted/acked──▶ Zero ...
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SeqBit {
    #[default]
    Zero,
    One,
}

impl SeqBit {
    /// The other bit.
    pub fn flip(self) -> Self {
        match self {
            SeqBit::Zero => SeqBit::One,
            SeqBit::One => SeqBit::Zero,
        }
    }

    /// On-wire representation (a boolean-width byte).
    pub fn to_u8(self) -> u8 {
        match self {
            SeqBit::Zero => 0,
            SeqBit::One => 1,
        }
    }

    /// Parse the on-wire byte; anything other than `0` or `1` is rejected.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SeqBit::Zero),
            1 => Some(SeqBit::One),
            _ => None,
        }
    }
}

impl std::fmt::Display for SeqBit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_u8())
    }
}

/// States of the sender FSM.
///
/// ```text
///  IDLE ──send DATA(seq)──▶ AWAIT_ACK ──ACK(seq) or peer DATA──▶ IDLE
///                             │    ▲
///                             └────┘ timeout: retransmit
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderState {
    /// No DATA packet outstanding.
    #[default]
    Idle,
    /// One DATA packet sent and not yet acknowledged.
    AwaitAck,
}

impl std::fmt::Display for SenderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SenderState::Idle => f.write_str("IDLE"),
            SenderState::AwaitAck => f.write_str("AWAIT_ACK"),
        }
    }
}
