//! 16-bit one's-complement Internet checksum.
//!
//! Words are read **little-endian**: byte `i` is the low half of a word and
//! byte `i + 1` the high half.  An odd trailing byte is the low half of a final
//! word whose high half is zero.
//!
//! # Known limitation
//!
//! The one's-complement sum is commutative over aligned 16-bit words, so two
//! words swapping places go unnoticed.  Any single-bit flip is detected.

use crate::packet::OFF_CHECKSUM;

/// Compute the Internet checksum over `data`.
///
/// The caller must zero any checksum field within `data` first.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);

    for w in &mut words {
        sum += u32::from(u16::from_le_bytes([w[0], w[1]]));
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last);
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

/// Check a serialised header (checksum field filled in) against its payload.
///
/// Returns `false` for a header too short to hold the checksum field.
pub fn verify(header: &[u8], payload: &[u8]) -> bool {
    if header.len() < OFF_CHECKSUM + 2 {
        return false;
    }
    let stored = u16::from_be_bytes([header[OFF_CHECKSUM], header[OFF_CHECKSUM + 1]]);

    let mut scratch = Vec::with_capacity(header.len() + payload.len());
    scratch.extend_from_slice(header);
    scratch[OFF_CHECKSUM..OFF_CHECKSUM + 2].fill(0);
    scratch.extend_from_slice(payload);

    internet_checksum(&scratch) == stored
}
