//! Wire framing: packet encode/decode, checksums, and the flag bitset.
//!
//! Packet layout (network byte order):
//!
//! ```text
//! 0                                    29                              45
//! +---+------+------+------+----------+--------------------------------+
//! | F | SEQ  | ACK  | LEN  | PAYLOAD  | HEADER                         |
//! |   | (4)  | (4)  | (4)  | CKSUM(16)| CKSUM(16)                      |
//! +---+------+------+------+----------+--------------------------------+
//! | PAYLOAD (0..=955 bytes)                                            |
//! +----------------------------------------------------------------...-+
//! ```
//!
//! `F` is a one-byte flag bitset (see [`Flags`]). The payload checksum
//! covers only the payload bytes; the header checksum covers bytes
//! `0..29` (flags through the payload checksum), so a corrupted length
//! field is caught before it can be used to slice unbounded bytes out of
//! the datagram.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::ops::{BitOr, BitOrAssign};

/// Maximum size of an encoded packet, header included.
pub const MAX_PACKET_SIZE: usize = 1000;

/// Size of the fixed packet header, in bytes.
pub const HEADER_SIZE: usize = 1 + 4 + 4 + 4 + 16 + 16;

/// Maximum payload a single packet may carry.
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

/// Bitset of protocol control flags, stored as a single byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    pub const OPEN: Flags = Flags(0x01);
    pub const CLOSE: Flags = Flags(0x02);
    pub const ACK: Flags = Flags(0x04);
    pub const RETRANSMIT: Flags = Flags(0x08);
    pub const DATA: Flags = Flags(0x10);
    pub const EOD: Flags = Flags(0x20);
    pub const NUDGE: Flags = Flags(0x40);

    pub const fn from_bits(bits: u8) -> Flags {
        Flags(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True if every bit set in `flag` is also set in `self`.
    pub const fn has(self, flag: Flags) -> bool {
        self.0 & flag.0 == flag.0
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

/// A decoded packet, ready for dispatch by the connection engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub flags: Flags,
    pub seq: u32,
    pub ack: u32,
    pub payload: Vec<u8>,
}

/// Integrity failure reported by [`decode`].
///
/// Distinct from a Rust-level error: both variants mean "drop this
/// datagram and say nothing", never something the caller should
/// propagate with `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("header checksum mismatch")]
    HeaderCorrupted,
    #[error("payload checksum mismatch or declared length out of bounds")]
    PayloadCorrupted,
}

fn md5_of(data: &[u8]) -> [u8; 16] {
    md5::compute(data).0
}

/// Build the wire bytes for a packet: payload checksum, header, header
/// checksum, then the payload itself.
pub fn encode(payload: &[u8], seq: u32, ack: u32, flags: Flags) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_PAYLOAD_SIZE);

    let mut header = Vec::with_capacity(HEADER_SIZE - 16);
    header.write_u8(flags.bits()).unwrap();
    header.write_u32::<BigEndian>(seq).unwrap();
    header.write_u32::<BigEndian>(ack).unwrap();
    header.write_u32::<BigEndian>(payload.len() as u32).unwrap();
    header.extend_from_slice(&md5_of(payload));

    let header_checksum = md5_of(&header);

    let mut packet = Vec::with_capacity(HEADER_SIZE + payload.len());
    packet.extend_from_slice(&header);
    packet.extend_from_slice(&header_checksum);
    packet.extend_from_slice(payload);
    packet
}

/// Parse and integrity-check a datagram received from the wire.
pub fn decode(bytes: &[u8]) -> Result<Packet, DecodeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(DecodeError::PayloadCorrupted);
    }

    let header = &bytes[0..HEADER_SIZE - 16];
    let stored_header_checksum = &bytes[HEADER_SIZE - 16..HEADER_SIZE];

    if md5_of(header).as_slice() != stored_header_checksum {
        return Err(DecodeError::HeaderCorrupted);
    }

    let mut cursor = &header[..];
    let flags = Flags::from_bits(cursor.read_u8().unwrap());
    let seq = cursor.read_u32::<BigEndian>().unwrap();
    let ack = cursor.read_u32::<BigEndian>().unwrap();
    let payload_len = cursor.read_u32::<BigEndian>().unwrap() as usize;
    let stored_payload_checksum = &header[13..29];

    if payload_len > MAX_PAYLOAD_SIZE || HEADER_SIZE + payload_len > bytes.len() {
        return Err(DecodeError::PayloadCorrupted);
    }

    let payload = &bytes[HEADER_SIZE..HEADER_SIZE + payload_len];
    if md5_of(payload).as_slice() != stored_payload_checksum {
        return Err(DecodeError::PayloadCorrupted);
    }

    Ok(Packet {
        flags,
        seq,
        ack,
        payload: payload.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_payload() {
        let payload = vec![0xABu8; MAX_PAYLOAD_SIZE];
        let bytes = encode(&payload, 42, 7, Flags::DATA | Flags::RETRANSMIT);
        let packet = decode(&bytes).unwrap();

        assert_eq!(packet.seq, 42);
        assert_eq!(packet.ack, 7);
        assert_eq!(packet.payload, payload);
        assert!(packet.flags.has(Flags::DATA));
        assert!(packet.flags.has(Flags::RETRANSMIT));
        assert!(!packet.flags.has(Flags::ACK));
    }

    #[test]
    fn empty_payload_round_trips() {
        let bytes = encode(&[], 0, 0, Flags::NUDGE);
        let packet = decode(&bytes).unwrap();
        assert!(packet.payload.is_empty());
        assert!(packet.flags.has(Flags::NUDGE));
    }

    #[test]
    fn header_bit_flip_is_header_corrupted() {
        let mut bytes = encode(b"hello", 1, 0, Flags::DATA);
        bytes[1] ^= 0x01; // flip a bit inside the sequence number
        assert_eq!(decode(&bytes), Err(DecodeError::HeaderCorrupted));
    }

    #[test]
    fn payload_bit_flip_is_payload_corrupted() {
        let mut bytes = encode(b"hello", 1, 0, Flags::DATA);
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert_eq!(decode(&bytes), Err(DecodeError::PayloadCorrupted));
    }

    #[test]
    fn truncated_datagram_is_payload_corrupted() {
        let bytes = encode(b"hello", 1, 0, Flags::DATA);
        assert_eq!(decode(&bytes[..bytes.len() - 1]), Err(DecodeError::PayloadCorrupted));
    }

    #[test]
    fn flags_combine_and_check_subsets() {
        let synack = Flags::OPEN | Flags::ACK;
        assert!(synack.has(Flags::OPEN));
        assert!(synack.has(Flags::ACK));
        assert!(!synack.has(Flags::CLOSE));
        assert!(synack.has(Flags::OPEN | Flags::ACK));
    }
}
