//! Lazy packetization of an in-memory byte buffer into DATA packets.
//!
//! Mirrors the original implementation's packet-iterator, but as a plain
//! Rust [`Iterator`] instead of a hand-rolled iterator-protocol object:
//! each call to `next()` slices off the next `MAX_PAYLOAD_SIZE` bytes,
//! pulls a fresh sequence number from the caller-supplied allocator, and
//! hands back the encoded wire bytes alongside that sequence number so
//! the caller can arm a retransmission timer without re-parsing the
//! packet it just built.

use crate::framer::{self, Flags, MAX_PAYLOAD_SIZE};

/// Splits `data` into DATA packets, allocating sequence numbers via
/// `next_seq` as it goes.
pub struct PacketStream<'a, F>
where
    F: FnMut() -> u32,
{
    data: &'a [u8],
    offset: usize,
    next_seq: F,
}

impl<'a, F> PacketStream<'a, F>
where
    F: FnMut() -> u32,
{
    pub fn new(data: &'a [u8], next_seq: F) -> Self {
        PacketStream {
            data,
            offset: 0,
            next_seq,
        }
    }
}

impl<'a, F> Iterator for PacketStream<'a, F>
where
    F: FnMut() -> u32,
{
    type Item = (u32, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }

        let end = (self.offset + MAX_PAYLOAD_SIZE).min(self.data.len());
        let chunk = &self.data[self.offset..end];
        self.offset = end;

        let seq = (self.next_seq)();
        Some((seq, framer::encode(chunk, seq, 0, Flags::DATA)))
    }
}
