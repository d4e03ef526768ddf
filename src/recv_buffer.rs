//! Sliding-window receive buffer.
//!
//! Holds up to `capacity` in-flight packets, indexed by `seq - window_base`
//! modulo the window. Unlike the original, `window_base` lives on this
//! struct rather than a class-level accumulator shared across every
//! connection — see the redesign note in the connection engine.

use crate::framer::Packet;

pub struct ReceiveBuffer {
    capacity: u32,
    window_base: u32,
    slots: Vec<Option<Packet>>,
}

impl ReceiveBuffer {
    pub fn new(capacity: u32) -> Self {
        ReceiveBuffer {
            capacity: capacity.max(1),
            window_base: 0,
            slots: vec![None; capacity.max(1) as usize],
        }
    }

    pub fn window_base(&self) -> u32 {
        self.window_base
    }

    pub fn set_window_base(&mut self, base: u32) {
        self.window_base = base;
    }

    /// Store `packet` in its window slot. Returns `false` if the slot
    /// already holds a packet with the same sequence number (a true
    /// duplicate), `true` otherwise.
    ///
    /// When `seq - window_base` would fall outside the window, the base
    /// is advanced by `capacity - (seq % capacity)` — preserved exactly
    /// as the original computes it, despite looking unusual next to a
    /// plain modulo rebase.
    pub fn accept(&mut self, packet: Packet) -> bool {
        if packet.seq < self.window_base {
            return false;
        }

        let mut offset = packet.seq - self.window_base;
        if offset >= self.capacity {
            self.window_base += self.capacity - (packet.seq % self.capacity);
            if packet.seq < self.window_base {
                return false;
            }
            offset = packet.seq - self.window_base;
        }

        let index = offset as usize;
        if index >= self.slots.len() {
            return false;
        }

        if let Some(existing) = &self.slots[index] {
            if existing.seq == packet.seq {
                return false;
            }
        }

        self.slots[index] = Some(packet);
        true
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Drain every held packet, concatenating payloads in slot order
    /// (i.e. ascending sequence number within the window), and clear
    /// the buffer for reuse.
    pub fn flush(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        for slot in self.slots.iter_mut() {
            if let Some(packet) = slot.take() {
                out.extend_from_slice(&packet.payload);
            }
        }
        out
    }
}
