//! The connection state machine: handshake, data transfer, liveness,
//! and teardown, all driven by repeated calls to [`ConnectionEngine::tick`]
//! (or [`ConnectionEngine::run`] for the common "just loop" case).
//!
//! A single engine handles exactly one connection at a time, same as
//! the original. Concurrency here is a single cooperative loop with one
//! suspension point — the bounded-wait read in [`ConnectionEngine::listen_tick`]
//! — rather than the teacher's threads-plus-condvars model: there is
//! only ever one peer to talk to, so nothing needs a scheduler.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::framer::{self, DecodeError, Flags, Packet};
use crate::packet_stream::PacketStream;
use crate::recv_buffer::ReceiveBuffer;
use crate::timer_set::{ScanAction, TimerKey, TimerSet};
use crate::transport::Transport;

/// How long a single `recv_from` may block before the loop comes back
/// around to service timers and liveness checks.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Whether this engine opened the connection or is waiting for one to
/// be opened against it. Both sides run the identical state machine
/// afterwards; only the handshake's first move differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Active,
    Passive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakePhase {
    Idle,
    /// Active open: OPEN sent, waiting for SYNACK (OPEN|ACK).
    SynSent,
    /// Passive open: SYNACK sent, waiting for the closing ACK.
    SynSentAck,
    Established,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TeardownPhase {
    None,
    /// Active close: CLOSE sent, waiting for the peer's CLOSEACK.
    CloseSent,
    /// Either role: CLOSEACK (or our own CLOSE) sent, waiting for the
    /// final CLOSE|ACK that completes the four-way teardown.
    CloseAcked,
}

/// One live (or about-to-be) connection.
pub struct ConnectionEngine<T: Transport> {
    transport: T,
    kind: Kind,
    own_window: u32,
    on_data: Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>,

    peer_addr: Option<SocketAddr>,
    peer_window: u32,
    seq_counter: u32,

    handshake: HandshakePhase,
    teardown: TeardownPhase,
    open_seq: Option<u32>,
    synack_seq: Option<u32>,

    recv_buffer: ReceiveBuffer,
    timers: TimerSet,
    acked_seqs: std::collections::HashSet<u32>,
    eod_pending_reply: bool,
    last_received: Option<Instant>,
}

fn default_echo(data: &[u8]) -> Vec<u8> {
    data.to_ascii_uppercase()
}

impl<T: Transport> ConnectionEngine<T> {
    /// A passive (server-role) engine that echoes received data back
    /// upper-cased, the original's behavior.
    pub fn new(transport: T, own_window: u32) -> Self {
        Self::with_handler(transport, own_window, Kind::Passive, Box::new(default_echo))
    }

    pub fn with_handler(
        transport: T,
        own_window: u32,
        kind: Kind,
        on_data: Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>,
    ) -> Self {
        ConnectionEngine {
            transport,
            kind,
            own_window,
            on_data,
            peer_addr: None,
            peer_window: 0,
            seq_counter: 0,
            handshake: HandshakePhase::Idle,
            teardown: TeardownPhase::None,
            open_seq: None,
            synack_seq: None,
            recv_buffer: ReceiveBuffer::new(own_window),
            timers: TimerSet::new(),
            acked_seqs: std::collections::HashSet::new(),
            eod_pending_reply: false,
            last_received: None,
        }
    }

    pub fn is_established(&self) -> bool {
        self.handshake == HandshakePhase::Established
    }

    /// Active-open: send OPEN to `peer` and start waiting for a SYNACK.
    pub fn connect(&mut self, peer: SocketAddr) -> io::Result<()> {
        self.peer_addr = Some(peer);
        self.kind = Kind::Active;
        let seq = self.next_seq();
        let window_payload = self.own_window.to_string().into_bytes();
        self.send_tracked(&window_payload, seq, 0, Flags::OPEN, TimerKey::Seq(seq))?;
        self.open_seq = Some(seq);
        self.handshake = HandshakePhase::SynSent;
        info!("sent OPEN (seq={seq}) to {peer}");
        Ok(())
    }

    /// Send application data once the connection is established.
    pub fn send_user_data(&mut self, data: &[u8]) -> io::Result<()> {
        self.send_data_burst(data)
    }

    /// Signal end-of-data: no more application bytes will be sent.
    pub fn send_eod(&mut self) -> io::Result<()> {
        let seq = self.next_seq();
        self.send_tracked(&[], seq, 0, Flags::EOD, TimerKey::Seq(seq))
    }

    /// Active-close: send CLOSE and start the teardown handshake.
    pub fn close(&mut self) -> io::Result<()> {
        let seq = self.next_seq();
        self.send_tracked(&[], seq, 0, Flags::CLOSE, TimerKey::Seq(seq))?;
        self.teardown = TeardownPhase::CloseSent;
        Ok(())
    }

    /// Run until `running` is cleared (e.g. by a Ctrl-C handler).
    pub fn run(&mut self, running: &AtomicBool) -> io::Result<()> {
        while running.load(Ordering::SeqCst) {
            self.tick()?;
        }
        Ok(())
    }

    /// One iteration: wait (briefly) for a datagram, then service
    /// retransmissions and liveness. Exposed separately from `run` so a
    /// caller (the client binary, tests) can interleave other work
    /// between iterations.
    pub fn tick(&mut self) -> io::Result<()> {
        self.listen_tick()?;
        self.resend_tick();
        self.check_liveness()?;
        Ok(())
    }

    fn next_seq(&mut self) -> u32 {
        let seq = self.seq_counter;
        self.seq_counter += 1;
        seq
    }

    fn send(&mut self, payload: &[u8], seq: u32, ack: u32, flags: Flags) -> io::Result<()> {
        let peer = self.peer_addr.expect("send called before a peer is known");
        let bytes = framer::encode(payload, seq, ack, flags);
        self.transport.send_to(&bytes, peer)
    }

    fn send_tracked(&mut self, payload: &[u8], seq: u32, ack: u32, flags: Flags, key: TimerKey) -> io::Result<()> {
        let peer = self.peer_addr.expect("send_tracked called before a peer is known");
        let bytes = framer::encode(payload, seq, ack, flags);
        self.transport.send_to(&bytes, peer)?;
        self.timers.arm(key, bytes);
        Ok(())
    }

    fn send_data_burst(&mut self, data: &[u8]) -> io::Result<()> {
        let counter = &mut self.seq_counter;
        let stream = PacketStream::new(data, || {
            let seq = *counter;
            *counter += 1;
            seq
        });

        let packets: Vec<(u32, Vec<u8>)> = stream.collect();
        let peer = self.peer_addr.expect("send_data_burst called before a peer is known");

        for (seq, bytes) in packets {
            self.transport.send_to(&bytes, peer)?;
            self.timers.arm(TimerKey::Seq(seq), bytes);
        }
        Ok(())
    }

    pub fn listen_tick(&mut self) -> io::Result<()> {
        let mut buf = [0u8; framer::MAX_PACKET_SIZE];
        match self.transport.recv_from(&mut buf, RECV_TIMEOUT)? {
            None => Ok(()),
            Some((n, from)) => match framer::decode(&buf[..n]) {
                Ok(packet) => {
                    self.last_received = Some(Instant::now());
                    self.dispatch(packet, from)
                }
                Err(DecodeError::HeaderCorrupted) => {
                    warn!("dropping packet with corrupted header from {from}");
                    Ok(())
                }
                Err(DecodeError::PayloadCorrupted) => {
                    warn!("dropping packet with corrupted payload from {from}");
                    Ok(())
                }
            },
        }
    }

    pub fn resend_tick(&mut self) {
        let now = Instant::now();
        let actions = self.timers.scan(now);
        let mut aborted = false;

        for (key, action) in actions {
            match action {
                ScanAction::Retransmit(bytes) => {
                    if let Ok(packet) = framer::decode(&bytes) {
                        let retransmit = framer::encode(
                            &packet.payload,
                            packet.seq,
                            packet.ack,
                            packet.flags | Flags::RETRANSMIT,
                        );
                        if let Some(peer) = self.peer_addr {
                            debug!("retransmitting {key:?}");
                            let _ = self.transport.send_to(&retransmit, peer);
                        }
                    }
                }
                ScanAction::Abort => {
                    warn!("{key:?} exhausted its retransmission budget, resetting connection");
                    aborted = true;
                }
            }
        }

        if aborted {
            self.reset();
        }
    }

    pub fn check_liveness(&mut self) -> io::Result<()> {
        if !self.is_established() {
            return Ok(());
        }

        let idle_too_long = self
            .last_received
            .map(|t| t.elapsed() > TimerSet::DEFAULT_TIMEOUT)
            .unwrap_or(false);

        if idle_too_long && self.timers.is_empty() {
            let peer = self.peer_addr.expect("established connection has a peer");
            let bytes = framer::encode(&[], 0, 0, Flags::NUDGE);
            self.transport.send_to(&bytes, peer)?;
            self.timers.arm(TimerKey::Nudge, bytes);
        }
        Ok(())
    }

    fn dispatch(&mut self, packet: Packet, from: SocketAddr) -> io::Result<()> {
        if self.peer_addr.is_none() {
            self.peer_addr = Some(from);
        }

        if !self.is_established() {
            return self.handle_handshake(packet);
        }

        if packet.flags.has(Flags::CLOSE) {
            self.handle_teardown(packet)
        } else if packet.flags.has(Flags::DATA) {
            self.handle_data(packet)
        } else if packet.flags.has(Flags::ACK) {
            self.handle_ack(packet)
        } else if packet.flags.has(Flags::EOD) {
            self.handle_eod(packet)
        } else if packet.flags.has(Flags::NUDGE) {
            self.handle_nudge(packet)
        } else {
            Ok(())
        }
    }

    fn handle_handshake(&mut self, packet: Packet) -> io::Result<()> {
        match (self.kind, self.handshake) {
            (Kind::Passive, HandshakePhase::Idle) => {
                if packet.flags.has(Flags::OPEN) {
                    self.peer_window = parse_window(&packet.payload).unwrap_or(1);
                    let seq = self.next_seq();
                    let window_payload = self.own_window.to_string().into_bytes();
                    self.send_tracked(
                        &window_payload,
                        seq,
                        packet.seq,
                        Flags::OPEN | Flags::ACK,
                        TimerKey::Seq(seq),
                    )?;
                    self.synack_seq = Some(seq);
                    self.handshake = HandshakePhase::SynSentAck;
                }
                Ok(())
            }
            (Kind::Passive, HandshakePhase::SynSentAck) => {
                if packet.flags.has(Flags::ACK) && !packet.flags.has(Flags::OPEN) {
                    if Some(packet.ack) == self.synack_seq {
                        self.timers.cancel(TimerKey::Seq(packet.ack));
                        self.recv_buffer.set_window_base(1);
                        self.handshake = HandshakePhase::Established;
                        info!("connection established with {:?}", self.peer_addr);
                    }
                }
                Ok(())
            }
            (Kind::Active, HandshakePhase::SynSent) => {
                if packet.flags.has(Flags::OPEN) && packet.flags.has(Flags::ACK) {
                    if let Some(open_seq) = self.open_seq {
                        self.timers.cancel(TimerKey::Seq(open_seq));
                    }
                    self.peer_window = parse_window(&packet.payload).unwrap_or(1);
                    self.send(&[], 0, packet.seq, Flags::ACK)?;
                    self.recv_buffer.set_window_base(1);
                    self.handshake = HandshakePhase::Established;
                    info!("connection established with {:?}", self.peer_addr);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn handle_data(&mut self, packet: Packet) -> io::Result<()> {
        let seq = packet.seq;
        let is_retransmit = packet.flags.has(Flags::RETRANSMIT);
        let already_acked = self.acked_seqs.contains(&seq);

        if !(is_retransmit && already_acked) {
            self.recv_buffer.accept(packet);
        }
        self.acked_seqs.insert(seq);

        if self.recv_buffer.is_full() {
            let data = self.recv_buffer.flush();
            let echoed = (self.on_data)(&data);
            self.send_data_burst(&echoed)?;
        }

        self.send(&[], 0, seq, Flags::ACK)
    }

    fn handle_ack(&mut self, packet: Packet) -> io::Result<()> {
        if packet.flags.has(Flags::NUDGE) {
            self.timers.cancel(TimerKey::Nudge);
        } else {
            self.timers.cancel(TimerKey::Seq(packet.ack));
        }

        if self.eod_pending_reply && self.timers.is_empty() && self.recv_buffer.is_empty() {
            let seq = self.next_seq();
            self.send_tracked(&[], seq, 0, Flags::EOD, TimerKey::Seq(seq))?;
            self.eod_pending_reply = false;
        }
        Ok(())
    }

    fn handle_eod(&mut self, packet: Packet) -> io::Result<()> {
        self.eod_pending_reply = true;
        self.send(&[], 0, packet.seq, Flags::ACK | Flags::EOD)?;

        let data = self.recv_buffer.flush();
        let echoed = (self.on_data)(&data);
        self.send_data_burst(&echoed)?;

        self.recv_buffer.set_window_base(0);
        Ok(())
    }

    fn handle_nudge(&mut self, packet: Packet) -> io::Result<()> {
        self.send(&[], 0, packet.seq, Flags::ACK | Flags::NUDGE)
    }

    fn handle_teardown(&mut self, packet: Packet) -> io::Result<()> {
        match self.teardown {
            TeardownPhase::None => {
                self.send(&[], 0, packet.seq, Flags::CLOSE | Flags::ACK)?;
                let seq = self.next_seq();
                self.send_tracked(&[], seq, 0, Flags::CLOSE, TimerKey::Seq(seq))?;
                self.teardown = TeardownPhase::CloseAcked;
                Ok(())
            }
            TeardownPhase::CloseSent => {
                if packet.flags.has(Flags::ACK) {
                    self.timers.cancel(TimerKey::Seq(packet.ack));
                    self.teardown = TeardownPhase::CloseAcked;
                }
                Ok(())
            }
            TeardownPhase::CloseAcked => {
                if packet.flags.has(Flags::ACK) {
                    info!("teardown complete with {:?}", self.peer_addr);
                    self.reset();
                } else {
                    self.send(&[], 0, packet.seq, Flags::CLOSE | Flags::ACK)?;
                    info!("teardown complete with {:?}", self.peer_addr);
                    self.reset();
                }
                Ok(())
            }
        }
    }

    fn reset(&mut self) {
        self.peer_addr = None;
        self.peer_window = 0;
        self.seq_counter = 0;
        self.handshake = HandshakePhase::Idle;
        self.teardown = TeardownPhase::None;
        self.open_seq = None;
        self.synack_seq = None;
        self.recv_buffer = ReceiveBuffer::new(self.own_window);
        self.timers = TimerSet::new();
        self.acked_seqs.clear();
        self.eod_pending_reply = false;
        self.last_received = None;
    }
}

fn parse_window(payload: &[u8]) -> Option<u32> {
    std::str::from_utf8(payload).ok()?.trim().parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::MockTransport;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[test]
    fn passive_completes_handshake_and_becomes_established() {
        let mut engine = ConnectionEngine::new(MockTransport::new(), 4);
        let client = addr(4000);

        let open = framer::encode(b"4", 0, 0, Flags::OPEN);
        engine.dispatch(framer::decode(&open).unwrap(), client).unwrap();
        assert!(!engine.is_established());
        assert_eq!(engine.handshake, HandshakePhase::SynSentAck);

        let synack_seq = engine.synack_seq.unwrap();
        let ack = framer::encode(&[], 1, synack_seq, Flags::ACK);
        engine.dispatch(framer::decode(&ack).unwrap(), client).unwrap();
        assert!(engine.is_established());
    }

    #[test]
    fn active_connect_then_synack_establishes() {
        let mut engine =
            ConnectionEngine::with_handler(MockTransport::new(), 4, Kind::Active, Box::new(|d: &[u8]| d.to_vec()));
        let server = addr(5000);
        engine.connect(server).unwrap();
        assert_eq!(engine.handshake, HandshakePhase::SynSent);

        let open_seq = engine.open_seq.unwrap();
        let synack = framer::encode(b"4", 0, open_seq, Flags::OPEN | Flags::ACK);
        engine.dispatch(framer::decode(&synack).unwrap(), server).unwrap();
        assert!(engine.is_established());
    }

    #[test]
    fn full_window_of_data_triggers_echo_and_ack_per_packet() {
        let mut engine = ConnectionEngine::new(MockTransport::new(), 2);
        engine.handshake = HandshakePhase::Established;
        engine.peer_addr = Some(addr(4000));
        engine.recv_buffer.set_window_base(0);

        let p0 = framer::decode(&framer::encode(b"hi", 0, 0, Flags::DATA)).unwrap();
        let p1 = framer::decode(&framer::encode(b"yo", 1, 0, Flags::DATA)).unwrap();
        engine.dispatch(p0, addr(4000)).unwrap();
        assert!(!engine.recv_buffer.is_full());
        engine.dispatch(p1, addr(4000)).unwrap();

        let sent: Vec<_> = engine.transport.outbound.iter().map(|(b, _)| framer::decode(b).unwrap()).collect();
        let acks: Vec<_> = sent.iter().filter(|p| p.flags.has(Flags::ACK) && !p.flags.has(Flags::DATA)).collect();
        assert_eq!(acks.len(), 2);
        let echoed_payloads: Vec<_> = sent
            .iter()
            .filter(|p| p.flags.has(Flags::DATA))
            .map(|p| p.payload.clone())
            .collect();
        assert_eq!(echoed_payloads.concat(), b"HIYO".to_vec());
    }

    #[test]
    fn retransmit_of_already_acked_seq_is_not_restored() {
        let mut engine = ConnectionEngine::new(MockTransport::new(), 2);
        engine.handshake = HandshakePhase::Established;
        engine.peer_addr = Some(addr(4000));

        let first = framer::decode(&framer::encode(b"ab", 3, 0, Flags::DATA)).unwrap();
        engine.dispatch(first, addr(4000)).unwrap();
        assert!(engine.acked_seqs.contains(&3));

        // A retransmit of the same seq must still be ACKed but not re-stored.
        let retransmit =
            framer::decode(&framer::encode(b"ab", 3, 0, Flags::DATA | Flags::RETRANSMIT)).unwrap();
        engine.dispatch(retransmit, addr(4000)).unwrap();
        assert!(!engine.recv_buffer.is_full());
    }

    #[test]
    fn peer_initiated_close_runs_four_way_teardown() {
        let mut engine = ConnectionEngine::new(MockTransport::new(), 4);
        engine.handshake = HandshakePhase::Established;
        engine.peer_addr = Some(addr(4000));

        let close = framer::decode(&framer::encode(&[], 9, 0, Flags::CLOSE)).unwrap();
        engine.dispatch(close, addr(4000)).unwrap();
        assert_eq!(engine.teardown, TeardownPhase::CloseAcked);

        let our_close_seq = 0u32; // first seq allocated for our own CLOSE
        let final_close_ack = framer::decode(&framer::encode(&[], 10, our_close_seq, Flags::CLOSE | Flags::ACK)).unwrap();
        engine.dispatch(final_close_ack, addr(4000)).unwrap();
        assert_eq!(engine.teardown, TeardownPhase::None);
        assert!(engine.peer_addr.is_none());
    }

    #[test]
    fn liveness_nudge_fires_only_once_idle_and_quiet() {
        let mut engine = ConnectionEngine::new(MockTransport::new(), 4);
        engine.handshake = HandshakePhase::Established;
        engine.peer_addr = Some(addr(4000));
        engine.last_received = Some(Instant::now() - Duration::from_secs(10));

        engine.check_liveness().unwrap();
        assert!(!engine.timers.is_empty());
        let sent_count = engine.transport.outbound.len();

        engine.check_liveness().unwrap();
        assert_eq!(engine.transport.outbound.len(), sent_count, "should not nudge twice while one is outstanding");
    }
}
