//! The datagram transport the connection engine runs over.
//!
//! [`Transport`] exists so the engine can be driven by an in-memory
//! double in tests instead of a real socket; [`UdpTransport`] is the
//! production implementation.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

pub trait Transport {
    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> io::Result<()>;

    /// Wait up to `timeout` for a datagram. `Ok(None)` means the wait
    /// elapsed with nothing arriving, not an error.
    fn recv_from(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<(usize, SocketAddr)>>;
}

pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        Ok(UdpTransport { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> io::Result<()> {
        self.socket.send_to(buf, addr)?;
        Ok(())
    }

    fn recv_from(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<(usize, SocketAddr)>> {
        self.socket.set_read_timeout(Some(timeout))?;
        match self.socket.recv_from(buf) {
            Ok((n, addr)) => Ok(Some((n, addr))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::VecDeque;
    use std::net::{IpAddr, Ipv4Addr};

    pub fn peer_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9) // discard port, never dialed
    }

    /// An in-memory transport for engine tests: `inbound` is drained on
    /// each `recv_from`, everything sent is captured in `outbound`.
    #[derive(Default)]
    pub struct MockTransport {
        pub inbound: VecDeque<(Vec<u8>, SocketAddr)>,
        pub outbound: Vec<(Vec<u8>, SocketAddr)>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            MockTransport::default()
        }

        pub fn push_inbound(&mut self, bytes: Vec<u8>, from: SocketAddr) {
            self.inbound.push_back((bytes, from));
        }
    }

    impl Transport for MockTransport {
        fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> io::Result<()> {
            self.outbound.push((buf.to_vec(), addr));
            Ok(())
        }

        fn recv_from(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<Option<(usize, SocketAddr)>> {
            match self.inbound.pop_front() {
                Some((bytes, from)) => {
                    let n = bytes.len();
                    buf[..n].copy_from_slice(&bytes);
                    Ok(Some((n, from)))
                }
                None => Ok(None),
            }
        }
    }
}
