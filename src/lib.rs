//! A reliable, connection-oriented byte-stream transport layered over
//! UDP. See [`engine::ConnectionEngine`] for the state machine; the
//! `server` and `client` binaries are thin wrappers around it.

pub mod cli;
pub mod engine;
pub mod err;
pub mod framer;
pub mod packet_stream;
pub mod recv_buffer;
pub mod timer_set;
pub mod transport;

pub use engine::{ConnectionEngine, Kind};
pub use err::Error;
pub use transport::{Transport, UdpTransport};
