//! Crate-level error type.
//!
//! Only failures that prevent the transport from coming up at all — a
//! bad CLI argument, a socket that won't bind — surface here. Everything
//! that happens once a connection is running (corrupted packets, a
//! stalled peer) is handled locally by the connection engine and never
//! escapes as an `Error`.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid port '{0}': {1}")]
    InvalidPort(String, String),

    #[error("invalid receive window '{0}': {1}")]
    InvalidWindow(String, String),

    #[error("invalid peer address '{0}': {1}")]
    InvalidAddress(String, String),

    #[error("expected {expected} arguments, got {got}")]
    WrongArgCount { expected: usize, got: usize },
}
