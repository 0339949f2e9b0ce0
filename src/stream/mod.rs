//! Byte streams targeted by the `.` and `,` instructions
//!
//! Two backends exist: [`Console`] over any reader/writer pair (stdin and
//! stdout in the binary) and [`Network`] over a single TCP connection.
//! Streams report failures as [`StreamError`]; the engine decides what a
//! failure means for the tape.

mod console;
mod network;

pub use console::Console;
pub use network::{port_for_cell, NetState, Network, PORT_MULTIPLIER};

use thiserror::Error;

/// Recoverable stream failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StreamError {
    /// No peer connection is open
    #[error("No active peer connection")]
    NotConnected,

    #[error("Bind to port {port} failed: {reason}")]
    Bind { port: u16, reason: String },

    #[error("Accept on port {port} failed: {reason}")]
    Accept { port: u16, reason: String },

    #[error("Connect to port {port} failed: {reason}")]
    Connect { port: u16, reason: String },

    /// Low-latency delivery could not be enabled on a new connection
    #[error("Failed to disable output coalescing: {0}")]
    NoDelay(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        StreamError::Io(e.to_string())
    }
}

/// One-byte-at-a-time I/O
pub trait ByteStream {
    /// Write one byte and make it visible immediately
    fn put(&mut self, byte: u8) -> Result<(), StreamError>;

    /// Block for one byte; `Ok(None)` means the stream has ended
    fn get(&mut self) -> Result<Option<u8>, StreamError>;
}
