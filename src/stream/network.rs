//! TCP-backed stream
//!
//! Holds at most one listener and one peer connection. Lifecycle:
//!
//! ```text
//! Unopened --listen--> Listening --accept--> Connected --close--> Closed
//! Unopened --connect-------------------------^
//! ```
//!
//! The listener is released as soon as its single peer is accepted.
//! Opening a new listener or connection while one is live closes the old
//! sockets first. Every connection this type establishes has Nagle's
//! algorithm disabled so single bytes leave immediately.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stream::{ByteStream, StreamError};

/// Port offset convention: a cell value of 80 selects port 8000
pub const PORT_MULTIPLIER: u16 = 100;

/// Derive the TCP port from a cell value
pub fn port_for_cell(value: u8) -> u16 {
    u16::from(value) * PORT_MULTIPLIER
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetState {
    Unopened,
    Listening,
    Connected,
    Closed,
}

#[derive(Debug)]
pub struct Network {
    listener: Option<TcpListener>,
    peer: Option<TcpStream>,
    state: NetState,
    /// Read/write timeout applied to peer connections; `None` blocks forever
    io_timeout: Option<Duration>,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    pub fn new() -> Self {
        Self {
            listener: None,
            peer: None,
            state: NetState::Unopened,
            io_timeout: None,
        }
    }

    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn state(&self) -> NetState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.peer.is_some()
    }

    /// Whether a listener or peer is currently held
    pub fn is_open(&self) -> bool {
        self.listener.is_some() || self.peer.is_some()
    }

    /// Bind a listener on all interfaces.
    ///
    /// Returns the bound local address. Any previously held sockets are
    /// closed first.
    pub fn listen(&mut self, port: u16) -> Result<SocketAddr, StreamError> {
        self.close();

        let listener =
            TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).map_err(|e| StreamError::Bind {
                port,
                reason: e.to_string(),
            })?;
        let local = listener.local_addr()?;

        self.listener = Some(listener);
        self.state = NetState::Listening;
        Ok(local)
    }

    /// Block until exactly one peer connects, then release the listener.
    pub fn accept(&mut self) -> Result<SocketAddr, StreamError> {
        let listener = self.listener.as_ref().ok_or(StreamError::NotConnected)?;
        let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);

        let accepted = listener.accept().map_err(|e| StreamError::Accept {
            port,
            reason: e.to_string(),
        });
        let (stream, addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                self.close();
                return Err(e);
            }
        };

        if let Err(e) = self.adopt(stream) {
            self.close();
            return Err(e);
        }
        self.listener = None;
        Ok(addr)
    }

    /// `listen` followed by `accept`.
    ///
    /// `on_listening` receives the bound address before the accept blocks.
    pub fn open_server<F>(&mut self, port: u16, on_listening: F) -> Result<SocketAddr, StreamError>
    where
        F: FnOnce(SocketAddr),
    {
        let local = self.listen(port)?;
        on_listening(local);
        self.accept()
    }

    /// Block on connecting to `127.0.0.1:port`.
    pub fn open_client(&mut self, port: u16) -> Result<SocketAddr, StreamError> {
        self.close();

        let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).map_err(|e| {
            StreamError::Connect {
                port,
                reason: e.to_string(),
            }
        })?;
        let addr = stream.peer_addr()?;

        if let Err(e) = self.adopt(stream) {
            self.close();
            return Err(e);
        }
        Ok(addr)
    }

    fn adopt(&mut self, stream: TcpStream) -> Result<(), StreamError> {
        stream
            .set_nodelay(true)
            .map_err(|e| StreamError::NoDelay(e.to_string()))?;
        stream.set_read_timeout(self.io_timeout)?;
        stream.set_write_timeout(self.io_timeout)?;

        self.peer = Some(stream);
        self.state = NetState::Connected;
        Ok(())
    }

    /// Send exactly one byte to the peer
    pub fn send(&mut self, byte: u8) -> Result<(), StreamError> {
        let peer = self.peer.as_mut().ok_or(StreamError::NotConnected)?;
        peer.write_all(&[byte])?;
        peer.flush()?;
        Ok(())
    }

    /// Block until one byte arrives; `Ok(None)` when the peer has closed
    pub fn recv(&mut self) -> Result<Option<u8>, StreamError> {
        let peer = self.peer.as_mut().ok_or(StreamError::NotConnected)?;
        let mut buf = [0u8; 1];
        match peer.read_exact(&mut buf) {
            Ok(()) => Ok(Some(buf[0])),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Look at the next peer byte without consuming it or blocking
    pub fn peek(&mut self) -> Result<Option<u8>, StreamError> {
        let peer = self.peer.as_ref().ok_or(StreamError::NotConnected)?;
        let mut buf = [0u8; 1];

        peer.set_nonblocking(true)?;
        let peeked = peer.peek(&mut buf);
        if let Err(e) = peer.set_nonblocking(false) {
            // a non-blocking peer would break `recv`
            self.close();
            return Err(e.into());
        }

        match peeked {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop the peer connection and listener.
    ///
    /// Returns `true` when something was actually open.
    pub fn close(&mut self) -> bool {
        let was_open = self.is_open();

        // Listener first, so nobody queues on it after the peer sees EOF.
        self.listener = None;
        if let Some(peer) = self.peer.take() {
            let _ = peer.shutdown(Shutdown::Both);
        }

        if was_open {
            self.state = NetState::Closed;
        }
        was_open
    }
}

impl ByteStream for Network {
    fn put(&mut self, byte: u8) -> Result<(), StreamError> {
        self.send(byte)
    }

    fn get(&mut self) -> Result<Option<u8>, StreamError> {
        self.recv()
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        self.close();
    }
}
