//! Byte-stream transport used by the session server.
//!
//! The tick loop never blocks, so both the listener and every accepted
//! stream run in non-blocking mode. The traits exist so the registry and the
//! tick loop can be driven by in-memory connections in tests.

use log::debug;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

/// A single client connection.
pub trait Transport: Read + Write {
    /// Non-destructive liveness probe. Returns false once the peer has closed
    /// its side of the stream and nothing is left to read.
    fn is_alive(&self) -> bool;

    /// Closes both directions. Called exactly once, by the registry.
    fn close(&mut self);
}

/// Source of newly connected transports.
pub trait Acceptor {
    type Conn: Transport;

    /// Returns the next pending connection, or `None` if nobody is waiting.
    fn poll_accept(&mut self) -> io::Result<Option<(Self::Conn, SocketAddr)>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Non-blocking TCP listener.
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }
}

impl Acceptor for TcpAcceptor {
    type Conn = TcpStream;

    fn poll_accept(&mut self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        match self.listener.accept() {
            Ok((stream, addr)) => {
                stream.set_nonblocking(true)?;
                // Position updates are tiny and latency sensitive
                stream.set_nodelay(true)?;
                Ok(Some((stream, addr)))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for TcpStream {
    fn is_alive(&self) -> bool {
        let mut probe = [0u8; 1];
        match self.peek(&mut probe) {
            // Readable with zero bytes means the peer sent FIN
            Ok(0) => false,
            Ok(_) => true,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
            Err(e) => {
                debug!("Liveness probe failed: {}", e);
                false
            }
        }
    }

    fn close(&mut self) {
        if let Err(e) = self.shutdown(Shutdown::Both) {
            debug!("Shutdown of closed stream: {}", e);
        }
    }
}
