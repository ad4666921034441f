//! Connection registry for the session server
//!
//! This module owns every live client connection and is the only place a
//! transport is ever closed. It covers:
//! - Admission against a hard capacity, with a `Reject` for late arrivals
//! - Player id assignment once a connection's session token is validated
//! - Liveness probing and per-connection inbound buffering
//! - Unicast and broadcast sends that report failing connections
//!
//! Connections and players are kept in ordered maps so iteration follows
//! admission order, which is also the broadcast order.

use crate::transport::{Acceptor, Transport};
use log::{debug, info, warn};
use shared::protocol::ReadStatus;
use shared::{encode, Message, MessageReader, ProtocolError};
use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;

/// Handle for a registered connection. Never reused within a process.
pub type ConnectionId = u64;

pub const REJECT_FULL: &str = "game already full";

/// A registered connection and the per-connection state the server tracks
#[derive(Debug)]
pub struct Connection<T> {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    /// Set once the session token has been accepted
    pub player_id: Option<i32>,
    pub ready: bool,
    transport: T,
    reader: MessageReader,
}

/// Outcome of admitting a freshly accepted transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted(ConnectionId),
    /// Capacity reached; the peer got a `Reject` and was closed
    Rejected(SocketAddr),
}

/// Everything read from one connection during a tick
#[derive(Debug, Default)]
pub struct Received {
    pub messages: Vec<Message>,
    pub error: Option<ProtocolError>,
    /// The peer closed its side while we were reading
    pub closed: bool,
}

/// A connection that has been detached from the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removed {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    pub player_id: Option<i32>,
}

/// Owns all live connections and the connection <-> player mapping
///
/// Player ids come from a counter starting at 1 and are handed out when a
/// connection's `Connect` token is validated. Neither player ids nor
/// connection ids are recycled, so a stale id can never address a newer
/// connection.
pub struct ConnectionRegistry<T: Transport> {
    connections: BTreeMap<ConnectionId, Connection<T>>,
    players: BTreeMap<i32, ConnectionId>,
    next_connection_id: ConnectionId,
    next_player_id: i32,
    capacity: usize,
}

impl<T: Transport> ConnectionRegistry<T> {
    /// Creates an empty registry that holds at most `capacity` connections
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: BTreeMap::new(),
            players: BTreeMap::new(),
            next_connection_id: 1,
            next_player_id: 1,
            capacity,
        }
    }

    /// Polls the acceptor once and admits whatever it returns
    ///
    /// Returns `Ok(None)` when no connection is pending.
    pub fn accept<A>(&mut self, acceptor: &mut A) -> io::Result<Option<Admission>>
    where
        A: Acceptor<Conn = T>,
    {
        Ok(acceptor
            .poll_accept()?
            .map(|(transport, addr)| self.admit(transport, addr)))
    }

    /// Registers a transport, or rejects it if the registry is full
    ///
    /// A rejected peer receives exactly one `Reject` with a readable reason
    /// before its transport is closed. It is never registered.
    pub fn admit(&mut self, mut transport: T, addr: SocketAddr) -> Admission {
        if self.is_full() {
            info!(
                "Rejecting connection from {}: {} of {} slots taken",
                addr,
                self.connections.len(),
                self.capacity
            );
            if let Err(e) = write_message(&mut transport, &Message::reject(REJECT_FULL)) {
                debug!("Could not deliver reject to {}: {}", addr, e);
            }
            transport.close();
            return Admission::Rejected(addr);
        }

        let id = self.next_connection_id;
        self.next_connection_id += 1;

        info!("Connection {} accepted from {}", id, addr);
        self.connections.insert(
            id,
            Connection {
                id,
                addr,
                player_id: None,
                ready: false,
                transport,
                reader: MessageReader::new(),
            },
        );

        Admission::Admitted(id)
    }

    /// Marks a connection as validated and assigns its player id
    ///
    /// Validating an already validated connection returns its existing id.
    pub fn assign_player(&mut self, id: ConnectionId) -> Option<i32> {
        let connection = self.connections.get_mut(&id)?;
        if let Some(player_id) = connection.player_id {
            return Some(player_id);
        }

        let player_id = self.next_player_id;
        self.next_player_id += 1;
        connection.player_id = Some(player_id);
        self.players.insert(player_id, id);

        Some(player_id)
    }

    /// Flags a connection as ready. Returns true only the first time.
    pub fn mark_ready(&mut self, id: ConnectionId) -> bool {
        match self.connections.get_mut(&id) {
            Some(connection) if !connection.ready => {
                connection.ready = true;
                true
            }
            _ => false,
        }
    }

    pub fn ready_count(&self) -> usize {
        self.connections.values().filter(|c| c.ready).count()
    }

    /// Probes the transport without consuming data
    pub fn is_alive(&self, id: ConnectionId) -> bool {
        self.connections
            .get(&id)
            .map(|c| c.transport.is_alive())
            .unwrap_or(false)
    }

    /// Reads what the connection has available and decodes buffered messages
    ///
    /// Incomplete trailing bytes stay buffered for the next call. A decode
    /// error discards the rest of the buffer but keeps the messages decoded
    /// before it.
    pub fn receive(&mut self, id: ConnectionId) -> io::Result<Received> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or_else(|| unknown_connection(id))?;

        let status = connection.reader.read_available(&mut connection.transport)?;
        let drained = connection.reader.drain();

        Ok(Received {
            messages: drained.messages,
            error: drained.error,
            closed: status == ReadStatus::Closed,
        })
    }

    /// Sends one message to one connection
    pub fn send(&mut self, id: ConnectionId, message: &Message) -> io::Result<()> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or_else(|| unknown_connection(id))?;
        write_message(&mut connection.transport, message)
    }

    /// Sends a message to every connection except `exclude`
    ///
    /// Delivery continues past failures; the ids of connections that could
    /// not be written to are returned so the caller can queue their removal.
    pub fn broadcast(&mut self, message: &Message, exclude: Option<ConnectionId>) -> Vec<ConnectionId> {
        let bytes = encode(message);
        let mut failed = Vec::new();

        for (id, connection) in self.connections.iter_mut() {
            if Some(*id) == exclude {
                continue;
            }
            if let Err(e) = write_bytes(&mut connection.transport, &bytes) {
                warn!("Send to connection {} failed: {}", id, e);
                failed.push(*id);
            }
        }

        failed
    }

    /// Closes the transport and drops every entry for the connection
    pub fn remove(&mut self, id: ConnectionId) -> Option<Removed> {
        let mut connection = self.connections.remove(&id)?;
        if let Some(player_id) = connection.player_id {
            self.players.remove(&player_id);
        }
        connection.transport.close();

        info!(
            "Connection {} from {} removed (player {:?})",
            id, connection.addr, connection.player_id
        );

        Some(Removed {
            id,
            addr: connection.addr,
            player_id: connection.player_id,
        })
    }

    /// Closes and forgets every connection
    pub fn close_all(&mut self) -> Vec<Removed> {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn player_of(&self, id: ConnectionId) -> Option<i32> {
        self.connections.get(&id).and_then(|c| c.player_id)
    }

    pub fn connection_of(&self, player_id: i32) -> Option<ConnectionId> {
        self.players.get(&player_id).copied()
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection<T>> {
        self.connections.get(&id)
    }

    /// Connection ids in admission order
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn unknown_connection(id: ConnectionId) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("connection {} is not registered", id),
    )
}

fn write_message<W: io::Write>(out: &mut W, message: &Message) -> io::Result<()> {
    write_bytes(out, &encode(message))
}

fn write_bytes<W: io::Write>(out: &mut W, bytes: &[u8]) -> io::Result<()> {
    out.write_all(bytes)?;
    out.flush()
}
