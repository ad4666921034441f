//! Best-effort metrics in statsd text format.
//!
//! Each datagram is `name:value|type|tags`, where `type` is `c` for counters
//! and `g` for gauges. Sends never block and failures are only logged, so a
//! missing agent cannot stall the tick.

use log::debug;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

pub trait MetricsSink {
    fn counter(&mut self, name: &str, value: i64);

    fn gauge(&mut self, name: &str, value: i64);

    /// Tag string appended to every following datagram.
    fn set_common_tags(&mut self, tags: &str);
}

/// Drops everything. Used when metrics are disabled.
#[derive(Debug, Default)]
pub struct NullMetrics;

impl MetricsSink for NullMetrics {
    fn counter(&mut self, _name: &str, _value: i64) {}

    fn gauge(&mut self, _name: &str, _value: i64) {}

    fn set_common_tags(&mut self, _tags: &str) {}
}

pub struct StatsdClient {
    socket: UdpSocket,
    target: SocketAddr,
    tags: String,
}

impl StatsdClient {
    pub fn connect<A: ToSocketAddrs>(target: A) -> io::Result<Self> {
        let target = target.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "statsd address did not resolve")
        })?;
        let local: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            target,
            tags: String::new(),
        })
    }

    fn emit(&self, name: &str, value: i64, kind: &str) {
        let line = format_line(name, value, kind, &self.tags);
        if let Err(e) = self.socket.send_to(line.as_bytes(), self.target) {
            debug!("Dropped metric {}: {}", name, e);
        }
    }
}

impl MetricsSink for StatsdClient {
    fn counter(&mut self, name: &str, value: i64) {
        self.emit(name, value, "c");
    }

    fn gauge(&mut self, name: &str, value: i64) {
        self.emit(name, value, "g");
    }

    fn set_common_tags(&mut self, tags: &str) {
        self.tags = tags.to_string();
    }
}

pub fn format_line(name: &str, value: i64, kind: &str, tags: &str) -> String {
    format!("{}:{}|{}|{}", name, value, kind, tags)
}

/// Tag string identifying a game session.
pub fn session_tags(short_id: &str) -> String {
    format!("#gamesession:{}", short_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_line_format() {
        assert_eq!(
            format_line("game.SessionStarted", 1, "c", "#gamesession:abc"),
            "game.SessionStarted:1|c|#gamesession:abc"
        );
        assert_eq!(format_line("game.ClientSocketsConnected", 3, "g", ""), "game.ClientSocketsConnected:3|g|");
    }

    #[test]
    fn test_statsd_datagrams_reach_agent() {
        let agent = UdpSocket::bind("127.0.0.1:0").unwrap();
        agent
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let mut client = StatsdClient::connect(agent.local_addr().unwrap()).unwrap();
        client.set_common_tags(&session_tags("gsess-1"));
        client.counter("players.PlayerSpawn", 1);
        client.gauge("game.ClientSocketsConnected", 2);

        let mut buf = [0u8; 256];
        let n = agent.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"players.PlayerSpawn:1|c|#gamesession:gsess-1");
        let n = agent.recv(&mut buf).unwrap();
        assert_eq!(
            &buf[..n],
            b"game.ClientSocketsConnected:2|g|#gamesession:gsess-1"
        );
    }

    #[test]
    fn test_missing_agent_is_not_an_error() {
        let mut client = StatsdClient::connect("127.0.0.1:9").unwrap();
        client.counter("players.PlayerSpawn", 1);
        NullMetrics.gauge("anything", 1);
    }
}
