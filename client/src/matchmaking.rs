//! Client-side matchmaking state machine
//!
//! The flow is `Idle -> RequestingTicket -> Polling -> Placed -> Connecting
//! -> Ready`, with `Failed` reachable from every working phase. Each call to
//! [`Matchmaker::step`] performs at most one blocking operation and reports
//! when it wants to be called again, so the machine can be driven by a timer,
//! an event loop or [`Matchmaker::run_blocking`].
//!
//! `Failed` is terminal. Retrying means building a fresh [`Matchmaker`];
//! [`MatchmakingError::is_retryable`] tells the owning client whether to,
//! after waiting [`RETRY_DELAY`].

use crate::api::{ApiError, MatchmakingApi, Placement, RegionLatency, TicketStatus};
use log::{info, warn};
use shared::{encode, Message};
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    RequestingTicket,
    Polling,
    Placed,
    Connecting,
    Ready,
    Failed,
}

impl Phase {
    pub fn is_finished(self) -> bool {
        matches!(self, Phase::Ready | Phase::Failed)
    }
}

/// Pause before the owning client starts over after a failed attempt or a finished match.
pub const RETRY_DELAY: Duration = Duration::from_millis(1500);

#[derive(Debug, Error)]
pub enum MatchmakingError {
    #[error("matchmaking request failed: {0}")]
    TicketRequest(#[source] ApiError),

    #[error("match status request failed: {0}")]
    Poll(#[source] ApiError),

    #[error("no placement after {attempts} status checks")]
    TimedOut { attempts: u32 },

    #[error("placement is not reachable: {0}")]
    InvalidPlacement(String),

    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("handshake with the game server failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("matchmaking stopped while {0:?}")]
    Unfinished(Phase),
}

impl MatchmakingError {
    /// Failures a fresh attempt can get past: no placement in time, or an
    /// unreachable game server. A refused ticket request ends the client.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MatchmakingError::TimedOut { .. }
                | MatchmakingError::Connect { .. }
                | MatchmakingError::Handshake(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchmakingConfig {
    /// Wait between two status checks of a pending ticket
    pub poll_interval: Duration,
    /// Status checks before giving up
    pub max_polls: u32,
    pub connect_timeout: Duration,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_polls: 10,
            connect_timeout: Duration::from_secs(2),
        }
    }
}

/// Opens the game server connection once a ticket is placed.
pub trait Connector {
    type Stream: Write;

    fn connect(&mut self, addr: SocketAddr, timeout: Duration) -> io::Result<Self::Stream>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&mut self, addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Result of one [`Matchmaker::step`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub phase: Phase,
    /// Human-readable status, set whenever something changed
    pub status: Option<String>,
    /// Earliest useful time for the next step; `None` means right away
    pub wake_at: Option<Instant>,
}

pub struct Matchmaker<A: MatchmakingApi, C: Connector> {
    api: A,
    connector: C,
    config: MatchmakingConfig,
    latencies: Vec<RegionLatency>,
    phase: Phase,
    ticket_id: Option<String>,
    polls: u32,
    next_poll_at: Option<Instant>,
    placement: Option<Placement>,
    target: Option<SocketAddr>,
    stream: Option<C::Stream>,
    error: Option<MatchmakingError>,
    last_status: Option<String>,
}

impl<A: MatchmakingApi, C: Connector> Matchmaker<A, C> {
    pub fn new(api: A, connector: C, config: MatchmakingConfig, latencies: Vec<RegionLatency>) -> Self {
        Self {
            api,
            connector,
            config,
            latencies,
            phase: Phase::Idle,
            ticket_id: None,
            polls: 0,
            next_poll_at: None,
            placement: None,
            target: None,
            stream: None,
            error: None,
            last_status: None,
        }
    }

    /// Advances the machine by at most one blocking operation.
    pub fn step(&mut self, now: Instant) -> Step {
        match self.phase {
            Phase::Idle => self.enter(Phase::RequestingTicket, "Requesting matchmaking...".to_string()),
            Phase::RequestingTicket => self.request_ticket(),
            Phase::Polling => self.poll(now),
            Phase::Placed => self.resolve_placement(),
            Phase::Connecting => self.connect(),
            Phase::Ready | Phase::Failed => self.idle_step(None),
        }
    }

    fn request_ticket(&mut self) -> Step {
        match self.api.request_ticket(&self.latencies) {
            Ok(ticket_id) => {
                let status = format!("Ticket {} created, checking match status...", ticket_id);
                self.ticket_id = Some(ticket_id);
                self.enter(Phase::Polling, status)
            }
            Err(e) => self.fail(MatchmakingError::TicketRequest(e)),
        }
    }

    fn poll(&mut self, now: Instant) -> Step {
        if let Some(at) = self.next_poll_at {
            if now < at {
                return self.idle_step(Some(at));
            }
        }
        let Some(ticket_id) = self.ticket_id.clone() else {
            return self.fail(MatchmakingError::Unfinished(Phase::Polling));
        };

        self.polls += 1;
        match self.api.poll_ticket(&ticket_id) {
            Ok(TicketStatus::Pending) if self.polls >= self.config.max_polls => {
                self.fail(MatchmakingError::TimedOut {
                    attempts: self.polls,
                })
            }
            Ok(TicketStatus::Pending) => {
                let at = now + self.config.poll_interval;
                self.next_poll_at = Some(at);
                let mut step = self.idle_step(Some(at));
                step.status = Some(self.announce(format!(
                    "Still waiting for placement ({}/{})...",
                    self.polls, self.config.max_polls
                )));
                step
            }
            Ok(TicketStatus::Placed(placement)) => {
                let status = format!(
                    "Matchmaking done! Server {}:{}, connecting...",
                    placement.host(),
                    placement.port
                );
                self.placement = Some(placement);
                self.next_poll_at = None;
                self.enter(Phase::Placed, status)
            }
            Err(e) => self.fail(MatchmakingError::Poll(e)),
        }
    }

    fn resolve_placement(&mut self) -> Step {
        let Some(placement) = self.placement.as_ref() else {
            return self.fail(MatchmakingError::Unfinished(Phase::Placed));
        };
        let host = placement.host().to_string();
        let port = placement.port;

        if host.is_empty() || port == 0 {
            return self.fail(MatchmakingError::InvalidPlacement(format!(
                "missing address in placement ({:?}:{})",
                host, port
            )));
        }

        let resolved = (host.as_str(), port)
            .to_socket_addrs()
            .map(|mut addrs| addrs.next());
        match resolved {
            Ok(Some(addr)) => {
                self.target = Some(addr);
                self.enter(Phase::Connecting, format!("Connecting to {}...", addr))
            }
            Ok(None) => self.fail(MatchmakingError::InvalidPlacement(format!(
                "{}:{} resolved to no address",
                host, port
            ))),
            Err(e) => self.fail(MatchmakingError::InvalidPlacement(format!(
                "{}:{} did not resolve: {}",
                host, port, e
            ))),
        }
    }

    fn connect(&mut self) -> Step {
        let (Some(addr), Some(placement)) = (self.target, self.placement.as_ref()) else {
            return self.fail(MatchmakingError::Unfinished(Phase::Connecting));
        };
        let token = placement.player_session_id.clone();

        let mut stream = match self.connector.connect(addr, self.config.connect_timeout) {
            Ok(stream) => stream,
            Err(source) => return self.fail(MatchmakingError::Connect { addr, source }),
        };

        // Ready goes out right behind Connect; acceptance shows up later as traffic or a Reject
        let mut handshake = encode(&Message::connect(token));
        handshake.extend_from_slice(&encode(&Message::ready()));
        if let Err(e) = stream.write_all(&handshake).and_then(|_| stream.flush()) {
            return self.fail(MatchmakingError::Handshake(e));
        }

        self.stream = Some(stream);
        self.enter(Phase::Ready, format!("Connected to {}, waiting for players", addr))
    }

    fn enter(&mut self, phase: Phase, status: String) -> Step {
        self.phase = phase;
        Step {
            phase,
            status: Some(self.announce(status)),
            wake_at: None,
        }
    }

    fn fail(&mut self, error: MatchmakingError) -> Step {
        warn!("Matchmaking failed: {}", error);
        let status = match &error {
            MatchmakingError::TimedOut { .. } => {
                "Aborting matchmaking, no match found in time".to_string()
            }
            MatchmakingError::Connect { .. } | MatchmakingError::Handshake(_) => {
                "Failed to connect to the game server".to_string()
            }
            _ => "Matchmaking failed! Not connected.".to_string(),
        };
        self.error = Some(error);
        self.enter(Phase::Failed, status)
    }

    fn idle_step(&self, wake_at: Option<Instant>) -> Step {
        Step {
            phase: self.phase,
            status: None,
            wake_at,
        }
    }

    fn announce(&mut self, status: String) -> String {
        info!("{}", status);
        self.last_status = Some(status.clone());
        status
    }

    /// Steps until `Ready` or `Failed`, sleeping whenever the machine asks to wait.
    pub fn run_blocking<F>(mut self, mut on_status: F) -> Result<(Placement, C::Stream), MatchmakingError>
    where
        F: FnMut(&str),
    {
        loop {
            let step = self.step(Instant::now());
            if let Some(status) = &step.status {
                on_status(status);
            }
            if step.phase.is_finished() {
                return self.into_outcome();
            }
            if let Some(at) = step.wake_at {
                let now = Instant::now();
                if at > now {
                    thread::sleep(at - now);
                }
            }
        }
    }

    /// Consumes the machine, yielding the placement and open stream once `Ready`.
    pub fn into_outcome(mut self) -> Result<(Placement, C::Stream), MatchmakingError> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        match (self.phase, self.placement.take(), self.stream.take()) {
            (Phase::Ready, Some(placement), Some(stream)) => Ok((placement, stream)),
            (phase, _, _) => Err(MatchmakingError::Unfinished(phase)),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn ticket_id(&self) -> Option<&str> {
        self.ticket_id.as_deref()
    }

    pub fn placement(&self) -> Option<&Placement> {
        self.placement.as_ref()
    }

    pub fn error(&self) -> Option<&MatchmakingError> {
        self.error.as_ref()
    }

    /// The most recent status text.
    pub fn status(&self) -> Option<&str> {
        self.last_status.as_deref()
    }
}
