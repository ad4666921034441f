//! Session server: the authoritative fixed-rate tick loop
//!
//! Each tick runs synchronously and in this order:
//! 1. accept every pending connection (capacity permitting)
//! 2. probe, read and dispatch messages per connection, in admission order
//! 3. advance every player by its pending input
//! 4. send positions that moved past the broadcast threshold
//! 5. detach queued connections and announce the departed players
//! 6. end the session when it emptied out or was abandoned
//!
//! Closing connections is left entirely to the registry. Dispatch code only
//! queues connections for removal.

use crate::config::{ConfigError, ServerConfig};
use crate::host::{GameSession, HostError, SessionHost};
use crate::lifecycle::{SessionLifecycle, TerminationReason};
use crate::metrics::{session_tags, MetricsSink};
use crate::players::PlayerDirectory;
use crate::registry::{Admission, ConnectionId, ConnectionRegistry};
use crate::transport::{Acceptor, TcpAcceptor};
use log::{debug, info, warn};
use shared::{random_spawn, Message, MessageKind, Transform};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};

pub const REJECT_INVALID_SESSION: &str = "invalid player session";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running,
    Terminated(TerminationReason),
}

/// Authoritative server for one game session
pub struct SessionServer<A: Acceptor> {
    config: ServerConfig,
    acceptor: A,
    local_addr: SocketAddr,
    registry: ConnectionRegistry<A::Conn>,
    players: PlayerDirectory,
    lifecycle: SessionLifecycle,
    host: Box<dyn SessionHost>,
    metrics: Box<dyn MetricsSink>,
    session: GameSession,
    removals: Vec<ConnectionId>,
    termination: Option<TerminationReason>,
    tick: u64,
}

impl SessionServer<TcpAcceptor> {
    /// Opens the listening socket and reports the process ready
    ///
    /// Failing to bind is fatal: no server is returned and no tick ever runs.
    pub fn bind(
        config: ServerConfig,
        host: Box<dyn SessionHost>,
        metrics: Box<dyn MetricsSink>,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let addr = config.bind_addr();
        let acceptor = TcpAcceptor::bind(&addr).map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
        Self::new(acceptor, config, host, metrics)
    }
}

impl<A: Acceptor> SessionServer<A> {
    pub fn new(
        acceptor: A,
        config: ServerConfig,
        mut host: Box<dyn SessionHost>,
        mut metrics: Box<dyn MetricsSink>,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let local_addr = acceptor.local_addr().map_err(|source| ServerError::Bind {
            addr: config.bind_addr(),
            source,
        })?;
        info!("Server listening on {}", local_addr);

        let session = host.process_ready(local_addr.port())?;
        metrics.set_common_tags(&session_tags(session.short_id()));
        metrics.counter("game.SessionStarted", 1);

        let mut lifecycle = SessionLifecycle::new(config.ready_threshold, config.grace_period);
        lifecycle.activate(Instant::now());

        Ok(Self {
            registry: ConnectionRegistry::new(config.max_connections),
            players: PlayerDirectory::new(),
            lifecycle,
            acceptor,
            local_addr,
            host,
            metrics,
            session,
            removals: Vec::new(),
            termination: None,
            tick: 0,
            config,
        })
    }

    /// Runs one tick. Once terminated, further calls do nothing.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        if let Some(reason) = self.termination {
            return TickOutcome::Terminated(reason);
        }
        self.tick += 1;

        self.accept_pending();
        self.receive_all(now);
        self.players.step_all();
        self.broadcast_moved();
        self.process_removals();

        if self.lifecycle.is_started() {
            self.metrics
                .gauge("game.ClientSocketsConnected", self.registry.len() as i64);
        }

        if let Some(reason) = self.lifecycle.check(now, self.registry.len()) {
            self.terminate(reason);
            return TickOutcome::Terminated(reason);
        }

        if self.tick % 300 == 0 {
            debug!(
                "Tick {}: {} connections, {} players, {} ready",
                self.tick,
                self.registry.len(),
                self.players.len(),
                self.registry.ready_count()
            );
        }

        TickOutcome::Running
    }

    /// Drives [`tick`](Self::tick) at the configured rate until the session
    /// ends or `shutdown` resolves
    pub async fn run<F: Future>(&mut self, shutdown: F) -> TerminationReason {
        let mut ticker = interval(self.config.tick_duration());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            "Session {} running at {} Hz",
            self.session.session_id, self.config.tick_rate
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let TickOutcome::Terminated(reason) = self.tick(Instant::now()) {
                        return reason;
                    }
                }
                _ = &mut shutdown => {
                    self.terminate(TerminationReason::Shutdown);
                    return TerminationReason::Shutdown;
                }
            }
        }
    }

    fn accept_pending(&mut self) {
        loop {
            match self.registry.accept(&mut self.acceptor) {
                Ok(Some(Admission::Admitted(_))) | Ok(Some(Admission::Rejected(_))) => {}
                Ok(None) => break,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn receive_all(&mut self, now: Instant) {
        for id in self.registry.ids() {
            if self.is_queued(id) {
                continue;
            }
            if !self.registry.is_alive(id) {
                info!("Connection {} closed by peer", id);
                self.queue_removal(id);
                continue;
            }

            let received = match self.registry.receive(id) {
                Ok(received) => received,
                Err(e) => {
                    warn!("Receive from connection {} failed: {}", id, e);
                    self.queue_removal(id);
                    continue;
                }
            };

            for message in received.messages {
                self.dispatch(id, message, now);
                if self.is_queued(id) {
                    break;
                }
            }

            if let Some(e) = received.error {
                warn!("Discarding undecodable data from connection {}: {}", id, e);
            }
            if received.closed {
                info!("Connection {} reached end of stream", id);
                self.queue_removal(id);
            }
        }
    }

    fn dispatch(&mut self, id: ConnectionId, message: Message, now: Instant) {
        debug!("Connection {} sent {:?}", id, message.kind);

        match message.kind {
            MessageKind::Connect => self.handle_connect(id, &message.text),
            MessageKind::Disconnect => {
                info!("Connection {} asked to disconnect", id);
                self.queue_removal(id);
            }
            MessageKind::Ready
            | MessageKind::Spawn
            | MessageKind::Position
            | MessageKind::PlayerInput => {
                let Some(player_id) = self.registry.player_of(id) else {
                    warn!(
                        "Ignoring {:?} from connection {} before session validation",
                        message.kind, id
                    );
                    return;
                };
                match message.kind {
                    MessageKind::Ready => self.handle_ready(id, now),
                    MessageKind::Spawn => self.spawn_player(id, player_id, message.transform()),
                    MessageKind::Position => {
                        self.handle_position(id, player_id, message.transform())
                    }
                    _ => self.handle_input(id, player_id, &message),
                }
            }
            MessageKind::Reject | MessageKind::PositionOwn | MessageKind::PlayerLeft => {
                warn!(
                    "Ignoring server-only message {:?} from connection {}",
                    message.kind, id
                );
            }
        }
    }

    fn handle_connect(&mut self, id: ConnectionId, token: &str) {
        if let Some(player_id) = self.registry.player_of(id) {
            warn!(
                "Connection {} sent a second Connect, already player {}",
                id, player_id
            );
            return;
        }

        match self.host.accept_player_session(token) {
            Ok(()) => {
                if let Some(player_id) = self.registry.assign_player(id) {
                    info!(
                        "Player session validated for connection {}, player id {}",
                        id, player_id
                    );
                }
            }
            Err(e) => {
                warn!("Player session rejected for connection {}: {}", id, e);
                self.send_to(id, &Message::reject(REJECT_INVALID_SESSION));
                self.queue_removal(id);
            }
        }
    }

    fn handle_ready(&mut self, id: ConnectionId, now: Instant) {
        if !self.registry.mark_ready(id) {
            return;
        }
        let ready = self.registry.ready_count();
        info!("Connection {} is ready ({} ready)", id, ready);

        if self.lifecycle.player_ready(ready, now) {
            info!("Enough players ready ({}), starting the session", ready);
        }
    }

    /// Creates the player, catches the new connection up on everyone else and
    /// introduces the newcomer to the others.
    ///
    /// A repeated spawn only moves the player; the others see a `Position`.
    fn spawn_player(&mut self, id: ConnectionId, player_id: i32, transform: Transform) {
        if !self.players.spawn(player_id, transform) {
            debug!("Player {} spawned again, relocating", player_id);
            self.broadcast(&Message::position(player_id, &transform), Some(id));
            return;
        }
        self.metrics.counter("players.PlayerSpawn", 1);

        for (other_id, other) in self.players.others(player_id) {
            if !self.send_to(id, &Message::position(other_id, &other)) {
                break;
            }
        }

        let relay = Message::spawn(&transform).with_player(player_id);
        self.broadcast(&relay, Some(id));
    }

    fn handle_position(&mut self, id: ConnectionId, player_id: i32, transform: Transform) {
        self.metrics.counter("players.PlayerPositionUpdate", 1);
        if !self.players.set_transform(player_id, transform) {
            self.spawn_player(id, player_id, transform);
        }
    }

    fn handle_input(&mut self, id: ConnectionId, player_id: i32, message: &Message) {
        if !self.players.contains(player_id) {
            let spawn = random_spawn(&mut rand::thread_rng());
            info!("Input from player {} before spawn, spawning it", player_id);
            self.spawn_player(id, player_id, spawn);
        }
        self.players.set_input(player_id, message.input_axes());
    }

    fn broadcast_moved(&mut self) {
        for (player_id, transform) in self.players.take_moved() {
            let Some(id) = self.registry.connection_of(player_id) else {
                continue;
            };
            self.broadcast(&Message::position(player_id, &transform), Some(id));
            self.send_to(id, &Message::position_own(player_id, &transform));
        }
    }

    fn process_removals(&mut self) {
        let queued = std::mem::take(&mut self.removals);
        let mut departed = Vec::new();

        for id in queued {
            if let Some(removed) = self.registry.remove(id) {
                if let Some(player_id) = removed.player_id {
                    self.players.remove(player_id);
                    departed.push(player_id);
                }
            }
        }
        if !departed.is_empty() {
            self.lifecycle.set_ready_count(self.registry.ready_count());
        }

        for player_id in departed {
            info!("Player {} left", player_id);
            self.broadcast(&Message::player_left(player_id), None);
        }
    }

    fn terminate(&mut self, reason: TerminationReason) {
        if self.termination.is_some() {
            return;
        }
        info!("Terminating session {}: {}", self.session.session_id, reason);

        self.registry.broadcast(&Message::disconnect(), None);
        self.registry.close_all();
        self.players.clear();
        self.removals.clear();

        self.host.terminate_session();
        self.lifecycle.mark_terminated();
        self.termination = Some(reason);
    }

    fn send_to(&mut self, id: ConnectionId, message: &Message) -> bool {
        match self.registry.send(id, message) {
            Ok(()) => true,
            Err(e) => {
                warn!("Send to connection {} failed: {}", id, e);
                self.queue_removal(id);
                false
            }
        }
    }

    fn broadcast(&mut self, message: &Message, exclude: Option<ConnectionId>) {
        for id in self.registry.broadcast(message, exclude) {
            self.queue_removal(id);
        }
    }

    fn queue_removal(&mut self, id: ConnectionId) {
        if !self.is_queued(id) {
            self.removals.push(id);
        }
    }

    fn is_queued(&self, id: ConnectionId) -> bool {
        self.removals.contains(&id)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn session(&self) -> &GameSession {
        &self.session
    }

    pub fn registry(&self) -> &ConnectionRegistry<A::Conn> {
        &self.registry
    }

    pub fn players(&self) -> &PlayerDirectory {
        &self.players
    }

    pub fn lifecycle(&self) -> &SessionLifecycle {
        &self.lifecycle
    }

    pub fn termination(&self) -> Option<TerminationReason> {
        self.termination
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryAcceptor, Peer};
    use shared::{InputAxes, Vec3, PLAYER_SPEED};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct HostLog {
        tokens: Vec<String>,
        terminations: usize,
    }

    /// Accepts every token except "bad" and records termination signals
    struct RecordingHost {
        log: Rc<RefCell<HostLog>>,
    }

    impl SessionHost for RecordingHost {
        fn process_ready(&mut self, port: u16) -> Result<GameSession, HostError> {
            Ok(GameSession {
                session_id: format!("fleet/test/gsess-{}", port),
                port,
            })
        }

        fn accept_player_session(&mut self, token: &str) -> Result<(), HostError> {
            self.log.borrow_mut().tokens.push(token.to_string());
            if token == "bad" {
                Err(HostError::Rejected(token.to_string()))
            } else {
                Ok(())
            }
        }

        fn terminate_session(&mut self) {
            self.log.borrow_mut().terminations += 1;
        }
    }

    struct RecordingMetrics {
        lines: Rc<RefCell<Vec<String>>>,
    }

    impl MetricsSink for RecordingMetrics {
        fn counter(&mut self, name: &str, value: i64) {
            self.lines.borrow_mut().push(format!("{}:{}|c", name, value));
        }

        fn gauge(&mut self, name: &str, value: i64) {
            self.lines.borrow_mut().push(format!("{}:{}|g", name, value));
        }

        fn set_common_tags(&mut self, tags: &str) {
            self.lines.borrow_mut().push(tags.to_string());
        }
    }

    struct Harness {
        server: SessionServer<MemoryAcceptor>,
        acceptor: MemoryAcceptor,
        host: Rc<RefCell<HostLog>>,
        metrics: Rc<RefCell<Vec<String>>>,
        start: Instant,
        now: Instant,
    }

    impl Harness {
        fn new(config: ServerConfig) -> Self {
            let acceptor = MemoryAcceptor::default();
            let host = Rc::new(RefCell::new(HostLog::default()));
            let metrics = Rc::new(RefCell::new(Vec::new()));
            let server = SessionServer::new(
                acceptor.clone(),
                config,
                Box::new(RecordingHost {
                    log: Rc::clone(&host),
                }),
                Box::new(RecordingMetrics {
                    lines: Rc::clone(&metrics),
                }),
            )
            .unwrap();
            let now = Instant::now();
            Self {
                server,
                acceptor,
                host,
                metrics,
                start: now,
                now,
            }
        }

        fn with_defaults() -> Self {
            Self::new(ServerConfig::default())
        }

        fn tick(&mut self) -> TickOutcome {
            self.now += Duration::from_millis(33);
            self.server.tick(self.now)
        }

        fn tick_at(&mut self, offset: Duration) -> TickOutcome {
            self.now = self.start + offset;
            self.server.tick(self.now)
        }

        /// Connects and validates a peer; returns it with its inbox emptied.
        fn join(&mut self, token: &str) -> Peer {
            let peer = self.acceptor.connect();
            peer.send(&Message::connect(token));
            self.tick();
            peer.received();
            peer
        }

        fn join_and_spawn(&mut self, token: &str, at: Vec3) -> Peer {
            let peer = self.join(token);
            peer.send(&Message::spawn(&Transform::at(at)));
            self.tick();
            peer
        }

        fn terminations(&self) -> usize {
            self.host.borrow().terminations
        }

        fn metric_count(&self, line: &str) -> usize {
            self.metrics.borrow().iter().filter(|l| *l == line).count()
        }
    }

    fn kinds(messages: &[Message]) -> Vec<MessageKind> {
        messages.iter().map(|m| m.kind).collect()
    }

    #[test]
    fn test_activation_reports_session() {
        let harness = Harness::with_defaults();
        assert_eq!(harness.server.session().short_id(), "gsess-1935");
        assert_eq!(harness.metric_count("#gamesession:gsess-1935"), 1);
        assert_eq!(harness.metric_count("game.SessionStarted:1|c"), 1);
    }

    #[test]
    fn test_capacity_rejects_extra_connections() {
        let mut harness = Harness::new(ServerConfig {
            max_connections: 2,
            ready_threshold: 1,
            ..ServerConfig::default()
        });
        let peers: Vec<Peer> = (0..4).map(|_| harness.acceptor.connect()).collect();

        harness.tick();

        assert_eq!(harness.server.registry().len(), 2);
        for peer in &peers[..2] {
            assert!(peer.received().is_empty());
            assert!(!peer.is_closed());
        }
        for peer in &peers[2..] {
            let received = peer.received();
            assert_eq!(kinds(&received), vec![MessageKind::Reject]);
            assert!(peer.is_closed());
        }
    }

    #[test]
    fn test_connect_and_ready_starts_session() {
        let mut harness = Harness::with_defaults();

        let first = harness.acceptor.connect();
        first.send(&Message::connect("tok-123"));
        first.send(&Message::ready());
        harness.tick();
        assert!(!harness.server.lifecycle().is_started());

        let second = harness.acceptor.connect();
        second.send(&Message::connect("tok-456"));
        second.send(&Message::ready());
        harness.tick();

        assert!(harness.server.lifecycle().is_started());
        assert_eq!(harness.server.lifecycle().ready_count(), 2);
        assert_eq!(harness.terminations(), 0);
        assert_eq!(harness.host.borrow().tokens, vec!["tok-123", "tok-456"]);

        harness.tick();
        assert_eq!(harness.metric_count("game.ClientSocketsConnected:2|g"), 2);
    }

    #[test]
    fn test_rejected_token_closes_connection() {
        let mut harness = Harness::with_defaults();
        let peer = harness.acceptor.connect();
        peer.send(&Message::connect("bad"));
        peer.send(&Message::ready());

        harness.tick();

        let received = peer.received();
        assert_eq!(kinds(&received), vec![MessageKind::Reject]);
        assert_eq!(received[0].text, REJECT_INVALID_SESSION);
        assert!(peer.is_closed());
        assert!(harness.server.registry().is_empty());
        assert_eq!(harness.server.lifecycle().ready_count(), 0);
    }

    #[test]
    fn test_messages_before_validation_are_ignored() {
        let mut harness = Harness::with_defaults();
        let peer = harness.acceptor.connect();
        peer.send(&Message::ready());
        peer.send(&Message::spawn(&Transform::default()));

        harness.tick();

        assert_eq!(harness.server.registry().ready_count(), 0);
        assert!(harness.server.players().is_empty());
        assert_eq!(harness.server.registry().len(), 1);
    }

    #[test]
    fn test_spawn_catch_up_goes_to_new_connection_only() {
        let mut harness = Harness::with_defaults();
        let a = harness.join_and_spawn("a", Vec3::new(1.0, 1.0, 1.0));
        let b = harness.join_and_spawn("b", Vec3::new(2.0, 1.0, 2.0));
        a.received();
        b.received();

        let c = harness.join("c");
        a.received();
        b.received();
        c.send(&Message::spawn(&Transform::at(Vec3::new(3.0, 1.0, 3.0))));
        harness.tick();

        let to_c = c.received();
        assert_eq!(
            kinds(&to_c),
            vec![MessageKind::Position, MessageKind::Position]
        );
        assert_eq!(to_c[0].player_id, 1);
        assert_eq!(to_c[1].player_id, 2);

        for existing in [&a, &b] {
            let received = existing.received();
            assert_eq!(kinds(&received), vec![MessageKind::Spawn]);
            assert_eq!(received[0].player_id, 3);
        }
        assert_eq!(harness.metric_count("players.PlayerSpawn:1|c"), 3);
    }

    #[test]
    fn test_second_spawn_relocates_without_catch_up() {
        let mut harness = Harness::with_defaults();
        let a = harness.join_and_spawn("a", Vec3::new(1.0, 1.0, 1.0));
        let b = harness.join_and_spawn("b", Vec3::new(2.0, 1.0, 2.0));
        a.received();
        b.received();

        let again = Transform::at(Vec3::new(-3.0, 1.0, 0.0));
        b.send(&Message::spawn(&again));
        harness.tick();

        assert!(b.received().is_empty());
        assert_eq!(a.received(), vec![Message::position(2, &again)]);
        assert_eq!(harness.server.players().get(2).unwrap().transform, again);
        assert_eq!(harness.metric_count("players.PlayerSpawn:1|c"), 2);
    }

    #[test]
    fn test_departure_broadcasts_player_left_once() {
        let mut harness = Harness::with_defaults();
        let a = harness.join_and_spawn("a", Vec3::ZERO);
        let b = harness.join_and_spawn("b", Vec3::ZERO);
        let c = harness.join_and_spawn("c", Vec3::ZERO);
        for peer in [&a, &b, &c] {
            peer.received();
        }

        b.send(&Message::disconnect());
        harness.tick();

        assert!(b.is_closed());
        assert!(b.received().is_empty());
        for peer in [&a, &c] {
            let received = peer.received();
            assert_eq!(received, vec![Message::player_left(2)]);
        }
        assert!(!harness.server.players().contains(2));
        assert_eq!(harness.server.registry().len(), 2);
    }

    #[test]
    fn test_dead_peer_is_removed() {
        let mut harness = Harness::with_defaults();
        let a = harness.join_and_spawn("a", Vec3::ZERO);
        let b = harness.join_and_spawn("b", Vec3::ZERO);
        a.received();

        b.hang_up();
        harness.tick();

        assert_eq!(a.received(), vec![Message::player_left(2)]);
        assert_eq!(harness.server.registry().len(), 1);
    }

    #[test]
    fn test_input_before_spawn_synthesizes_player() {
        let mut harness = Harness::with_defaults();
        let a = harness.join_and_spawn("a", Vec3::ZERO);
        let b = harness.join("b");
        a.received();

        b.send(&Message::input(InputAxes::new(1.0, 0.0)));
        harness.tick();

        assert!(harness.server.players().contains(2));
        let player = harness.server.players().get(2).unwrap();
        assert_eq!(player.pending_input, InputAxes::new(1.0, 0.0));

        let to_a = a.received();
        assert_eq!(to_a[0].kind, MessageKind::Spawn);
        assert_eq!(to_a[0].player_id, 2);
    }

    #[test]
    fn test_input_moves_player_and_broadcasts() {
        let mut harness = Harness::with_defaults();
        let a = harness.join_and_spawn("a", Vec3::ZERO);
        let b = harness.join_and_spawn("b", Vec3::new(4.0, 1.0, 4.0));
        a.received();
        b.received();

        a.send(&Message::input(InputAxes::new(0.0, 1.0)));
        harness.tick();

        let own = a.received();
        assert_eq!(kinds(&own), vec![MessageKind::PositionOwn]);
        assert_eq!(own[0].player_id, 1);
        assert!((own[0].transform().position.z - PLAYER_SPEED).abs() < 1e-5);

        let other = b.received();
        assert_eq!(kinds(&other), vec![MessageKind::Position]);
        assert_eq!(other[0].transform(), own[0].transform());

        // Input persists between ticks
        harness.tick();
        assert_eq!(kinds(&a.received()), vec![MessageKind::PositionOwn]);
    }

    #[test]
    fn test_client_position_is_relayed() {
        let mut harness = Harness::with_defaults();
        let a = harness.join_and_spawn("a", Vec3::ZERO);
        let b = harness.join_and_spawn("b", Vec3::ZERO);
        a.received();
        b.received();

        let moved = Transform::at(Vec3::new(2.0, 1.0, 0.0));
        a.send(&Message::position(0, &moved));
        harness.tick();

        assert_eq!(b.received(), vec![Message::position(1, &moved)]);
        assert_eq!(a.received(), vec![Message::position_own(1, &moved)]);
        assert_eq!(harness.metric_count("players.PlayerPositionUpdate:1|c"), 1);
    }

    #[test]
    fn test_small_moves_are_not_broadcast() {
        let mut harness = Harness::with_defaults();
        let a = harness.join_and_spawn("a", Vec3::ZERO);
        let b = harness.join_and_spawn("b", Vec3::ZERO);
        a.received();
        b.received();

        a.send(&Message::position(0, &Transform::at(Vec3::new(0.005, 0.0, 0.0))));
        harness.tick();

        assert!(a.received().is_empty());
        assert!(b.received().is_empty());
    }

    #[test]
    fn test_decode_error_keeps_earlier_messages_and_connection() {
        let mut harness = Harness::with_defaults();
        let peer = harness.acceptor.connect();
        peer.send(&Message::connect("tok"));
        peer.send_raw(&77i32.to_le_bytes());
        peer.send_raw(&[0u8; 40]);

        harness.tick();

        assert_eq!(harness.server.registry().len(), 1);
        let id = harness.server.registry().ids()[0];
        assert_eq!(harness.server.registry().player_of(id), Some(1));

        peer.send(&Message::ready());
        harness.tick();
        assert_eq!(harness.server.registry().ready_count(), 1);
    }

    #[test]
    fn test_messages_after_disconnect_are_dropped() {
        let mut harness = Harness::with_defaults();
        let a = harness.join_and_spawn("a", Vec3::ZERO);
        let b = harness.join("b");
        a.received();

        b.send(&Message::disconnect());
        b.send(&Message::spawn(&Transform::default()));
        harness.tick();

        assert!(!harness.server.players().contains(2));
        // No spawn relay, only the departure of the validated player
        assert_eq!(a.received(), vec![Message::player_left(2)]);
    }

    #[test]
    fn test_started_session_terminates_when_empty() {
        let mut harness = Harness::new(ServerConfig {
            ready_threshold: 1,
            ..ServerConfig::default()
        });
        let peer = harness.join("a");
        peer.send(&Message::ready());
        harness.tick();
        assert!(harness.server.lifecycle().is_started());

        peer.send(&Message::disconnect());
        assert_eq!(
            harness.tick(),
            TickOutcome::Terminated(TerminationReason::Emptied)
        );
        assert_eq!(harness.terminations(), 1);

        // Further ticks do nothing and never signal again
        assert_eq!(
            harness.tick(),
            TickOutcome::Terminated(TerminationReason::Emptied)
        );
        assert_eq!(harness.terminations(), 1);
    }

    #[test]
    fn test_unstarted_session_terminates_after_grace() {
        let mut harness = Harness::with_defaults();

        assert_eq!(harness.tick_at(Duration::from_secs(4)), TickOutcome::Running);
        assert_eq!(
            harness.tick_at(Duration::from_secs(6)),
            TickOutcome::Terminated(TerminationReason::Abandoned)
        );
        assert_eq!(harness.terminations(), 1);
    }

    #[test]
    fn test_termination_disconnects_remaining_players() {
        let mut harness = Harness::with_defaults();
        let a = harness.join("a");
        a.send(&Message::ready());
        harness.tick();

        harness.tick_at(Duration::from_secs(60));

        assert_eq!(a.received(), vec![Message::disconnect()]);
        assert!(a.is_closed());
        assert!(harness.server.registry().is_empty());
        assert_eq!(
            harness.server.termination(),
            Some(TerminationReason::Abandoned)
        );
    }

    #[test]
    fn test_failed_send_queues_removal() {
        let mut harness = Harness::with_defaults();
        let a = harness.join_and_spawn("a", Vec3::ZERO);
        let b = harness.join_and_spawn("b", Vec3::ZERO);
        a.received();
        b.break_writes();

        a.send(&Message::position(0, &Transform::at(Vec3::new(3.0, 1.0, 0.0))));
        harness.tick();

        assert!(b.is_closed());
        assert_eq!(harness.server.registry().len(), 1);
        let to_a = a.received();
        assert!(to_a.contains(&Message::player_left(2)));
    }

    #[test]
    fn test_run_stops_on_shutdown() {
        let mut harness = Harness::with_defaults();
        let peer = harness.join("a");

        let reason = tokio_test::block_on(harness.server.run(async {}));

        assert_eq!(reason, TerminationReason::Shutdown);
        assert_eq!(peer.received(), vec![Message::disconnect()]);
        assert_eq!(harness.terminations(), 1);
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let result = SessionServer::new(
            MemoryAcceptor::default(),
            ServerConfig {
                tick_rate: 0,
                ..ServerConfig::default()
            },
            Box::new(crate::host::LocalHost::new()),
            Box::new(crate::metrics::NullMetrics),
        );
        assert!(matches!(result, Err(ServerError::Config(_))));
    }
}
