use crate::game::WorldMirror;
use crate::input::BotInput;
use log::{debug, info, warn};
use shared::{encode, random_spawn, Message, MessageKind, MessageReader, Transform};
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Input is sent at 20 Hz.
pub const SEND_INTERVAL: Duration = Duration::from_millis(50);

/// Why an in-match session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The server refused us, with its reason
    Rejected(String),
    /// The server ended the session
    ServerDisconnected,
    /// The socket closed without a goodbye
    ConnectionClosed,
    /// We stayed for the configured time and left
    TimeUp,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::Rejected(reason) => write!(f, "Rejected by server: {}", reason),
            SessionEnd::ServerDisconnected => write!(f, "Server ended the session"),
            SessionEnd::ConnectionClosed => write!(f, "Connection to server lost"),
            SessionEnd::TimeUp => write!(f, "Session time over, leaving the match"),
        }
    }
}

/// A bot's stay in one match, from the spawn until someone leaves.
pub struct MatchSession<S> {
    stream: S,
    reader: MessageReader,
    world: WorldMirror,
    bot: BotInput,
    duration: Duration,
    inputs_sent: u64,
}

impl MatchSession<TcpStream> {
    /// Takes over the socket the matchmaker handshaked on.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn from_std(stream: std::net::TcpStream, duration: Duration) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        let stream = TcpStream::from_std(stream)?;
        let spawn = random_spawn(&mut rand::thread_rng());
        Ok(Self::new(stream, spawn, BotInput::new(), duration))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> MatchSession<S> {
    pub fn new(stream: S, spawn: Transform, bot: BotInput, duration: Duration) -> Self {
        Self {
            stream,
            reader: MessageReader::new(),
            world: WorldMirror::new(spawn),
            bot,
            duration,
            inputs_sent: 0,
        }
    }

    pub async fn run(&mut self) -> io::Result<SessionEnd> {
        let spawn = self.world.local().current;
        info!(
            "Spawning at ({:.2}, {:.2}, {:.2})",
            spawn.position.x, spawn.position.y, spawn.position.z
        );
        self.send(&Message::spawn(&spawn)).await?;

        let deadline = sleep(self.duration);
        tokio::pin!(deadline);

        let mut send_interval = interval(SEND_INTERVAL);
        send_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut buffer = [0u8; 4096];

        loop {
            tokio::select! {
                result = self.stream.read(&mut buffer) => {
                    let len = result?;
                    if len == 0 {
                        warn!("Server closed the connection");
                        return Ok(SessionEnd::ConnectionClosed);
                    }
                    self.reader.extend(&buffer[..len]);
                    if let Some(end) = self.process_incoming() {
                        return Ok(end);
                    }
                },

                _ = send_interval.tick() => {
                    let axes = self.bot.next_axes();
                    self.send(&Message::input(axes)).await?;
                    self.inputs_sent += 1;
                },

                _ = &mut deadline => {
                    info!("Leaving the match after {:?}", self.duration);
                    self.send(&Message::disconnect()).await?;
                    return Ok(SessionEnd::TimeUp);
                },
            }
        }
    }

    fn process_incoming(&mut self) -> Option<SessionEnd> {
        loop {
            let drained = self.reader.drain();
            if let Some(e) = &drained.error {
                warn!("Dropping corrupt data from server: {}", e);
            }
            if drained.messages.is_empty() {
                return None;
            }

            let mut batch = Vec::with_capacity(drained.messages.len());
            for msg in drained.messages {
                match msg.kind {
                    MessageKind::Reject => {
                        warn!("Server rejected us: {}", msg.text);
                        self.world.apply_batch(&batch);
                        return Some(SessionEnd::Rejected(msg.text));
                    }
                    MessageKind::Disconnect => {
                        warn!("Server ended the session");
                        self.world.apply_batch(&batch);
                        return Some(SessionEnd::ServerDisconnected);
                    }
                    _ => batch.push(msg),
                }
            }

            debug!("Applying {} messages from server", batch.len());
            self.world.apply_batch(&batch);
        }
    }

    async fn send(&mut self, msg: &Message) -> io::Result<()> {
        self.stream.write_all(&encode(msg)).await
    }

    pub fn world(&self) -> &WorldMirror {
        &self.world
    }

    pub fn inputs_sent(&self) -> u64 {
        self.inputs_sent
    }
}
