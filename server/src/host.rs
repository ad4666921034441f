//! Seam towards the platform that hosts the server process.
//!
//! The server only needs three things from its host: report readiness on a
//! port and receive a session, validate player session tokens, and be told
//! when the session is over. [`LocalHost`] provides those for a standalone
//! process.

use log::{info, warn};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("player session rejected: {0}")]
    Rejected(String),
    #[error("host not ready: {0}")]
    NotReady(String),
}

/// The session assigned to this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSession {
    pub session_id: String,
    pub port: u16,
}

impl GameSession {
    /// Last `/`-separated segment of the session id.
    pub fn short_id(&self) -> &str {
        self.session_id
            .rsplit('/')
            .next()
            .unwrap_or(&self.session_id)
    }
}

pub trait SessionHost {
    /// Announces that the process listens on `port` and returns the session it should run.
    fn process_ready(&mut self, port: u16) -> Result<GameSession, HostError>;

    fn accept_player_session(&mut self, token: &str) -> Result<(), HostError>;

    fn terminate_session(&mut self);
}

/// Standalone host: one session per process, single-use tokens.
#[derive(Debug, Default)]
pub struct LocalHost {
    session: Option<GameSession>,
    accepted: HashSet<String>,
    terminated: bool,
}

impl LocalHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<&GameSession> {
        self.session.as_ref()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl SessionHost for LocalHost {
    fn process_ready(&mut self, port: u16) -> Result<GameSession, HostError> {
        if self.terminated {
            return Err(HostError::NotReady("session already terminated".to_string()));
        }
        let session = GameSession {
            session_id: format!("local/{}/{}", port, std::process::id()),
            port,
        };
        info!("Process ready on port {}, session {}", port, session.session_id);
        self.session = Some(session.clone());
        Ok(session)
    }

    fn accept_player_session(&mut self, token: &str) -> Result<(), HostError> {
        if self.session.is_none() || self.terminated {
            return Err(HostError::NotReady("no active session".to_string()));
        }
        if token.is_empty() {
            return Err(HostError::Rejected("empty player session token".to_string()));
        }
        if !self.accepted.insert(token.to_string()) {
            return Err(HostError::Rejected(format!("token {} already used", token)));
        }
        Ok(())
    }

    fn terminate_session(&mut self) {
        if self.terminated {
            warn!("Session termination requested twice");
            return;
        }
        self.terminated = true;
        info!("Session terminated");
    }
}
