//! # Session Server Library
//!
//! This library provides the authoritative server for a single multiplayer
//! game session. Clients connect over TCP, prove they were placed in this
//! session with a player-session token, and from then on exchange spawn,
//! input and position messages that the server relays to every peer.
//!
//! ## Core Responsibilities
//!
//! ### Connection Management
//! Every client connection is owned by the [`registry::ConnectionRegistry`].
//! It enforces a hard capacity, rejects latecomers with a readable reason,
//! detects half-closed peers and hands out player ids that are never reused
//! while the process runs.
//!
//! ### Authoritative Player State
//! The [`players::PlayerDirectory`] holds each spawned player's transform and
//! latest input. Input-driven movement is computed on the server; positions
//! reported by clients are relayed as-is.
//!
//! ### Session Lifecycle
//! A process hosts exactly one session. [`lifecycle::SessionLifecycle`]
//! starts it once enough connections are ready, and ends it when it empties
//! out or when players fail to show up within the grace period.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Tick Loop
//! [`network::SessionServer`] runs a synchronous tick at a fixed rate over
//! non-blocking sockets. Accepting, reading, dispatching, simulating,
//! broadcasting and cleanup all happen in a fixed order inside one tick, so
//! there is no shared mutable state and no locking.
//!
//! ### External Collaborators
//! The hosting platform is reached through the [`host::SessionHost`] trait and
//! metrics through [`metrics::MetricsSink`]. Both are boxed trait objects so
//! a standalone process, a managed fleet and the test suite can each supply
//! their own.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::host::LocalHost;
//! use server::metrics::NullMetrics;
//! use server::network::SessionServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = SessionServer::bind(
//!         ServerConfig::default(),
//!         Box::new(LocalHost::new()),
//!         Box::new(NullMetrics),
//!     )?;
//!
//!     let reason = server.run(tokio::signal::ctrl_c()).await;
//!     println!("session ended: {}", reason);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod host;
pub mod lifecycle;
pub mod metrics;
pub mod network;
pub mod players;
pub mod registry;
pub mod transport;
