//! # Game Client Library
//!
//! This library provides a headless client for the session server: it finds
//! a match through the matchmaking backend, joins the game server it was
//! placed on and then plays as a simple bot until its time is up.
//!
//! ## Architecture Overview
//!
//! A client run has three stages, each owned by one module.
//!
//! ### Region Latency
//! Before asking for a match the client measures its round trip to every
//! candidate region. The backend uses these figures to place the ticket in
//! the closest region that has room.
//!
//! ### Matchmaking
//! The [`matchmaking::Matchmaker`] is an explicit state machine over the
//! backend API: request a ticket, poll it at a fixed interval up to a cap,
//! resolve the placement, connect and send the handshake. Every step reports
//! a human-readable status and the time it next wants to run.
//!
//! ### In-Match Session
//! Once connected, [`network::MatchSession`] spawns the local player, sends
//! bot input at 20 Hz and mirrors the other players from server updates
//! until the server ends the match or the configured stay runs out.
//!
//! ## Module Organization
//!
//! ### API Module (`api`)
//! HTTP client for the two backend operations and their JSON payloads.
//!
//! ### Latency Module (`latency`)
//! Warm-up plus averaged timed requests per region, with a penalty value for
//! regions that cannot be reached.
//!
//! ### Matchmaking Module (`matchmaking`)
//! The ticket and connection state machine, its configuration and errors.
//!
//! ### Game Module (`game`)
//! The [`game::WorldMirror`]: remote players keyed by id, interpolated
//! towards the latest server position.
//!
//! ### Input Module (`input`)
//! Random wandering input that changes direction every 30 sends.
//!
//! ### Network Module (`network`)
//! The async in-match session over the game server socket.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::api::HttpMatchmakingApi;
//! use client::matchmaking::{Matchmaker, MatchmakingConfig, TcpConnector};
//! use client::api::RegionLatency;
//! use std::time::Duration;
//!
//! let api = HttpMatchmakingApi::new("https://api.example.com/Prod", Duration::from_secs(10))?;
//! let latencies = vec![RegionLatency::new("us-east-1", 25.0)];
//! let matchmaker = Matchmaker::new(api, TcpConnector, MatchmakingConfig::default(), latencies);
//!
//! let (placement, _stream) = matchmaker.run_blocking(|status| println!("{}", status))?;
//! println!("playing on {}:{}", placement.host(), placement.port);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod api;
pub mod game;
pub mod input;
pub mod latency;
pub mod matchmaking;
pub mod network;
