//! # Combat Arbitration Client Library
//!
//! This library provides the client half of the two-party combat handshake.
//! A client detects on its own that a peer is close enough, asks the server
//! to lock the pair, and confirms once the server agrees. Everything it knows
//! about other players arrives in the replies to its periodic position
//! reports; there is no push channel.
//!
//! ## Architecture Overview
//!
//! ### Proximity Detection
//! Every scan tick the detector walks the cached peer snapshot and picks at
//! most one candidate: the nearest FREE peer whose inset bounding box
//! overlaps ours by a meaningful area. Peers are debounced so a rejected
//! candidate is not retried on every frame.
//!
//! ### Handshake State Machine
//! `Idle -> Requesting -> InCombat -> Idle`, with a short `Cooldown` after a
//! rejection or a failed call. Collision requests are never retried; the next
//! scan simply re-evaluates.
//!
//! ### Server Authority
//! The server-reported own state wins over the local one. A player locked by
//! a peer's request discovers it in its next position report, confirms, and
//! goes straight into combat without ever having requested.
//!
//! ## Module Organization
//!
//! ### Proximity Module (`proximity`)
//! Candidate search and bounding-box geometry.
//!
//! ### Collision Module (`collision`)
//! Local state machine, reconciliation with the server, combat events.
//!
//! ### Network Module (`network`)
//! JSON calls to the server with timeouts and position-report retry.
//!
//! ### Scheduler Module (`scheduler`)
//! Single-flight periodic tasks with explicit start and stop.
//!
//! ### Session Module (`session`)
//! Joins a server and wires the position push and proximity scan together.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::collision::CombatEvent;
//! use client::session::{Session, SessionConfig};
//! use shared::Position;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), client::error::ClientError> {
//!     let (mut session, mut events) =
//!         Session::join(SessionConfig::default(), "kimo", Position::new(100.0, 100.0)).await?;
//!     session.start();
//!
//!     while let Some(event) = events.recv().await {
//!         if let CombatEvent::Started { peer, .. } = event {
//!             println!("fighting {}", peer);
//!             session.finalize().await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod collision;
pub mod error;
pub mod network;
pub mod proximity;
pub mod scheduler;
pub mod session;
