//! # Combat Arbitration Server Library
//!
//! This library provides the authoritative server for two-party combat
//! sessions between independently moving clients. Clients never hold a
//! connection open: every interaction is a short HTTP/JSON request, and all
//! state a client needs to observe comes back in the replies to its own
//! periodic position reports.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Pairing
//! The server alone decides whether two players enter combat. A request names
//! exactly one pair; the arbiter validates both records against server-held
//! positions and commits the lock on both sides in one critical section, so
//! no player is ever booked into two combats and no reader ever sees a
//! one-sided pairing.
//!
//! ### Lazy Expiry
//! Clients may disappear mid-handshake. Abandoned locks are not swept by a
//! timer; they are unwound the next time any request touches either player,
//! before that request makes its own decision.
//!
//! ### State Reconciliation
//! Position reports return the caller's own combat state. A client that was
//! locked by its peer's request discovers it there, on its next report.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! In-memory player records and the transition primitives that keep them
//! symmetric.
//!
//! ### Arbiter Module (`arbiter`)
//! Collision request validation, confirm and finalize.
//!
//! ### Position Module (`position`)
//! Position reports and peer snapshots.
//!
//! ### HTTP Module (`http`)
//! Routes, handlers and the `Server` that binds them to a socket and runs the
//! idle reaper.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::http::Server;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let server = Server::new("127.0.0.1:8080", ServerConfig::default()).await?;
//!     server.run().await
//! }
//! ```

pub mod arbiter;
pub mod config;
pub mod error;
pub mod http;
pub mod position;
pub mod registry;
