//! # Replication Server Library
//!
//! This library provides the authoritative side of the state-replication
//! layer. It owns every connected client's last-known position, answers the
//! text protocol defined in [`shared::message`], and (in broadcast mode)
//! republishes changes to every subscriber at a fixed tick rate.
//!
//! ## Core Responsibilities
//!
//! ### Session Authority
//! The [`session::SessionTable`] is the single source of truth for where every
//! client is. Clients only ever report their own position; what they learn
//! about peers always comes from the table.
//!
//! ### Request Handling
//! Every request is parsed, applied and answered exactly once, including
//! malformed ones, which get an `ERROR <reason>` reply and leave the table
//! untouched. Requests naming unknown ids are harmless no-ops since clients
//! can race a disconnect against an update.
//!
//! ### Liveness
//! Sessions that stop sending requests are evicted after a configurable
//! silence, so a crashed client does not linger in every snapshot.
//!
//! ## Threads
//!
//! - **Request loop** (`server-requests`): polls the request socket every few
//!   milliseconds, drains everything queued, runs eviction checks
//! - **Broadcast loop** (`server-broadcast`, broadcast mode only): absorbs
//!   subscriptions, publishes lifecycle events in arrival order, then one
//!   timestamped `POSITION_UPDATE` per session that moved
//!
//! The session table is the only state both threads touch; each table
//! operation is one short critical section and no lock is held across
//! socket I/O.
//!
//! ## Module Organization
//!
//! - [`session`]: session records, the table, id assignment, eviction
//! - [`handler`]: request parsing and dispatch into the table
//! - [`config`]: [`config::ServerConfig`]
//! - [`network`]: the [`network::Server`] and its loops
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use shared::ProtocolMode;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(ServerConfig {
//!         mode: ProtocolMode::Broadcast,
//!         ..ServerConfig::default()
//!     });
//!
//!     // Binds both sockets and spawns the loops; returns immediately
//!     server.start()?;
//!
//!     // ... run until shutdown is requested ...
//!
//!     // Joins every thread and releases the sockets
//!     server.stop();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod handler;
pub mod network;
pub mod session;
