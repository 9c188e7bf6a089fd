//! # Replication Client Library
//!
//! This library provides the client side of the state-replication layer: the
//! handshake with the server, periodic submission of the local player's
//! position, and reconciliation of the entities that stand in for every
//! other connected player.
//!
//! ## Architecture Overview
//!
//! Networking runs on its own thread so rendering and physics never wait on
//! a socket. The two sides meet in exactly two places: the position the game
//! thread records for the next tick, and the copy of remote state the network
//! thread keeps current.
//!
//! ### Authority
//! The server is the only source of truth about peers. The client never
//! predicts them and never writes server data onto its own entity; it only
//! creates, moves and destroys stand-ins so the local world matches the last
//! state the server reported.
//!
//! ### Protocol Variants
//! In polling mode each tick sends `UPDATE_AND_GET_STATE` and the reply is a
//! full snapshot. In broadcast mode the client pushes `POSITION` only when it
//! moved (plus an occasional keep-alive) and learns about peers from the
//! server's publish channel, discarding position messages older than ones it
//! already applied.
//!
//! ## Module Organization
//!
//! - [`network`]: [`network::Client`], the protocol state machine
//! - [`replication`]: per-peer buffer filled from snapshots and broadcasts
//! - [`reconcile`]: peer-to-entity diffing against an [`reconcile::EntityStore`]
//! - [`driver`]: the thread calling `Client::update` every tick
//! - [`manager`]: [`manager::NetworkManager`], the facade gameplay code uses
//! - [`game`]: an in-memory entity world for headless runs
//! - [`input`]: random-walk input standing in for a keyboard
//! - [`config`]: [`config::ClientConfig`]
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ClientConfig;
//! use client::game::GameWorld;
//! use client::manager::NetworkManager;
//!
//! let mut world = GameWorld::new();
//! let mut network = NetworkManager::new(ClientConfig::default());
//!
//! if network.connect("127.0.0.1") {
//!     let (x, y) = network.client().spawn_position().unwrap_or((0.0, 0.0));
//!     let player = world.spawn_player(x, y);
//!     network.set_local_entity(player);
//!
//!     loop {
//!         // ... move the player ...
//!
//!         // Publish our position, create/move/remove peer entities
//!         let report = network.sync(&mut world);
//!         if !report.created.is_empty() {
//!             println!("new peers: {:?}", report.created);
//!         }
//!     }
//! }
//! ```

pub mod config;
pub mod driver;
pub mod game;
pub mod input;
pub mod manager;
pub mod network;
pub mod reconcile;
pub mod replication;
