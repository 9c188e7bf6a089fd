//! # Shared Replication Protocol
//!
//! Types and plumbing used by both ends of the state-replication layer: the
//! text wire protocol, the UDP transport that carries it, the error taxonomy,
//! and the tick pacing both roles run on.
//!
//! ## Protocol variants
//!
//! A server and its clients agree on one [`ProtocolMode`]:
//!
//! - **Polling**: each client tick sends `UPDATE_AND_GET_STATE <id> <x> <y>`
//!   and the reply carries every live session. One request channel, no
//!   broadcast thread.
//! - **Broadcast**: clients push `POSITION <id> <x> <y>` only when they move,
//!   and the server publishes `CLIENT_CONNECTED`, `CLIENT_DISCONNECTED` and
//!   timestamped `POSITION_UPDATE` messages on a second, publish/subscribe
//!   channel at a fixed rate.
//!
//! ## Modules
//!
//! - [`message`]: request, reply and broadcast messages with their text form
//! - [`transport`]: UDP channel, frame envelope, request/reply endpoints
//! - [`pubsub`]: publisher and subscriber endpoints
//! - [`tick`]: fixed-rate pacing and tick threads
//! - [`error`]: [`NetError`]

pub mod error;
pub mod message;
pub mod pubsub;
pub mod tick;
pub mod transport;
pub mod utils;

pub use error::NetError;
pub use message::{Broadcast, RemoteState, Reply, Request};
pub use pubsub::{Publisher, Subscriber};
pub use tick::{TickThread, Ticker};
pub use transport::{Channel, Frame, FrameKind, PendingRequest, ReplyChannel, RequestChannel};

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_REQUEST_PORT: u16 = 5555;
pub const DEFAULT_BROADCAST_PORT: u16 = 5556;

/// ~60Hz
pub const TICK_INTERVAL: Duration = Duration::from_millis(16);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Reserved: never assigned to a session
pub const INVALID_CLIENT_ID: u32 = 0;

/// Every session spawns at the origin
pub const SPAWN_X: f32 = 0.0;
pub const SPAWN_Y: f32 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolMode {
    #[default]
    Polling,
    Broadcast,
}

impl fmt::Display for ProtocolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolMode::Polling => write!(f, "polling"),
            ProtocolMode::Broadcast => write!(f, "broadcast"),
        }
    }
}

impl FromStr for ProtocolMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "polling" | "poll" => Ok(ProtocolMode::Polling),
            "broadcast" | "pubsub" => Ok(ProtocolMode::Broadcast),
            other => Err(format!(
                "unknown protocol mode '{}', expected 'polling' or 'broadcast'",
                other
            )),
        }
    }
}
