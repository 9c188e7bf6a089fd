//! Error taxonomy shared by the transport and protocol layers

use thiserror::Error;

/// Failures raised at the channel/protocol boundary.
///
/// Only socket acquisition (`bind`, `connect`, server start) propagates these
/// to callers. Steady-state traffic converts them into `false`/`None` and a
/// log line so nothing crosses into gameplay code.
#[derive(Debug, Error)]
pub enum NetError {
    /// Socket create/bind/connect/send failed at the OS level
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),

    /// No reply arrived within the bounded wait
    #[error("no reply within {0:?}")]
    Timeout(std::time::Duration),

    /// Text payload could not be parsed (wrong command, arity or numbers)
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Frame envelope could not be encoded or decoded
    #[error("frame codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// The peer answered with `ERROR <reason>`
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The channel was already released
    #[error("channel closed")]
    Closed,
}

impl NetError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        NetError::Malformed(reason.into())
    }
}
