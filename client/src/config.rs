use shared::{
    ProtocolMode, DEFAULT_BROADCAST_PORT, DEFAULT_REQUEST_PORT, REQUEST_TIMEOUT, TICK_INTERVAL,
};
use std::time::Duration;

/// Runtime settings for a [`crate::network::Client`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub request_port: u16,
    pub broadcast_port: u16,
    /// Must match the server's mode
    pub mode: ProtocolMode,
    /// Minimum spacing between two state updates
    pub tick_interval: Duration,
    /// Bounded wait for every reply, including the handshake
    pub request_timeout: Duration,
    pub disconnect_attempts: u32,
    pub disconnect_backoff: Duration,
    /// Longest a stationary client stays silent in broadcast mode. The
    /// broadcast subscription is renewed at the same rate.
    pub keepalive_interval: Duration,
    /// Broadcast mode drops a peer not heard about for this long. Keep it
    /// above the server's refresh interval.
    pub peer_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_port: DEFAULT_REQUEST_PORT,
            broadcast_port: DEFAULT_BROADCAST_PORT,
            mode: ProtocolMode::default(),
            tick_interval: TICK_INTERVAL,
            request_timeout: REQUEST_TIMEOUT,
            disconnect_attempts: 3,
            disconnect_backoff: Duration::from_millis(100),
            keepalive_interval: Duration::from_secs(1),
            peer_timeout: Duration::from_secs(3),
        }
    }
}

impl ClientConfig {
    /// Settings for a server whose endpoints were bound to ephemeral ports
    pub fn for_ports(mode: ProtocolMode, request_port: u16, broadcast_port: u16) -> Self {
        Self {
            request_port,
            broadcast_port,
            mode,
            ..Self::default()
        }
    }
}
