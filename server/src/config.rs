use shared::{ProtocolMode, DEFAULT_BROADCAST_PORT, DEFAULT_REQUEST_PORT, TICK_INTERVAL};
use std::time::Duration;

/// Runtime settings for a [`crate::network::Server`]
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the request/response channel binds to
    pub request_addr: String,
    /// Address the publish channel binds to (broadcast mode only)
    pub broadcast_addr: String,
    pub mode: ProtocolMode,
    /// Period of the broadcast loop
    pub tick_interval: Duration,
    /// Period of the request loop; every queued request is drained each pass
    pub poll_interval: Duration,
    pub max_clients: usize,
    /// Sessions silent for longer than this are evicted. `None` keeps them forever.
    pub stale_timeout: Option<Duration>,
    pub eviction_interval: Duration,
    /// Broadcast subscribers that stop renewing are dropped after this long.
    /// Clients renew every keep-alive interval.
    pub subscriber_timeout: Option<Duration>,
    /// How often every live session is republished in broadcast mode
    pub refresh_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_addr: format!("0.0.0.0:{}", DEFAULT_REQUEST_PORT),
            broadcast_addr: format!("0.0.0.0:{}", DEFAULT_BROADCAST_PORT),
            mode: ProtocolMode::default(),
            tick_interval: TICK_INTERVAL,
            poll_interval: Duration::from_millis(10),
            max_clients: 32,
            stale_timeout: Some(Duration::from_secs(10)),
            eviction_interval: Duration::from_secs(1),
            subscriber_timeout: Some(Duration::from_secs(5)),
            refresh_interval: Some(Duration::from_secs(1)),
        }
    }
}

impl ServerConfig {
    /// Loopback endpoints on ephemeral ports
    pub fn loopback(mode: ProtocolMode) -> Self {
        Self {
            request_addr: "127.0.0.1:0".to_string(),
            broadcast_addr: "127.0.0.1:0".to_string(),
            mode,
            ..Self::default()
        }
    }
}
