//! Client side of the connection protocol
//!
//! A [`Client`] is shared between the thread that ticks the network and the
//! game thread that submits positions and reads peers, so every method takes
//! `&self`. The request channel allows one outstanding request at a time; it
//! lives behind its own mutex, which every socket operation holds for the
//! full request/reply exchange.

use crate::config::ClientConfig;
use crate::replication::{OtherClientState, ReplicationState};
use log::{debug, info, warn};
use shared::utils::lock;
use shared::{
    Broadcast, NetError, ProtocolMode, Reply, Request, RequestChannel, Subscriber,
    INVALID_CLIENT_ID,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Instant;

#[derive(Debug, Default)]
struct LocalState {
    x: f32,
    y: f32,
    spawn: (f32, f32),
    /// Position changed since it was last sent
    dirty: bool,
    last_sent: Option<Instant>,
}

/// Everything a successful handshake produces
struct Handshake {
    channel: RequestChannel,
    subscriber: Option<Subscriber>,
    id: u32,
    spawn: (f32, f32),
}

pub struct Client {
    config: ClientConfig,
    connected: AtomicBool,
    disconnecting: AtomicBool,
    client_id: AtomicU32,
    requests: Mutex<Option<RequestChannel>>,
    subscriber: Mutex<Option<Subscriber>>,
    local: Mutex<LocalState>,
    replication: Mutex<ReplicationState>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            connected: AtomicBool::new(false),
            disconnecting: AtomicBool::new(false),
            client_id: AtomicU32::new(INVALID_CLIENT_ID),
            requests: Mutex::new(None),
            subscriber: Mutex::new(None),
            local: Mutex::new(LocalState::default()),
            replication: Mutex::new(ReplicationState::default()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Performs the handshake with the server on `host`
    ///
    /// Blocks up to the request timeout. Any reply other than
    /// `CONNECTED <id> <x> <y>` is a failure and releases every socket opened
    /// for the attempt.
    pub fn connect(&self, host: &str) -> bool {
        let mut requests = lock(&self.requests);
        if self.is_connected() {
            info!("Already connected as client {}", self.client_id());
            return true;
        }

        info!("Connecting to {} ({} mode)", host, self.config.mode);
        let handshake = match self.handshake(host) {
            Ok(handshake) => handshake,
            Err(e) => {
                warn!("Failed to connect to {}: {}", host, e);
                return false;
            }
        };

        let (x, y) = handshake.spawn;
        *lock(&self.subscriber) = handshake.subscriber;
        *lock(&self.replication) = ReplicationState::new(handshake.id);
        *lock(&self.local) = LocalState {
            x,
            y,
            spawn: handshake.spawn,
            ..LocalState::default()
        };
        *requests = Some(handshake.channel);

        self.client_id.store(handshake.id, Ordering::Release);
        self.connected.store(true, Ordering::Release);
        info!("Connected as client {} at ({}, {})", handshake.id, x, y);
        true
    }

    fn handshake(&self, host: &str) -> Result<Handshake, NetError> {
        let mut channel =
            RequestChannel::connect((host, self.config.request_port), self.config.request_timeout)?;

        // Subscribe first so no lifecycle message about us or later peers is missed
        let subscriber = match self.config.mode {
            ProtocolMode::Broadcast => {
                Some(Subscriber::connect((host, self.config.broadcast_port))?)
            }
            ProtocolMode::Polling => None,
        };

        let body = channel.request(&Request::Connect.to_string())?;
        match body.parse::<Reply>()? {
            Reply::Connected { id, x, y } if id != INVALID_CLIENT_ID => Ok(Handshake {
                channel,
                subscriber,
                id,
                spawn: (x, y),
            }),
            Reply::Error(reason) => Err(NetError::Rejected(reason)),
            other => Err(NetError::malformed(format!(
                "Unexpected handshake reply: {}",
                other
            ))),
        }
    }

    /// Tells the server goodbye and releases every socket
    ///
    /// The goodbye is best effort: it is retried a few times, but local
    /// teardown happens whether or not the server acknowledges it.
    pub fn disconnect(&self) {
        if !self.is_connected() || self.disconnecting.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Disconnecting from server...");

        // Blocks until an in-flight tick finishes its exchange, which the
        // request timeout bounds
        let mut requests = lock(&self.requests);
        if let Some(mut channel) = requests.take() {
            let id = self.client_id();
            if id != INVALID_CLIENT_ID {
                self.send_disconnect(&mut channel, id);
            }
            channel.close();
        }

        if let Some(mut subscriber) = lock(&self.subscriber).take() {
            subscriber.close();
        }
        lock(&self.replication).clear();

        self.client_id.store(INVALID_CLIENT_ID, Ordering::Release);
        self.connected.store(false, Ordering::Release);
        self.disconnecting.store(false, Ordering::Release);
        info!("Disconnected from server");
    }

    fn send_disconnect(&self, channel: &mut RequestChannel, id: u32) -> bool {
        let request = Request::Disconnect { id }.to_string();
        let attempts = self.config.disconnect_attempts.max(1);

        for attempt in 1..=attempts {
            match channel.request(&request) {
                Ok(body) if matches!(body.parse::<Reply>(), Ok(Reply::Disconnected)) => {
                    info!("Server acknowledged disconnect of client {}", id);
                    return true;
                }
                Ok(body) => warn!("Unexpected reply to DISCONNECT: {}", body),
                Err(e) => warn!("Disconnect attempt {}/{} failed: {}", attempt, attempts, e),
            }

            if attempt < attempts {
                thread::sleep(self.config.disconnect_backoff);
            }
        }

        warn!("Server never acknowledged disconnect after {} attempts", attempts);
        false
    }

    /// One network tick
    ///
    /// Applies queued broadcasts, then exchanges state with the server if a
    /// full tick interval has passed since the last send. Does nothing while
    /// disconnected or disconnecting.
    pub fn update(&self) {
        if !self.is_active() {
            return;
        }

        if self.config.mode == ProtocolMode::Broadcast {
            self.drain_broadcasts();
        }

        let Some((x, y)) = self.take_due_position() else {
            return;
        };

        let mut requests = lock(&self.requests);
        // A disconnect may have started while we waited for the channel
        if !self.is_active() {
            return;
        }
        let Some(channel) = requests.as_mut() else {
            return;
        };

        let id = self.client_id();
        match self.config.mode {
            ProtocolMode::Polling => self.exchange_state(channel, id, x, y),
            ProtocolMode::Broadcast => self.push_position(channel, id, x, y),
        }
    }

    fn take_due_position(&self) -> Option<(f32, f32)> {
        let mut local = lock(&self.local);
        let now = Instant::now();

        if let Some(last) = local.last_sent {
            if now.duration_since(last) < self.config.tick_interval {
                return None;
            }
        }

        if self.config.mode == ProtocolMode::Broadcast && !local.dirty {
            let keepalive_due = local
                .last_sent
                .map_or(true, |last| now.duration_since(last) >= self.config.keepalive_interval);
            if !keepalive_due {
                return None;
            }
        }

        local.dirty = false;
        local.last_sent = Some(now);
        Some((local.x, local.y))
    }

    fn exchange_state(&self, channel: &mut RequestChannel, id: u32, x: f32, y: f32) {
        let request = Request::UpdateAndGetState { id, x, y }.to_string();
        match channel.request(&request) {
            Ok(body) => self.apply_state_reply(&body),
            Err(NetError::Timeout(after)) => debug!("State request timed out after {:?}", after),
            Err(e) => warn!("State request failed: {}", e),
        }
    }

    fn apply_state_reply(&self, body: &str) {
        let states = match body.parse::<Reply>() {
            Ok(reply) => reply.into_states(),
            Err(e) => {
                warn!("Discarding state reply: {}", e);
                return;
            }
        };

        match states {
            Some(states) => {
                let mut replication = lock(&self.replication);
                if self.is_active() {
                    replication.apply_snapshot(&states);
                }
            }
            None => warn!("Unexpected server response: {}", body),
        }
    }

    fn push_position(&self, channel: &mut RequestChannel, id: u32, x: f32, y: f32) {
        let request = Request::Position { id, x, y }.to_string();
        match channel.request(&request) {
            Ok(body) if matches!(body.parse::<Reply>(), Ok(Reply::Ack)) => {}
            Ok(body) => warn!("Unexpected reply to POSITION: {}", body),
            Err(e) => {
                debug!("Position update failed: {}", e);
                // Resend on the next tick
                lock(&self.local).dirty = true;
            }
        }
    }

    fn drain_broadcasts(&self) {
        let messages = match lock(&self.subscriber).as_mut() {
            Some(subscriber) => {
                // A lost Subscribe, or a server that forgot us, heals here
                subscriber.renew_after(self.config.keepalive_interval);
                subscriber.drain()
            }
            None => return,
        };

        let mut replication = lock(&self.replication);
        if !self.is_active() {
            return;
        }
        for body in messages {
            match body.parse::<Broadcast>() {
                Ok(message) => {
                    replication.apply_broadcast(&message);
                }
                Err(e) => warn!("Discarding broadcast {:?}: {}", body, e),
            }
        }

        for id in replication.expire_silent(self.config.peer_timeout) {
            info!("No news of client {} for {:?}, dropping it", id, self.config.peer_timeout);
        }
    }

    /// Records the local position for the next tick. Performs no I/O.
    pub fn send_position(&self, x: f32, y: f32) {
        if !self.is_connected() {
            return;
        }

        let mut local = lock(&self.local);
        if local.x != x || local.y != y {
            local.x = x;
            local.y = y;
            local.dirty = true;
        }
    }

    /// Copy of the last known state of every peer, never including this client
    pub fn other_clients(&self) -> HashMap<u32, OtherClientState> {
        lock(&self.replication).others().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn is_active(&self) -> bool {
        self.is_connected() && !self.disconnecting.load(Ordering::Acquire)
    }

    /// Assigned id, or 0 while disconnected
    pub fn client_id(&self) -> u32 {
        self.client_id.load(Ordering::Acquire)
    }

    /// Spawn coordinates received in the handshake
    pub fn spawn_position(&self) -> Option<(f32, f32)> {
        if !self.is_connected() {
            return None;
        }
        Some(lock(&self.local).spawn)
    }

    pub fn local_position(&self) -> (f32, f32) {
        let local = lock(&self.local);
        (local.x, local.y)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}
