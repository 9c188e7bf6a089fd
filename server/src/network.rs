//! Server network layer: request loop, broadcast loop and their lifetime
//!
//! The request loop owns the request/response socket, drains every queued
//! request each pass and answers each one exactly once. In broadcast mode a
//! second loop owns the publish socket and, at the broadcast tick rate,
//! publishes lifecycle events and the positions that changed since the last
//! tick. The two loops share only the [`SessionTable`] and an event queue.

use crate::config::ServerConfig;
use crate::handler::RequestHandler;
use crate::session::SessionTable;
use log::{debug, info, warn};
use shared::utils::timestamp_ms;
use shared::{Broadcast, NetError, ProtocolMode, Publisher, Reply, ReplyChannel, TickThread};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Runs on the request thread
struct RequestLoop {
    channel: ReplyChannel,
    handler: RequestHandler,
    events: Option<mpsc::UnboundedSender<Broadcast>>,
    stale_timeout: Option<Duration>,
    eviction_interval: Duration,
    last_eviction: Instant,
}

impl RequestLoop {
    fn tick(&mut self) {
        while let Some(request) = self.channel.next_request(Duration::ZERO) {
            let response = self.handler.handle(request.body());
            let mut body = response.reply.to_string();
            if !ReplyChannel::reply_fits(&body) {
                warn!(
                    "Reply to {:?} is {} bytes, over the datagram limit",
                    request.body(),
                    body.len()
                );
                body = Reply::error("State too large").to_string();
            }
            debug!("{} <- {:?} -> {:?}", request.from(), request.body(), body);

            self.channel.reply(request, &body);
            if let Some(event) = response.event {
                self.queue_event(event);
            }
        }

        self.evict_stale_sessions();
    }

    fn queue_event(&self, event: Broadcast) {
        if let Some(events) = &self.events {
            if events.send(event).is_err() {
                warn!("Broadcast loop is gone, dropping lifecycle event");
            }
        }
    }

    fn evict_stale_sessions(&mut self) {
        let Some(timeout) = self.stale_timeout else {
            return;
        };
        if self.last_eviction.elapsed() < self.eviction_interval {
            return;
        }
        self.last_eviction = Instant::now();

        for id in self.handler.sessions().evict_stale(timeout) {
            self.queue_event(Broadcast::ClientDisconnected { id });
        }
    }
}

/// Runs on the broadcast thread
struct BroadcastLoop {
    publisher: Publisher,
    sessions: Arc<SessionTable>,
    events: mpsc::UnboundedReceiver<Broadcast>,
    subscriber_timeout: Option<Duration>,
    refresh_interval: Option<Duration>,
    last_refresh: Instant,
}

impl BroadcastLoop {
    fn new(
        publisher: Publisher,
        sessions: Arc<SessionTable>,
        events: mpsc::UnboundedReceiver<Broadcast>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            publisher,
            sessions,
            events,
            subscriber_timeout: config.subscriber_timeout,
            refresh_interval: config.refresh_interval,
            last_refresh: Instant::now(),
        }
    }

    fn tick(&mut self) {
        let mut messages = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            messages.push(event);
        }

        // Republish everyone now and then so a subscriber that lost a
        // datagram converges again
        if let Some(interval) = self.refresh_interval {
            if self.last_refresh.elapsed() >= interval {
                self.last_refresh = Instant::now();
                self.sessions.mark_all_dirty();
            }
        }

        let timestamp_ms = timestamp_ms();
        messages.extend(
            self.sessions
                .take_dirty()
                .into_iter()
                .map(|s| Broadcast::PositionUpdate {
                    id: s.id,
                    x: s.x,
                    y: s.y,
                    timestamp_ms,
                }),
        );

        // Subscriptions are absorbed after the work is collected: a client
        // subscribes before it connects, so its subscription is already
        // queued by the time its CONNECT shows up here.
        self.publisher.accept_subscriptions();
        if let Some(timeout) = self.subscriber_timeout {
            self.publisher.expire_subscribers(timeout);
        }
        if messages.is_empty() {
            return;
        }

        debug!(
            "Publishing {} messages to {} subscribers",
            messages.len(),
            self.publisher.subscriber_count()
        );
        for message in &messages {
            self.publisher.publish(&message.to_string());
        }
    }
}

/// The replication server: owns the session table and the threads serving it
pub struct Server {
    config: ServerConfig,
    sessions: Arc<SessionTable>,
    request_addr: Option<SocketAddr>,
    broadcast_addr: Option<SocketAddr>,
    request_thread: Option<TickThread>,
    broadcast_thread: Option<TickThread>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let sessions = Arc::new(SessionTable::new(config.max_clients));
        Self {
            config,
            sessions,
            request_addr: None,
            broadcast_addr: None,
            request_thread: None,
            broadcast_thread: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    /// Binds the sockets and spawns the server threads, then returns
    ///
    /// Fails with [`NetError::Transport`] when a socket cannot be bound, in
    /// which case nothing is left running. Starting a running server is a
    /// no-op.
    pub fn start(&mut self) -> Result<(), NetError> {
        if self.is_running() {
            warn!("Server already running");
            return Ok(());
        }

        let mode = self.config.mode;
        let replies = ReplyChannel::bind(self.config.request_addr.as_str())?;
        let request_addr = replies.local_addr();

        let publisher = match mode {
            ProtocolMode::Broadcast => Some(Publisher::bind(self.config.broadcast_addr.as_str())?),
            ProtocolMode::Polling => None,
        };
        let broadcast_addr = publisher.as_ref().and_then(Publisher::local_addr);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut requests = RequestLoop {
            channel: replies,
            handler: RequestHandler::new(Arc::clone(&self.sessions), mode),
            events: publisher.is_some().then_some(event_tx),
            stale_timeout: self.config.stale_timeout,
            eviction_interval: self.config.eviction_interval,
            last_eviction: Instant::now(),
        };
        let request_thread =
            TickThread::spawn("server-requests", self.config.poll_interval, move || {
                requests.tick()
            })?;

        let broadcast_thread = match publisher {
            Some(publisher) => {
                let mut broadcasts = BroadcastLoop::new(
                    publisher,
                    Arc::clone(&self.sessions),
                    event_rx,
                    &self.config,
                );
                Some(TickThread::spawn(
                    "server-broadcast",
                    self.config.tick_interval,
                    move || broadcasts.tick(),
                )?)
            }
            None => None,
        };

        self.request_addr = request_addr;
        self.broadcast_addr = broadcast_addr;
        self.request_thread = Some(request_thread);
        self.broadcast_thread = broadcast_thread;

        match broadcast_addr {
            Some(addr) => info!(
                "Server started in {} mode: requests on {:?}, broadcasts on {}",
                mode, request_addr, addr
            ),
            None => info!("Server started in {} mode on {:?}", mode, request_addr),
        }
        Ok(())
    }

    /// Stops and joins every server thread. Safe to call more than once.
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }

        for thread in [&self.request_thread, &self.broadcast_thread]
            .into_iter()
            .flatten()
        {
            thread.signal_stop();
        }
        if let Some(mut thread) = self.request_thread.take() {
            thread.stop();
        }
        if let Some(mut thread) = self.broadcast_thread.take() {
            thread.stop();
        }

        self.request_addr = None;
        self.broadcast_addr = None;
        info!("Server stopped with {} sessions live", self.sessions.len());
    }

    pub fn is_running(&self) -> bool {
        self.request_thread.is_some()
    }

    /// Bound request endpoint, if running
    pub fn request_addr(&self) -> Option<SocketAddr> {
        self.request_addr
    }

    /// Bound broadcast endpoint, if running in broadcast mode
    pub fn broadcast_addr(&self) -> Option<SocketAddr> {
        self.broadcast_addr
    }

    pub fn client_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}
