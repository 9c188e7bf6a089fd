//! Publish/subscribe channel for the broadcast protocol variant
//!
//! UDP has no connection to subscribe over, so a subscriber announces itself
//! with a `Subscribe` frame sent to the publisher's endpoint and withdraws
//! with `Unsubscribe` when it closes. The publisher fans each message out to
//! every address it has recorded. Subscriptions are soft state: a subscriber
//! repeats its `Subscribe` now and then, and the publisher forgets addresses
//! that stop doing so.

use crate::error::NetError;
use crate::transport::{Channel, Frame, FrameKind};
use log::{debug, info};
use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

/// Server side: owns the broadcast socket and the subscriber list
#[derive(Debug)]
pub struct Publisher {
    channel: Channel,
    /// Subscriber address and when it last (re)subscribed
    subscribers: HashMap<SocketAddr, Instant>,
    next_sequence: u32,
}

impl Publisher {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, NetError> {
        Ok(Self {
            channel: Channel::bind(addr)?,
            subscribers: HashMap::new(),
            next_sequence: 1,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.channel.local_addr()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Drains queued subscribe/unsubscribe frames without blocking.
    /// Returns the subscriber count afterwards.
    pub fn accept_subscriptions(&mut self) -> usize {
        while let Some((frame, from)) = self.channel.receive_nonblocking() {
            match frame.kind {
                FrameKind::Subscribe => {
                    if self.subscribers.insert(from, Instant::now()).is_none() {
                        info!("Subscriber {} joined ({} total)", from, self.subscribers.len());
                    }
                }
                FrameKind::Unsubscribe => {
                    if self.subscribers.remove(&from).is_some() {
                        info!("Subscriber {} left ({} total)", from, self.subscribers.len());
                    }
                }
                other => debug!("Ignoring {:?} frame from {} on broadcast channel", other, from),
            }
        }
        self.subscribers.len()
    }

    /// Forgets subscribers that have not renewed within `timeout`
    pub fn expire_subscribers(&mut self, timeout: Duration) -> Vec<SocketAddr> {
        let expired: Vec<SocketAddr> = self
            .subscribers
            .iter()
            .filter(|(_, seen)| seen.elapsed() > timeout)
            .map(|(addr, _)| *addr)
            .collect();

        for addr in &expired {
            self.subscribers.remove(addr);
            info!(
                "Subscriber {} stopped renewing, dropped ({} left)",
                addr,
                self.subscribers.len()
            );
        }
        expired
    }

    /// Sends `body` to every subscriber, returning how many sends succeeded
    pub fn publish(&mut self, body: &str) -> usize {
        let frame = Frame::new(FrameKind::Publish, self.next_sequence, body);
        self.next_sequence = self.next_sequence.wrapping_add(1);

        self.subscribers
            .keys()
            .filter(|addr| self.channel.send_to(&frame, **addr))
            .count()
    }

    pub fn close(&mut self) {
        self.subscribers.clear();
        self.channel.close();
    }
}

/// Client side: receives published messages from one publisher
#[derive(Debug)]
pub struct Subscriber {
    channel: Channel,
    subscribed_at: Instant,
}

impl Subscriber {
    /// Opens a socket towards the publisher and subscribes to everything
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, NetError> {
        let channel = Channel::connect(addr)?;
        channel.try_send(&Frame::new(FrameKind::Subscribe, 0, ""), None)?;
        Ok(Self {
            channel,
            subscribed_at: Instant::now(),
        })
    }

    /// Repeats the subscription once `interval` has passed since the last one.
    /// Returns true when a `Subscribe` was sent.
    pub fn renew_after(&mut self, interval: Duration) -> bool {
        if !self.channel.is_open() || self.subscribed_at.elapsed() < interval {
            return false;
        }
        self.subscribed_at = Instant::now();
        self.channel.send(&Frame::new(FrameKind::Subscribe, 0, ""))
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Next published message body, if one is already queued
    pub fn receive(&mut self) -> Option<String> {
        loop {
            let (frame, _) = self.channel.receive_nonblocking()?;
            if frame.kind == FrameKind::Publish {
                return Some(frame.body);
            }
            debug!("Ignoring {:?} frame on subscriber socket", frame.kind);
        }
    }

    /// Every message queued right now, oldest first
    pub fn drain(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.receive()).collect()
    }

    /// Withdraws the subscription and releases the socket. Idempotent.
    pub fn close(&mut self) {
        if self.channel.is_open() {
            self.channel.send(&Frame::new(FrameKind::Unsubscribe, 0, ""));
            self.channel.close();
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.close();
    }
}
