//! Message-oriented transport over UDP
//!
//! Every datagram carries one bincode-encoded [`Frame`]. The frame kind lets a
//! single socket type serve both the request/response and the
//! publish/subscribe channel, and the sequence number lets a requester drop
//! replies that belong to an earlier, timed-out request.

use crate::error::NetError;
use bincode::Options;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

/// Largest datagram either side will encode or accept
pub const MAX_DATAGRAM_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    Request,
    Reply,
    Publish,
    Subscribe,
    Unsubscribe,
}

/// Envelope around one text protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub kind: FrameKind,
    pub sequence: u32,
    pub body: String,
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_DATAGRAM_SIZE as u64)
}

impl Frame {
    pub fn new(kind: FrameKind, sequence: u32, body: impl Into<String>) -> Self {
        Self {
            kind,
            sequence,
            body: body.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, NetError> {
        Ok(codec().serialize(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self, NetError> {
        Ok(codec().deserialize(data)?)
    }

    /// Whether the encoded frame stays within [`MAX_DATAGRAM_SIZE`]
    pub fn fits_in_datagram(&self) -> bool {
        codec().serialized_size(self).is_ok()
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Owns one UDP socket. Closing releases the socket exactly once.
#[derive(Debug)]
pub struct Channel {
    socket: Option<UdpSocket>,
    peer: Option<SocketAddr>,
    buffer: Vec<u8>,
}

impl Channel {
    /// Binds a listening socket (server side)
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, NetError> {
        let socket = UdpSocket::bind(addr)?;
        Ok(Self::from_socket(socket, None))
    }

    /// Binds an ephemeral local socket and fixes its peer (client side)
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, NetError> {
        let peer = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
        })?;
        let local: SocketAddr = if peer.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };

        let socket = UdpSocket::bind(local)?;
        socket.connect(peer)?;
        Ok(Self::from_socket(socket, Some(peer)))
    }

    fn from_socket(socket: UdpSocket, peer: Option<SocketAddr>) -> Self {
        Self {
            socket: Some(socket),
            peer,
            buffer: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Sends to the connected peer, or to `addr` when given
    pub fn try_send(&self, frame: &Frame, addr: Option<SocketAddr>) -> Result<(), NetError> {
        let socket = self.socket.as_ref().ok_or(NetError::Closed)?;
        // encode() enforces MAX_DATAGRAM_SIZE through the codec limit
        let data = frame.encode()?;

        match addr {
            Some(addr) => socket.send_to(&data, addr)?,
            None => socket.send(&data)?,
        };
        Ok(())
    }

    pub fn send(&self, frame: &Frame) -> bool {
        match self.try_send(frame, None) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send {:?} frame: {}", frame.kind, e);
                false
            }
        }
    }

    pub fn send_to(&self, frame: &Frame, addr: SocketAddr) -> bool {
        match self.try_send(frame, Some(addr)) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send {:?} frame to {}: {}", frame.kind, addr, e);
                false
            }
        }
    }

    /// Returns immediately when nothing is queued
    pub fn receive_nonblocking(&mut self) -> Option<(Frame, SocketAddr)> {
        let socket = self.socket.as_ref()?;
        if let Err(e) = socket.set_nonblocking(true) {
            error!("Failed to switch socket to non-blocking: {}", e);
            return None;
        }
        let result = socket.recv_from(&mut self.buffer);
        if let Err(e) = socket.set_nonblocking(false) {
            error!("Failed to restore blocking socket: {}", e);
        }
        self.decode_received(result)
    }

    /// Waits at most `timeout`. A zero timeout behaves like a non-blocking poll.
    pub fn receive_blocking(&mut self, timeout: Duration) -> Option<(Frame, SocketAddr)> {
        if timeout.is_zero() {
            return self.receive_nonblocking();
        }

        let socket = self.socket.as_ref()?;
        if let Err(e) = socket.set_read_timeout(Some(timeout)) {
            error!("Failed to set receive timeout: {}", e);
            return None;
        }
        let result = socket.recv_from(&mut self.buffer);
        self.decode_received(result)
    }

    fn decode_received(&self, result: io::Result<(usize, SocketAddr)>) -> Option<(Frame, SocketAddr)> {
        match result {
            Ok((len, from)) => match Frame::decode(&self.buffer[..len]) {
                Ok(frame) => Some((frame, from)),
                Err(e) => {
                    warn!("Dropping undecodable datagram from {}: {}", from, e);
                    None
                }
            },
            Err(e) if is_timeout(&e) => None,
            Err(e) => {
                debug!("Receive failed: {}", e);
                None
            }
        }
    }

    /// Safe to call repeatedly; the socket is released on the first call only
    pub fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            debug!(
                "Closing channel {}",
                socket
                    .local_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "<unbound>".to_string())
            );
            drop(socket);
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Client end of the request/response channel: one outstanding request at a time
#[derive(Debug)]
pub struct RequestChannel {
    channel: Channel,
    next_sequence: u32,
    timeout: Duration,
}

impl RequestChannel {
    pub fn connect<A: ToSocketAddrs>(addr: A, timeout: Duration) -> Result<Self, NetError> {
        Ok(Self {
            channel: Channel::connect(addr)?,
            next_sequence: 1,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.channel.local_addr()
    }

    /// Sends `body` and waits up to the channel timeout for the matching reply.
    ///
    /// Replies carrying any other sequence number are stale answers to
    /// earlier requests and are skipped.
    pub fn request(&mut self, body: &str) -> Result<String, NetError> {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        let frame = Frame::new(FrameKind::Request, sequence, body);
        self.channel.try_send(&frame, None)?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(NetError::Timeout(self.timeout));
            }
            if !self.channel.is_open() {
                return Err(NetError::Closed);
            }

            match self.channel.receive_blocking(remaining) {
                Some((reply, _)) if reply.kind == FrameKind::Reply && reply.sequence == sequence => {
                    return Ok(reply.body);
                }
                Some((reply, _)) => {
                    debug!(
                        "Discarding {:?} frame #{} while waiting for #{}",
                        reply.kind, reply.sequence, sequence
                    );
                }
                None => {}
            }
        }
    }

    pub fn close(&mut self) {
        self.channel.close();
    }
}

/// A received request that still owes its sender a reply.
/// [`ReplyChannel::reply`] consumes it, so each request is answered once.
#[must_use = "every request must be answered exactly once"]
#[derive(Debug)]
pub struct PendingRequest {
    from: SocketAddr,
    sequence: u32,
    body: String,
}

impl PendingRequest {
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn from(&self) -> SocketAddr {
        self.from
    }
}

/// Server end of the request/response channel
#[derive(Debug)]
pub struct ReplyChannel {
    channel: Channel,
}

impl ReplyChannel {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, NetError> {
        Ok(Self {
            channel: Channel::bind(addr)?,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.channel.local_addr()
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Next request, waiting at most `timeout` (zero polls without waiting)
    pub fn next_request(&mut self, timeout: Duration) -> Option<PendingRequest> {
        let (frame, from) = self.channel.receive_blocking(timeout)?;
        if frame.kind != FrameKind::Request {
            debug!("Ignoring {:?} frame from {} on request channel", frame.kind, from);
            return None;
        }
        Some(PendingRequest {
            from,
            sequence: frame.sequence,
            body: frame.body,
        })
    }

    /// Whether a reply carrying `body` can be sent in one datagram
    pub fn reply_fits(body: &str) -> bool {
        Frame::new(FrameKind::Reply, 0, body).fits_in_datagram()
    }

    pub fn reply(&self, request: PendingRequest, body: &str) -> bool {
        let frame = Frame::new(FrameKind::Reply, request.sequence, body);
        self.channel.send_to(&frame, request.from)
    }

    pub fn close(&mut self) {
        self.channel.close();
    }
}
