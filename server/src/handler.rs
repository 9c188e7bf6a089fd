//! Server side of the connection protocol
//!
//! Each request is handled on its own: parse the command, apply it to the
//! session table, produce exactly one reply. Lifecycle changes also yield a
//! [`Broadcast`] event that the server publishes when running in broadcast
//! mode.

use crate::session::SessionTable;
use log::{debug, warn};
use shared::{Broadcast, NetError, ProtocolMode, Reply, Request, SPAWN_X, SPAWN_Y};
use std::sync::Arc;

/// Outcome of one request: the reply owed to the sender and an optional
/// lifecycle event for subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub reply: Reply,
    pub event: Option<Broadcast>,
}

impl Response {
    fn reply(reply: Reply) -> Self {
        Self { reply, event: None }
    }

    fn with_event(reply: Reply, event: Broadcast) -> Self {
        Self {
            reply,
            event: Some(event),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestHandler {
    sessions: Arc<SessionTable>,
    mode: ProtocolMode,
}

impl RequestHandler {
    pub fn new(sessions: Arc<SessionTable>, mode: ProtocolMode) -> Self {
        Self { sessions, mode }
    }

    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    pub fn mode(&self) -> ProtocolMode {
        self.mode
    }

    /// Parses and applies one raw request
    ///
    /// Malformed input never touches the session table and is answered with
    /// `ERROR <reason>`.
    pub fn handle(&self, raw: &str) -> Response {
        match raw.parse::<Request>() {
            Ok(request) => self.dispatch(request),
            Err(NetError::Malformed(reason)) => {
                warn!("Rejecting request {:?}: {}", raw, reason);
                Response::reply(Reply::Error(reason))
            }
            Err(e) => {
                warn!("Rejecting request {:?}: {}", raw, e);
                Response::reply(Reply::error(e.to_string()))
            }
        }
    }

    pub fn dispatch(&self, request: Request) -> Response {
        match request {
            Request::Connect => self.connect(),
            Request::Disconnect { id } => {
                if self.sessions.disconnect(id) {
                    Response::with_event(Reply::Disconnected, Broadcast::ClientDisconnected { id })
                } else {
                    debug!("DISCONNECT for unknown client {}", id);
                    Response::reply(Reply::Disconnected)
                }
            }
            Request::Position { id, x, y } => {
                self.sessions.update_position(id, x, y);
                Response::reply(Reply::Ack)
            }
            Request::UpdateAndGetState { id, x, y } => {
                self.sessions.update_position(id, x, y);
                Response::reply(Reply::State(self.sessions.snapshot()))
            }
        }
    }

    fn connect(&self) -> Response {
        let Some(id) = self.sessions.connect() else {
            warn!(
                "Refusing connection: server full ({} clients)",
                self.sessions.max_clients()
            );
            return Response::reply(Reply::error("Server full"));
        };

        // Republish everyone so the newcomer learns where idle peers stand
        if self.mode == ProtocolMode::Broadcast {
            self.sessions.mark_all_dirty();
        }

        Response::with_event(
            Reply::Connected {
                id,
                x: SPAWN_X,
                y: SPAWN_Y,
            },
            Broadcast::ClientConnected {
                id,
                x: SPAWN_X,
                y: SPAWN_Y,
            },
        )
    }
}
