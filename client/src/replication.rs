//! Client-side buffer of what the server last said about every peer
//!
//! The buffer is filled from two sources depending on the protocol mode:
//! whole snapshots carried by `OK` replies (polling) or individual broadcast
//! messages (broadcast). Either way the client's own id never enters it.

use log::debug;
use shared::{Broadcast, RemoteState};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Last known state of one remote peer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OtherClientState {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    /// When this entry was last written locally
    pub last_update: Instant,
}

impl OtherClientState {
    pub fn new(id: u32, x: f32, y: f32) -> Self {
        Self {
            id,
            x,
            y,
            last_update: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ReplicationState {
    local_id: u32,
    others: HashMap<u32, OtherClientState>,
    /// Server timestamp of the newest position applied per peer
    last_timestamps: HashMap<u32, u64>,
}

impl ReplicationState {
    pub fn new(local_id: u32) -> Self {
        Self {
            local_id,
            ..Self::default()
        }
    }

    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    /// Replaces everything with the peers listed in a state reply
    ///
    /// Peers missing from the snapshot are gone: the server is the only
    /// source of truth and sends no separate disconnect notice in polling
    /// mode.
    pub fn apply_snapshot(&mut self, states: &[RemoteState]) {
        let now = Instant::now();
        self.others = states
            .iter()
            .filter(|s| s.id != self.local_id)
            .map(|s| {
                (
                    s.id,
                    OtherClientState {
                        id: s.id,
                        x: s.x,
                        y: s.y,
                        last_update: now,
                    },
                )
            })
            .collect();
        self.last_timestamps.clear();
    }

    /// Applies one published message. Returns false when it was ignored.
    pub fn apply_broadcast(&mut self, message: &Broadcast) -> bool {
        match *message {
            Broadcast::ClientConnected { id, x, y } => {
                if id == self.local_id {
                    return false;
                }
                self.others
                    .entry(id)
                    .or_insert_with(|| OtherClientState::new(id, x, y));
                true
            }
            Broadcast::ClientDisconnected { id } => {
                self.last_timestamps.remove(&id);
                self.others.remove(&id).is_some()
            }
            Broadcast::PositionUpdate {
                id,
                x,
                y,
                timestamp_ms,
            } => {
                if id == self.local_id {
                    return false;
                }
                if let Some(&newest) = self.last_timestamps.get(&id) {
                    if timestamp_ms < newest {
                        debug!(
                            "Discarding stale position for client {} ({} < {})",
                            id, timestamp_ms, newest
                        );
                        return false;
                    }
                }

                self.last_timestamps.insert(id, timestamp_ms);
                self.others.insert(id, OtherClientState::new(id, x, y));
                true
            }
        }
    }

    /// Drops peers nothing has been heard about for longer than `timeout`
    ///
    /// In broadcast mode the server republishes every live session
    /// periodically, so a peer that stays silent is one whose
    /// `CLIENT_DISCONNECTED` never arrived.
    pub fn expire_silent(&mut self, timeout: Duration) -> Vec<u32> {
        let expired: Vec<u32> = self
            .others
            .values()
            .filter(|peer| peer.last_update.elapsed() > timeout)
            .map(|peer| peer.id)
            .collect();

        for id in &expired {
            self.others.remove(id);
            self.last_timestamps.remove(id);
        }
        expired
    }

    pub fn others(&self) -> &HashMap<u32, OtherClientState> {
        &self.others
    }

    pub fn get(&self, id: u32) -> Option<&OtherClientState> {
        self.others.get(&id)
    }

    pub fn clear(&mut self) {
        self.others.clear();
        self.last_timestamps.clear();
    }

    pub fn len(&self) -> usize {
        self.others.len()
    }

    pub fn is_empty(&self) -> bool {
        self.others.is_empty()
    }
}
