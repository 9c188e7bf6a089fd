//! Authoritative session table for the replication server
//!
//! This module owns every connected client's last-known state:
//! - Session lifecycle (connect, disconnect, stale eviction)
//! - Position updates with change detection for broadcast traffic
//! - Point-in-time snapshots for state replies and broadcasts
//! - Capacity management and id assignment
//!
//! The table is shared between the request thread and the broadcast thread,
//! so every operation takes `&self` and runs inside one short critical
//! section. No lock is ever held across network I/O.

use log::info;
use shared::utils::lock;
use shared::{RemoteState, SPAWN_X, SPAWN_Y};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Server-side record of one connected client
///
/// Each session tracks:
/// - Its assigned identifier and last reported position
/// - When the position last changed and when the client was last heard from
/// - Whether the position still has to be published (broadcast variant)
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique identifier, never reused while the server runs
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub connected_at: Instant,
    /// Last time the position actually changed
    pub last_update: Instant,
    /// Last time any request named this session
    pub last_seen: Instant,
    /// Position changed since it was last published
    pub dirty: bool,
}

impl Session {
    /// Creates a session at the given spawn position
    pub fn new(id: u32, x: f32, y: f32) -> Self {
        let now = Instant::now();
        Self {
            id,
            x,
            y,
            connected_at: now,
            last_update: now,
            last_seen: now,
            dirty: false,
        }
    }

    /// Returns true if nothing has been heard from this client within `timeout`
    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    pub fn state(&self) -> RemoteState {
        RemoteState::new(self.id, self.x, self.y)
    }
}

/// Thread-safe map from client id to session
///
/// Ids come from a monotonically increasing counter starting at 1; 0 is
/// reserved as "no id". A full table refuses new sessions instead of
/// evicting live ones.
#[derive(Debug)]
pub struct SessionTable {
    sessions: Mutex<HashMap<u32, Session>>,
    next_id: AtomicU32,
    max_clients: usize,
}

impl SessionTable {
    /// Creates an empty table that admits at most `max_clients` sessions
    pub fn new(max_clients: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            max_clients,
        }
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Creates a session at the spawn point
    ///
    /// Returns the new id, or None when the server is at capacity.
    pub fn connect(&self) -> Option<u32> {
        let mut sessions = lock(&self.sessions);
        if sessions.len() >= self.max_clients {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        sessions.insert(id, Session::new(id, SPAWN_X, SPAWN_Y));
        info!("Client {} connected. Total clients: {}", id, sessions.len());

        Some(id)
    }

    /// Removes a session. Returns false if the id was not present.
    pub fn disconnect(&self, id: u32) -> bool {
        let mut sessions = lock(&self.sessions);
        match sessions.remove(&id) {
            Some(_) => {
                info!("Client {} disconnected. Total clients: {}", id, sessions.len());
                true
            }
            None => false,
        }
    }

    /// Records a new position for a live session
    ///
    /// Unknown ids are ignored. The session's activity time is refreshed on
    /// every call, but `last_update` and the dirty flag only change when the
    /// coordinates differ from the stored ones. Returns whether they did.
    pub fn update_position(&self, id: u32, x: f32, y: f32) -> bool {
        let mut sessions = lock(&self.sessions);
        let Some(session) = sessions.get_mut(&id) else {
            return false;
        };

        let now = Instant::now();
        session.last_seen = now;

        if session.x == x && session.y == y {
            return false;
        }

        session.x = x;
        session.y = y;
        session.last_update = now;
        session.dirty = true;
        true
    }

    /// Refreshes the activity time of a live session
    pub fn touch(&self, id: u32) -> bool {
        match lock(&self.sessions).get_mut(&id) {
            Some(session) => {
                session.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Consistent copy of every live session, ordered by id
    pub fn snapshot(&self) -> Vec<RemoteState> {
        let mut states: Vec<RemoteState> =
            lock(&self.sessions).values().map(Session::state).collect();
        states.sort_by_key(|s| s.id);
        states
    }

    /// Returns every session whose position changed since the last call and
    /// clears their dirty flags, ordered by id
    pub fn take_dirty(&self) -> Vec<RemoteState> {
        let mut states: Vec<RemoteState> = lock(&self.sessions)
            .values_mut()
            .filter(|s| s.dirty)
            .map(|s| {
                s.dirty = false;
                s.state()
            })
            .collect();
        states.sort_by_key(|s| s.id);
        states
    }

    /// Flags every session for republishing, e.g. so a new subscriber learns
    /// where idle peers are
    pub fn mark_all_dirty(&self) {
        for session in lock(&self.sessions).values_mut() {
            session.dirty = true;
        }
    }

    /// Removes sessions not heard from within `timeout`
    ///
    /// Returns the evicted ids so the caller can announce them.
    pub fn evict_stale(&self, timeout: Duration) -> Vec<u32> {
        let mut sessions = lock(&self.sessions);
        let mut stale: Vec<u32> = sessions
            .values()
            .filter(|s| s.is_stale(timeout))
            .map(|s| s.id)
            .collect();
        stale.sort_unstable();

        for id in &stale {
            sessions.remove(id);
            info!(
                "Client {} evicted after {:?} of silence. Total clients: {}",
                id,
                timeout,
                sessions.len()
            );
        }

        stale
    }

    pub fn get(&self, id: u32) -> Option<Session> {
        lock(&self.sessions).get(&id).cloned()
    }

    pub fn contains(&self, id: u32) -> bool {
        lock(&self.sessions).contains_key(&id)
    }

    /// Returns the number of live sessions
    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Returns true if no sessions are live
    pub fn is_empty(&self) -> bool {
        lock(&self.sessions).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn backdate(table: &SessionTable, id: u32, by: Duration) {
        let mut sessions = table.sessions.lock().unwrap();
        let session = sessions.get_mut(&id).unwrap();
        session.last_seen = Instant::now() - by;
    }

    #[test]
    fn test_session_creation() {
        let session = Session::new(3, 1.0, 2.0);
        assert_eq!(session.id, 3);
        assert_approx_eq!(session.x, 1.0);
        assert_approx_eq!(session.y, 2.0);
        assert!(!session.dirty);
        assert!(!session.is_stale(Duration::from_secs(1)));
    }

    #[test]
    fn test_connect_assigns_increasing_ids_from_one() {
        let table = SessionTable::new(8);
        assert_eq!(table.connect(), Some(1));
        assert_eq!(table.connect(), Some(2));
        assert_eq!(table.connect(), Some(3));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_connect_spawns_at_origin() {
        let table = SessionTable::new(8);
        let id = table.connect().unwrap();
        assert_eq!(table.snapshot(), vec![RemoteState::new(id, 0.0, 0.0)]);
    }

    #[test]
    fn test_ids_are_not_reused_after_disconnect() {
        let table = SessionTable::new(8);
        let first = table.connect().unwrap();
        assert!(table.disconnect(first));

        let second = table.connect().unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_concurrent_connects_yield_unique_increasing_ids() {
        let table = Arc::new(SessionTable::new(10_000));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    (0..100)
                        .map(|_| table.connect().unwrap())
                        .collect::<Vec<u32>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            let ids = handle.join().unwrap();
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            for id in ids {
                assert!(id > 0);
                assert!(all.insert(id), "id {} assigned twice", id);
            }
        }

        assert_eq!(all.len(), 800);
        assert_eq!(table.len(), 800);
    }

    #[test]
    fn test_connect_refused_at_capacity() {
        let table = SessionTable::new(1);
        assert!(table.connect().is_some());
        assert!(table.connect().is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        let table = SessionTable::new(4);
        let id = table.connect().unwrap();
        let before = table.snapshot();

        assert!(!table.update_position(999, 5.0, 5.0));
        assert!(!table.update_position(0, 5.0, 5.0));

        assert_eq!(table.snapshot(), before);
        assert!(!table.contains(999));
        assert_eq!(table.len(), 1);
        assert!(table.contains(id));
    }

    #[test]
    fn test_update_only_marks_real_changes() {
        let table = SessionTable::new(4);
        let id = table.connect().unwrap();

        assert!(!table.update_position(id, 0.0, 0.0));
        assert!(table.take_dirty().is_empty());

        assert!(table.update_position(id, 5.0, 3.0));
        assert!(!table.update_position(id, 5.0, 3.0));

        let session = table.get(id).unwrap();
        assert!(session.dirty);
        assert!(session.last_update >= session.connected_at);
    }

    #[test]
    fn test_take_dirty_clears_flags() {
        let table = SessionTable::new(4);
        let a = table.connect().unwrap();
        let b = table.connect().unwrap();

        table.update_position(b, 1.0, 1.0);
        table.update_position(a, 2.0, 2.0);

        assert_eq!(
            table.take_dirty(),
            vec![RemoteState::new(a, 2.0, 2.0), RemoteState::new(b, 1.0, 1.0)]
        );
        assert!(table.take_dirty().is_empty());
    }

    #[test]
    fn test_mark_all_dirty() {
        let table = SessionTable::new(4);
        table.connect();
        table.connect();

        table.mark_all_dirty();
        assert_eq!(table.take_dirty().len(), 2);
    }

    #[test]
    fn test_disconnect_removes_from_snapshot() {
        let table = SessionTable::new(4);
        let a = table.connect().unwrap();
        let b = table.connect().unwrap();

        assert!(table.disconnect(a));
        assert!(!table.disconnect(a));

        let ids: Vec<u32> = table.snapshot().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![b]);

        assert!(!table.update_position(a, 1.0, 1.0));
        assert!(!table.contains(a));
    }

    #[test]
    fn test_evict_stale_sessions() {
        let table = SessionTable::new(4);
        let quiet = table.connect().unwrap();
        let active = table.connect().unwrap();

        backdate(&table, quiet, Duration::from_secs(5));

        let evicted = table.evict_stale(Duration::from_secs(2));
        assert_eq!(evicted, vec![quiet]);
        assert!(!table.contains(quiet));
        assert!(table.contains(active));
    }

    #[test]
    fn test_touch_and_unchanged_update_keep_session_alive() {
        let table = SessionTable::new(4);
        let a = table.connect().unwrap();
        let b = table.connect().unwrap();

        backdate(&table, a, Duration::from_secs(5));
        backdate(&table, b, Duration::from_secs(5));

        assert!(table.touch(a));
        assert!(!table.update_position(b, 0.0, 0.0));

        assert!(table.evict_stale(Duration::from_secs(2)).is_empty());
        assert!(!table.touch(42));
    }

    #[test]
    fn test_empty_table() {
        let table = SessionTable::new(2);
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
        assert_eq!(table.max_clients(), 2);
        assert!(table.snapshot().is_empty());
        assert!(table.evict_stale(Duration::ZERO).is_empty());
    }
}
