//! Reconciliation of remote peers against local entities
//!
//! Every pass partitions the peer ids into three disjoint cases:
//! - listed by the server but not yet bound: create a visual-only entity
//! - listed and bound: move the entity if the peer moved, turn it to face
//!   the direction of travel
//! - bound but no longer listed: destroy the entity and drop the binding
//!
//! The local client's own id is never bound, so its entity is never touched.

use crate::replication::OtherClientState;
use log::{debug, info, warn};
use std::collections::HashMap;

/// Identifier of an entity inside the owning [`EntityStore`]
pub type EntityId = u32;

/// Position changes at or below this are not forwarded to the store
pub const POSITION_EPSILON: f32 = 1e-4;

/// Horizontal movement needed before an entity turns around
pub const FLIP_THRESHOLD: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Facing {
    Left,
    #[default]
    Right,
}

/// The entity system reconciliation drives
///
/// Implemented by whatever owns rendering and physics state. Remote entities
/// must be created without a collider.
pub trait EntityStore {
    fn create_remote_entity(&mut self, x: f32, y: f32) -> EntityId;
    fn set_position(&mut self, entity: EntityId, x: f32, y: f32);
    fn set_facing(&mut self, entity: EntityId, facing: Facing);
    fn remove_entity(&mut self, entity: EntityId);
    fn position(&self, entity: EntityId) -> Option<(f32, f32)>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Binding {
    entity: EntityId,
    /// Position at the previous observation
    x: f32,
    y: f32,
}

/// Peer ids touched by one reconciliation pass, each list sorted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<u32>,
    pub updated: Vec<u32>,
    pub removed: Vec<u32>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Peer id to entity bindings for one connection
#[derive(Debug, Default)]
pub struct Reconciler {
    local_id: u32,
    bindings: HashMap<u32, Binding>,
}

impl Reconciler {
    pub fn new(local_id: u32) -> Self {
        Self {
            local_id,
            bindings: HashMap::new(),
        }
    }

    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    pub fn entity_for(&self, peer: u32) -> Option<EntityId> {
        self.bindings.get(&peer).map(|b| b.entity)
    }

    pub fn bound_peers(&self) -> Vec<u32> {
        let mut peers: Vec<u32> = self.bindings.keys().copied().collect();
        peers.sort_unstable();
        peers
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Brings the store in line with `remote`
    ///
    /// Applying the same input twice leaves the second pass empty.
    pub fn apply<S: EntityStore + ?Sized>(
        &mut self,
        remote: &HashMap<u32, OtherClientState>,
        store: &mut S,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let mut peers: Vec<&OtherClientState> = remote.values().collect();
        peers.sort_unstable_by_key(|p| p.id);

        for peer in peers {
            if peer.id == self.local_id {
                continue;
            }

            match self.bindings.get_mut(&peer.id) {
                None => {
                    let entity = store.create_remote_entity(peer.x, peer.y);
                    self.bindings.insert(
                        peer.id,
                        Binding {
                            entity,
                            x: peer.x,
                            y: peer.y,
                        },
                    );
                    info!(
                        "Created entity {} for client {} at ({}, {})",
                        entity, peer.id, peer.x, peer.y
                    );
                    report.created.push(peer.id);
                }
                Some(binding) => {
                    let dx = peer.x - binding.x;
                    let dy = peer.y - binding.y;
                    if dx.abs() <= POSITION_EPSILON && dy.abs() <= POSITION_EPSILON {
                        continue;
                    }

                    if dx > FLIP_THRESHOLD {
                        store.set_facing(binding.entity, Facing::Right);
                    } else if dx < -FLIP_THRESHOLD {
                        store.set_facing(binding.entity, Facing::Left);
                    }
                    store.set_position(binding.entity, peer.x, peer.y);

                    binding.x = peer.x;
                    binding.y = peer.y;
                    report.updated.push(peer.id);
                }
            }
        }

        let mut gone: Vec<u32> = self
            .bindings
            .keys()
            .copied()
            .filter(|id| *id == self.local_id || !remote.contains_key(id))
            .collect();
        gone.sort_unstable();

        for id in gone {
            if let Some(binding) = self.bindings.remove(&id) {
                store.remove_entity(binding.entity);
                info!("Client {} left, removed entity {}", id, binding.entity);
                report.removed.push(id);
            }
        }

        if !report.is_empty() {
            debug!(
                "Reconciled: {} created, {} updated, {} removed",
                report.created.len(),
                report.updated.len(),
                report.removed.len()
            );
        }
        report
    }

    /// Destroys every bound entity, returning the peer ids that were bound
    pub fn clear<S: EntityStore + ?Sized>(&mut self, store: &mut S) -> Vec<u32> {
        let peers = self.bound_peers();
        for id in &peers {
            match self.bindings.remove(id) {
                Some(binding) => store.remove_entity(binding.entity),
                None => warn!("Binding for client {} vanished during clear", id),
            }
        }
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    /// Records every call so tests can count creations and removals
    #[derive(Default)]
    struct RecordingStore {
        next: EntityId,
        positions: HashMap<EntityId, (f32, f32)>,
        facing: HashMap<EntityId, Facing>,
        created: u32,
        removed: Vec<EntityId>,
    }

    impl EntityStore for RecordingStore {
        fn create_remote_entity(&mut self, x: f32, y: f32) -> EntityId {
            self.next += 1;
            self.created += 1;
            self.positions.insert(self.next, (x, y));
            self.next
        }

        fn set_position(&mut self, entity: EntityId, x: f32, y: f32) {
            self.positions.insert(entity, (x, y));
        }

        fn set_facing(&mut self, entity: EntityId, facing: Facing) {
            self.facing.insert(entity, facing);
        }

        fn remove_entity(&mut self, entity: EntityId) {
            self.positions.remove(&entity);
            self.removed.push(entity);
        }

        fn position(&self, entity: EntityId) -> Option<(f32, f32)> {
            self.positions.get(&entity).copied()
        }
    }

    fn snapshot(peers: &[(u32, f32, f32)]) -> HashMap<u32, OtherClientState> {
        peers
            .iter()
            .map(|&(id, x, y)| (id, OtherClientState::new(id, x, y)))
            .collect()
    }

    #[test]
    fn test_creates_entity_for_new_peer() {
        let mut reconciler = Reconciler::new(2);
        let mut store = RecordingStore::default();

        let report = reconciler.apply(&snapshot(&[(1, 5.0, 3.0)]), &mut store);
        assert_eq!(report.created, vec![1]);

        let entity = reconciler.entity_for(1).unwrap();
        let (x, y) = store.position(entity).unwrap();
        assert_approx_eq!(x, 5.0);
        assert_approx_eq!(y, 3.0);
    }

    #[test]
    fn test_same_snapshot_twice_is_idempotent() {
        let mut reconciler = Reconciler::new(9);
        let mut store = RecordingStore::default();
        let state = snapshot(&[(1, 1.0, 1.0), (2, 2.0, 2.0)]);

        let first = reconciler.apply(&state, &mut store);
        assert_eq!(first.created, vec![1, 2]);

        let second = reconciler.apply(&state, &mut store);
        assert!(second.is_empty());
        assert_eq!(store.created, 2);
        assert!(store.removed.is_empty());
    }

    #[test]
    fn test_never_binds_local_id() {
        let mut reconciler = Reconciler::new(2);
        let mut store = RecordingStore::default();

        let report = reconciler.apply(&snapshot(&[(1, 0.0, 0.0), (2, 0.0, 0.0)]), &mut store);
        assert_eq!(report.created, vec![1]);
        assert!(reconciler.entity_for(2).is_none());
        assert_eq!(reconciler.bound_peers(), vec![1]);
    }

    #[test]
    fn test_removes_departed_peer_exactly_once() {
        let mut reconciler = Reconciler::new(2);
        let mut store = RecordingStore::default();

        reconciler.apply(&snapshot(&[(1, 5.0, 3.0), (2, 0.0, 0.0)]), &mut store);
        let entity = reconciler.entity_for(1).unwrap();

        let report = reconciler.apply(&snapshot(&[(2, 0.0, 0.0)]), &mut store);
        assert_eq!(report.removed, vec![1]);

        let again = reconciler.apply(&snapshot(&[(2, 0.0, 0.0)]), &mut store);
        assert!(again.is_empty());
        assert_eq!(store.removed, vec![entity]);
        assert!(reconciler.is_empty());
    }

    #[test]
    fn test_updates_position_and_facing() {
        let mut reconciler = Reconciler::new(9);
        let mut store = RecordingStore::default();

        reconciler.apply(&snapshot(&[(1, 10.0, 0.0)]), &mut store);
        let entity = reconciler.entity_for(1).unwrap();

        let report = reconciler.apply(&snapshot(&[(1, 4.0, 2.0)]), &mut store);
        assert_eq!(report.updated, vec![1]);
        assert_eq!(store.facing.get(&entity), Some(&Facing::Left));
        assert_eq!(store.position(entity), Some((4.0, 2.0)));

        reconciler.apply(&snapshot(&[(1, 8.0, 2.0)]), &mut store);
        assert_eq!(store.facing.get(&entity), Some(&Facing::Right));
    }

    #[test]
    fn test_small_moves_keep_facing() {
        let mut reconciler = Reconciler::new(9);
        let mut store = RecordingStore::default();

        reconciler.apply(&snapshot(&[(1, 10.0, 0.0)]), &mut store);
        let entity = reconciler.entity_for(1).unwrap();

        let report = reconciler.apply(&snapshot(&[(1, 10.05, 5.0)]), &mut store);
        assert_eq!(report.updated, vec![1]);
        assert!(store.facing.get(&entity).is_none());

        let report = reconciler.apply(&snapshot(&[(1, 10.05, 5.00001)]), &mut store);
        assert!(report.is_empty());
    }

    #[test]
    fn test_clear_removes_everything() {
        let mut reconciler = Reconciler::new(9);
        let mut store = RecordingStore::default();
        reconciler.apply(&snapshot(&[(1, 0.0, 0.0), (3, 0.0, 0.0)]), &mut store);

        assert_eq!(reconciler.clear(&mut store), vec![1, 3]);
        assert!(reconciler.is_empty());
        assert!(store.positions.is_empty());
        assert_eq!(store.removed.len(), 2);
    }
}
