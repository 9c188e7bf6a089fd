//! Game-facing facade over the networking client
//!
//! The [`NetworkManager`] is what gameplay code holds. It owns the client,
//! the thread ticking it and the bindings from peers to entities, and exposes
//! one call per frame, [`NetworkManager::sync`], that publishes the local
//! entity's position and reconciles remote entities.

use crate::config::ClientConfig;
use crate::driver::TickDriver;
use crate::network::Client;
use crate::reconcile::{EntityId, EntityStore, ReconcileReport, Reconciler};
use crate::replication::OtherClientState;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;

pub struct NetworkManager {
    client: Arc<Client>,
    driver: Option<TickDriver>,
    reconciler: Reconciler,
    local_entity: Option<EntityId>,
}

impl NetworkManager {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            client: Arc::new(Client::new(config)),
            driver: None,
            reconciler: Reconciler::default(),
            local_entity: None,
        }
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Connects and starts the networking thread. Does nothing when already
    /// connected, so existing peer entities stay bound.
    pub fn connect(&mut self, host: &str) -> bool {
        if self.client.is_connected() {
            debug!(
                "NetworkManager: already connected as client {}",
                self.client.client_id()
            );
            return true;
        }

        if !self.client.connect(host) {
            warn!("NetworkManager: failed to connect to {}", host);
            return false;
        }

        if self.driver.is_none() {
            match TickDriver::start(Arc::clone(&self.client)) {
                Ok(driver) => self.driver = Some(driver),
                Err(e) => {
                    warn!("NetworkManager: could not start network thread: {}", e);
                    self.client.disconnect();
                    return false;
                }
            }
        }

        self.reconciler = Reconciler::new(self.client.client_id());
        info!(
            "NetworkManager: connected to {} as client {}",
            host,
            self.client.client_id()
        );
        true
    }

    /// Disconnects and destroys every remote entity
    pub fn disconnect<S: EntityStore + ?Sized>(&mut self, store: &mut S) {
        if let Some(mut driver) = self.driver.take() {
            driver.stop();
        }
        self.client.disconnect();

        let removed = self.reconciler.clear(store);
        if !removed.is_empty() {
            info!("NetworkManager: removed {} networked entities", removed.len());
        }
        self.local_entity = None;
    }

    /// Entity whose position is published every [`sync`](Self::sync)
    pub fn set_local_entity(&mut self, entity: EntityId) {
        self.local_entity = Some(entity);
        info!("NetworkManager: local player is entity {}", entity);
    }

    pub fn local_entity(&self) -> Option<EntityId> {
        self.local_entity
    }

    pub fn send_position(&self, x: f32, y: f32) {
        if self.is_connected() {
            self.client.send_position(x, y);
        }
    }

    /// Call once per frame from the game thread
    pub fn sync<S: EntityStore + ?Sized>(&mut self, store: &mut S) -> ReconcileReport {
        if !self.is_connected() {
            return ReconcileReport::default();
        }

        if let Some((x, y)) = self.local_entity.and_then(|e| store.position(e)) {
            self.client.send_position(x, y);
        }

        let others = self.client.other_clients();
        self.reconciler.apply(&others, store)
    }

    /// Peer entity bound to `client_id`, if any
    pub fn entity_for(&self, client_id: u32) -> Option<EntityId> {
        self.reconciler.entity_for(client_id)
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn client_id(&self) -> u32 {
        self.client.client_id()
    }

    pub fn other_clients(&self) -> HashMap<u32, OtherClientState> {
        self.client.other_clients()
    }
}

impl Drop for NetworkManager {
    fn drop(&mut self) {
        if let Some(mut driver) = self.driver.take() {
            driver.stop();
        }
        self.client.disconnect();
    }
}
