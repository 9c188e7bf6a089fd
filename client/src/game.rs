//! In-memory entity world for the headless client
//!
//! Holds the locally controlled player and the visual-only stand-ins that
//! reconciliation creates for remote peers.

use crate::input::InputState;
use crate::reconcile::{EntityId, EntityStore, Facing};
use log::debug;
use std::collections::HashMap;

pub const PLAYER_SPEED: f32 = 300.0;
pub const WORLD_WIDTH: f32 = 800.0;
pub const WORLD_HEIGHT: f32 = 600.0;
pub const PLAYER_SIZE: f32 = 32.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub x: f32,
    pub y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub facing: Facing,
    /// Remote stand-ins have none: they are drawn, never collided with
    pub collider: bool,
}

#[derive(Debug, Clone)]
pub struct GameWorld {
    entities: HashMap<EntityId, Entity>,
    next_entity_id: EntityId,
}

impl GameWorld {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            next_entity_id: 1,
        }
    }

    fn insert(&mut self, x: f32, y: f32, collider: bool) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        self.entities.insert(
            id,
            Entity {
                id,
                x,
                y,
                vel_x: 0.0,
                vel_y: 0.0,
                facing: Facing::default(),
                collider,
            },
        );
        id
    }

    /// Adds the locally controlled player
    pub fn spawn_player(&mut self, x: f32, y: f32) -> EntityId {
        self.insert(x, y, true)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Sets velocity from `input` and integrates one step, clamped to the world
    pub fn apply_input(&mut self, id: EntityId, input: &InputState, dt: f32) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };

        entity.vel_x = input.horizontal * PLAYER_SPEED;
        entity.vel_y = input.vertical * PLAYER_SPEED;

        entity.x = (entity.x + entity.vel_x * dt).clamp(0.0, WORLD_WIDTH - PLAYER_SIZE);
        entity.y = (entity.y + entity.vel_y * dt).clamp(0.0, WORLD_HEIGHT - PLAYER_SIZE);

        if entity.vel_x > 0.0 {
            entity.facing = Facing::Right;
        } else if entity.vel_x < 0.0 {
            entity.facing = Facing::Left;
        }
    }

    /// Entities created for remote peers
    pub fn remote_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values().filter(|e| !e.collider)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl Default for GameWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore for GameWorld {
    fn create_remote_entity(&mut self, x: f32, y: f32) -> EntityId {
        let id = self.insert(x, y, false);
        debug!("Spawned remote entity {} at ({}, {})", id, x, y);
        id
    }

    fn set_position(&mut self, entity: EntityId, x: f32, y: f32) {
        if let Some(entity) = self.entities.get_mut(&entity) {
            entity.x = x;
            entity.y = y;
        }
    }

    fn set_facing(&mut self, entity: EntityId, facing: Facing) {
        if let Some(entity) = self.entities.get_mut(&entity) {
            entity.facing = facing;
        }
    }

    fn remove_entity(&mut self, entity: EntityId) {
        self.entities.remove(&entity);
    }

    fn position(&self, entity: EntityId) -> Option<(f32, f32)> {
        self.entities.get(&entity).map(|e| (e.x, e.y))
    }
}
