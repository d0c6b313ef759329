//! Transforms
//!
//! World-space placement of entities and the query surface other systems use
//! to follow them:
//! - Position and forward-facing orientation per entity
//! - Batched "changed since the last frame boundary" flags

use glam::{Quat, Vec3};

use crate::handle::{FreeList, Handle};

/// Entity identifier
pub type Entity = Handle<TransformEntry>;

/// World-space transform of an entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// World position
    pub position: Vec3,
    /// World rotation
    pub rotation: Quat,
}

impl Transform {
    /// Identity transform
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    /// Create a new transform with the given position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }

    /// Create a new transform with position and rotation
    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Create a transform from a position and euler angles (radians, YXZ order)
    pub fn from_position_euler(position: Vec3, euler: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::from_euler(glam::EulerRot::YXZ, euler.y, euler.x, euler.z),
        }
    }

    /// Get the forward direction (negative Z in local space)
    pub fn forward(&self) -> Vec3 {
        self.rotation * -Vec3::Z
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Read access to entity transforms.
///
/// Light systems query this once per frame; implementations decide what
/// "changed" means but must answer consistently within a frame.
pub trait TransformSource {
    /// World position of an entity
    fn position(&self, entity: Entity) -> Vec3;

    /// Forward direction of an entity
    fn orientation(&self, entity: Entity) -> Vec3;

    /// Write one flag per entity into `out`, `true` when the entity's
    /// transform changed since the last frame boundary.
    fn changed_flags(&self, entities: &[Entity], out: &mut [bool]);
}

/// Stored transform plus its change flag
#[derive(Debug, Clone)]
pub struct TransformEntry {
    transform: Transform,
    changed: bool,
}

/// In-memory transform storage
#[derive(Debug, Default)]
pub struct TransformStore {
    entries: FreeList<TransformEntry>,
}

impl TransformStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn an entity with a transform.
    ///
    /// New entities count as changed until the next [`TransformStore::end_frame`].
    pub fn spawn(&mut self, transform: Transform) -> Entity {
        self.entries.add(TransformEntry {
            transform,
            changed: true,
        })
    }

    /// Despawn an entity
    pub fn despawn(&mut self, entity: Entity) -> bool {
        self.entries.remove(entity).is_some()
    }

    /// Check if an entity is alive
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entries.is_valid(entity)
    }

    /// Get the number of alive entities
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entities
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get an entity's transform
    pub fn transform(&self, entity: Entity) -> Option<&Transform> {
        self.entries.get(entity).map(|entry| &entry.transform)
    }

    /// Replace an entity's transform
    pub fn set_transform(&mut self, entity: Entity, transform: Transform) {
        let entry = &mut self.entries[entity];
        entry.transform = transform;
        entry.changed = true;
    }

    /// Translate an entity
    pub fn translate(&mut self, entity: Entity, delta: Vec3) {
        let entry = &mut self.entries[entity];
        entry.transform.position += delta;
        entry.changed = true;
    }

    /// Rotate an entity by euler angles (radians)
    pub fn rotate_euler(&mut self, entity: Entity, euler: Vec3) {
        let entry = &mut self.entries[entity];
        entry.transform.rotation *= Quat::from_euler(glam::EulerRot::YXZ, euler.y, euler.x, euler.z);
        entry.changed = true;
    }

    /// Close the frame: every change flag is cleared
    pub fn end_frame(&mut self) {
        let handles: Vec<_> = self.entries.iter().map(|(handle, _)| handle).collect();
        for handle in handles {
            self.entries[handle].changed = false;
        }
    }
}

impl TransformSource for TransformStore {
    fn position(&self, entity: Entity) -> Vec3 {
        self.entries[entity].transform.position
    }

    fn orientation(&self, entity: Entity) -> Vec3 {
        self.entries[entity].transform.forward()
    }

    fn changed_flags(&self, entities: &[Entity], out: &mut [bool]) {
        assert!(out.len() >= entities.len());
        for (flag, &entity) in out.iter_mut().zip(entities) {
            *flag = self.entries.get(entity).is_some_and(|entry| entry.changed);
        }
    }
}
