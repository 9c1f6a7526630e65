use crate::error::{ReplicaError, Result};
use crate::protocol::EntityId;
use ahash::AHashMap;

/// Missed-packet counters for remote entities.
#[derive(Debug, Clone, Default)]
pub struct LivenessTable {
    missed: AHashMap<EntityId, u32>,
}

impl LivenessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, entity: EntityId) {
        self.missed.entry(entity).or_insert(0);
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.missed.contains_key(&entity)
    }

    pub fn missed(&self, entity: EntityId) -> Option<u32> {
        self.missed.get(&entity).copied()
    }

    pub fn remove(&mut self, entity: EntityId) -> bool {
        self.missed.remove(&entity).is_some()
    }

    pub fn clear(&mut self) {
        self.missed.clear();
    }

    pub fn tick(&mut self) {
        for count in self.missed.values_mut() {
            *count = count.saturating_add(1);
        }
    }

    /// Returns false when the entity is not tracked.
    pub fn heard_from(&mut self, entity: EntityId) -> bool {
        match self.missed.get_mut(&entity) {
            Some(count) => {
                *count = 0;
                true
            }
            None => false,
        }
    }

    pub fn extend_grace(&mut self, entity: EntityId, grace_frames: u32) -> Result<u32> {
        let count = self
            .missed
            .get_mut(&entity)
            .ok_or(ReplicaError::UnknownEntity(entity))?;
        *count = count.saturating_sub(grace_frames);
        Ok(*count)
    }

    pub fn exceeding(&self, threshold: u32) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .missed
            .iter()
            .filter(|(_, count)| **count > threshold)
            .map(|(entity, _)| *entity)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.missed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.missed.is_empty()
    }
}
