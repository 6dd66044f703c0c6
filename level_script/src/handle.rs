//! Generational references to pool entities.
//!
//! A handle remembers the slot and the generation the slot had when the
//! handle was made. Once the slot is freed (and possibly reused) the
//! generations stop matching and every operation through the handle fails.

use std::fmt;

use crate::error::ScriptError;
use crate::pool::{Entity, EntityId, EntityPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHandle {
    slot: EntityId,
    generation: i32,
}

impl EntityHandle {
    /// Stamps `id` with the generation it currently has. Wrapping a free slot
    /// yields a handle that is already stale.
    pub fn wrap(pool: &EntityPool, id: EntityId) -> Self {
        match pool.entity(id) {
            Some(entity) if entity.in_use() => EntityHandle {
                slot: id,
                generation: entity.generation(),
            },
            Some(entity) => EntityHandle {
                slot: id,
                generation: entity.generation().wrapping_sub(1),
            },
            None => Self::invalid(),
        }
    }

    /// The handle restored for a saved reference whose entity was gone.
    pub const fn invalid() -> Self {
        EntityHandle {
            slot: EntityId::WORLD,
            generation: -1,
        }
    }

    pub fn slot(self) -> EntityId {
        self.slot
    }

    pub fn generation(self) -> i32 {
        self.generation
    }

    pub fn resolve(self, pool: &EntityPool) -> Option<EntityId> {
        pool.entity(self.slot)
            .filter(|entity| entity.in_use() && entity.generation() == self.generation)
            .map(Entity::index)
    }

    pub fn is_valid(self, pool: &EntityPool) -> bool {
        self.resolve(pool).is_some()
    }

    pub fn check(self, pool: &EntityPool) -> Result<EntityId, ScriptError> {
        self.resolve(pool).ok_or(ScriptError::StaleEntity)
    }

    pub fn get(self, pool: &EntityPool) -> Result<&Entity, ScriptError> {
        let id = self.check(pool)?;
        pool.entity(id).ok_or(ScriptError::StaleEntity)
    }

    pub fn get_mut(self, pool: &mut EntityPool) -> Result<&mut Entity, ScriptError> {
        let id = self.check(pool)?;
        pool.entity_mut(id).ok_or(ScriptError::StaleEntity)
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity {}@{}", self.slot, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::EntityHandle;
    use crate::config::PoolConfig;
    use crate::error::ScriptError;
    use crate::pool::{EntityId, EntityPool};

    fn pool() -> EntityPool {
        EntityPool::new(&PoolConfig {
            max_clients: 1,
            max_entities: 16,
        })
    }

    #[test]
    fn handle_goes_stale_when_slot_is_reused() {
        let mut pool = pool();
        let id = pool.spawn().expect("spawn");
        let handle = EntityHandle::wrap(&pool, id);
        assert!(handle.is_valid(&pool));

        pool.free(id);
        assert_eq!(handle.check(&pool), Err(ScriptError::StaleEntity));

        let reused = pool.spawn().expect("spawn");
        assert_eq!(reused, id);
        assert!(!handle.is_valid(&pool));
        assert!(EntityHandle::wrap(&pool, reused).is_valid(&pool));
    }

    #[test]
    fn wrapping_a_free_slot_is_already_stale() {
        let mut pool = pool();
        let id = pool.spawn().expect("spawn");
        pool.free(id);
        let handle = EntityHandle::wrap(&pool, id);
        assert!(!handle.is_valid(&pool));
        assert_eq!(handle.slot(), id);

        let reused = pool.spawn().expect("spawn");
        assert_eq!(reused, id);
        assert!(!handle.is_valid(&pool));
    }

    #[test]
    fn invalid_handle_never_resolves_even_to_world() {
        let pool = pool();
        assert!(EntityHandle::wrap(&pool, EntityId::WORLD).is_valid(&pool));
        assert!(!EntityHandle::invalid().is_valid(&pool));
        assert!(!EntityHandle::wrap(&pool, EntityId::new(99)).is_valid(&pool));
    }
}
