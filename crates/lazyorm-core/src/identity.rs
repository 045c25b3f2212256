//! Session-scoped identity map.
//!
//! Guarantees at most one in-memory entity per [`EntityKey`]. Entities of
//! every kind share one map; each entry is stored type-erased and
//! recovered by downcasting with the caller's entity type.

use crate::entity::{Entity, EntityCell, EntityRef};
use crate::error::OrmError;
use crate::types::{EntityId, EntityKey};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Lookup statistics for an [`IdentityMap`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IdentityMetrics {
    /// Lookups answered from the map
    pub hits: u64,
    /// Lookups for keys not in the map
    pub misses: u64,
    /// Entities added to the map
    pub registered: u64,
}

impl IdentityMetrics {
    /// Fraction of lookups served from memory (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    fn record_hit(&mut self) {
        self.hits += 1;
    }

    fn record_miss(&mut self) {
        self.misses += 1;
    }
}

#[derive(Default)]
pub struct IdentityMap {
    entries: HashMap<EntityKey, Arc<dyn Any + Send + Sync>>,
    metrics: IdentityMetrics,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entity, counting the hit or miss.
    pub fn get<E: Entity>(&mut self, id: EntityId) -> Option<EntityRef<E>> {
        let found = self.peek::<E>(id);
        match found {
            Some(_) => {
                trace!("Identity map hit for {}#{}", E::KIND, id);
                self.metrics.record_hit();
            }
            None => self.metrics.record_miss(),
        }
        found
    }

    /// Look up an entity without touching the metrics.
    pub fn peek<E: Entity>(&self, id: EntityId) -> Option<EntityRef<E>> {
        let entry = self.entries.get(&EntityKey::new(E::KIND, id))?;
        Arc::clone(entry)
            .downcast::<EntityCell<E>>()
            .ok()
            .map(EntityRef::from_cell)
    }

    /// Add an entity under its key.
    ///
    /// Re-adding the same instance is a no-op. Adding a different instance
    /// for a key that is already mapped breaks identity and is rejected.
    pub fn insert<E: Entity>(&mut self, entity: &EntityRef<E>) -> Result<(), OrmError> {
        let key = entity.key().ok_or_else(|| {
            OrmError::invariant(format!(
                "cannot add a {} without an id to the identity map",
                E::KIND
            ))
        })?;

        if let Some(existing) = self.peek::<E>(key.id) {
            if existing.ptr_eq(entity) {
                return Ok(());
            }
            return Err(OrmError::invariant(format!(
                "{} is already mapped to a different instance",
                key
            )));
        }
        if self.entries.contains_key(&key) {
            return Err(OrmError::invariant(format!(
                "{} is mapped to a different entity type",
                key
            )));
        }

        let cell: Arc<dyn Any + Send + Sync> = Arc::clone(entity.cell()) as _;
        self.entries.insert(key, cell);
        self.metrics.registered += 1;
        Ok(())
    }

    pub fn remove(&mut self, key: &EntityKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All mapped keys, sorted
    pub fn keys(&self) -> Vec<EntityKey> {
        let mut keys: Vec<EntityKey> = self.entries.keys().copied().collect();
        keys.sort();
        keys
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn metrics(&self) -> IdentityMetrics {
        self.metrics
    }
}

impl std::fmt::Debug for IdentityMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityMap")
            .field("entries", &self.entries.len())
            .field("metrics", &self.metrics)
            .finish()
    }
}
