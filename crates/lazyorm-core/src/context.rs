//! The explicit load context threaded through every mapper call.
//!
//! A [`LoadContext`] bundles what a lazy load needs: the store to query,
//! the registry to find mappers in, and the session's identity map.
//! Holders and ghosts never capture any of these; they receive a context
//! at the moment they are accessed.

use crate::entity::{Entity, EntityRef};
use crate::error::OrmError;
use crate::identity::IdentityMap;
use crate::lazy::{Lazy, LazyList};
use crate::registry::MapperRegistry;
use crate::store::Store;
use crate::types::{EntityId, Value};
use parking_lot::MappedRwLockReadGuard;
use serde::Serialize;

/// Counters for ghost creation and loading within one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadCounters {
    /// Ghosts created by `find`
    pub ghosts: u64,
    /// Entities populated from a row
    pub loads: u64,
}

pub struct LoadContext<'s> {
    store: &'s dyn Store,
    registry: &'s MapperRegistry,
    identity: &'s mut IdentityMap,
    counters: &'s mut LoadCounters,
}

impl<'s> LoadContext<'s> {
    pub fn new(
        store: &'s dyn Store,
        registry: &'s MapperRegistry,
        identity: &'s mut IdentityMap,
        counters: &'s mut LoadCounters,
    ) -> Self {
        Self {
            store,
            registry,
            identity,
            counters,
        }
    }

    pub fn store(&self) -> &'s dyn Store {
        self.store
    }

    pub fn registry(&self) -> &'s MapperRegistry {
        self.registry
    }

    pub fn identity(&mut self) -> &mut IdentityMap {
        self.identity
    }

    pub fn counters(&self) -> LoadCounters {
        *self.counters
    }

    pub(crate) fn record_ghost(&mut self) {
        self.counters.ghosts += 1;
    }

    pub(crate) fn record_load(&mut self) {
        self.counters.loads += 1;
    }

    /// The entity for `id`, as a ghost unless it is already in memory
    pub fn find<E: Entity>(&mut self, id: impl Into<EntityId>) -> Result<EntityRef<E>, OrmError> {
        let mapper = self.registry.mapper::<E>()?;
        mapper.find(self, id.into())
    }

    pub fn find_all<E: Entity>(&mut self) -> Result<Vec<EntityRef<E>>, OrmError> {
        let mapper = self.registry.mapper::<E>()?;
        mapper.find_all(self)
    }

    pub fn find_many<E: Entity>(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<EntityRef<E>>, OrmError> {
        let mapper = self.registry.mapper::<E>()?;
        mapper.find_many(self, sql, params)
    }

    /// Populate a ghost. Loaded entities are left untouched.
    pub fn ensure_loaded<E: Entity>(&mut self, entity: &EntityRef<E>) -> Result<(), OrmError> {
        if entity.is_loaded() {
            return Ok(());
        }
        let mapper = self.registry.mapper::<E>()?;
        mapper.load(self, entity)
    }

    /// Read access to an entity's fields, loading it first if needed.
    pub fn get<'r, E: Entity>(
        &mut self,
        entity: &'r EntityRef<E>,
    ) -> Result<MappedRwLockReadGuard<'r, E>, OrmError> {
        self.ensure_loaded(entity)?;
        entity.try_read().ok_or_else(|| {
            OrmError::invariant(format!(
                "{}#{:?} is not readable after loading",
                E::KIND,
                entity.id()
            ))
        })
    }

    pub fn resolve<'h, T>(&mut self, lazy: &'h Lazy<T>) -> Result<&'h T, OrmError> {
        lazy.get(self)
    }

    pub fn collection<'h, E: Entity>(
        &mut self,
        list: &'h LazyList<E>,
    ) -> Result<&'h [EntityRef<E>], OrmError> {
        list.get(self)
    }
}
