//! Mapper registry: entity kind → mapper.
//!
//! Built once at startup, then shared read-only (behind an `Arc`) by every
//! session. Lookups are available both typed, for code that knows the
//! entity type, and erased, for the unit of work which only has keys.

use crate::entity::Entity;
use crate::error::OrmError;
use crate::mapper::{EntityMapper, ErasedMapper, Mapper, Mapping};
use crate::types::EntityKind;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

struct Registration {
    erased: Arc<dyn ErasedMapper>,
    /// Holds an `Arc<dyn Mapper<E>>` for the registered entity type
    typed: Box<dyn Any + Send + Sync>,
}

#[derive(Default)]
pub struct MapperRegistry {
    entries: HashMap<EntityKind, Registration>,
}

impl MapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the mapper for `M::Entity`. Each kind may be registered once.
    pub fn register<M: Mapping>(&mut self, mapping: M) -> Result<(), OrmError> {
        let kind = M::Entity::KIND;
        if self.entries.contains_key(&kind) {
            return Err(OrmError::DuplicateMapper(kind));
        }

        let mapper = Arc::new(EntityMapper::new(mapping));
        let typed: Arc<dyn Mapper<M::Entity>> = Arc::clone(&mapper) as _;
        let erased: Arc<dyn ErasedMapper> = mapper;
        self.entries.insert(
            kind,
            Registration {
                erased,
                typed: Box::new(typed),
            },
        );
        debug!("Registered mapper for {}", kind);
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    pub fn with<M: Mapping>(mut self, mapping: M) -> Result<Self, OrmError> {
        self.register(mapping)?;
        Ok(self)
    }

    pub fn mapper<E: Entity>(&self) -> Result<Arc<dyn Mapper<E>>, OrmError> {
        let registration = self
            .entries
            .get(&E::KIND)
            .ok_or(OrmError::MapperNotRegistered(E::KIND))?;
        registration
            .typed
            .downcast_ref::<Arc<dyn Mapper<E>>>()
            .cloned()
            .ok_or_else(|| {
                OrmError::invariant(format!(
                    "entity kind '{}' is registered for a different type",
                    E::KIND
                ))
            })
    }

    pub fn by_kind(&self, kind: EntityKind) -> Result<Arc<dyn ErasedMapper>, OrmError> {
        self.entries
            .get(&kind)
            .map(|r| Arc::clone(&r.erased))
            .ok_or(OrmError::MapperNotRegistered(kind))
    }

    pub fn contains(&self, kind: EntityKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Registered kinds, sorted by name
    pub fn kinds(&self) -> Vec<EntityKind> {
        let mut kinds: Vec<EntityKind> = self.entries.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for MapperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapperRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
