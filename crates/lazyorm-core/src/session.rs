//! Sessions: the explicit context object for one logical unit of work.
//!
//! A [`Session`] owns the identity map and the unit of work for its
//! lifetime and hands out [`LoadContext`]s to mappers and lazy holders.
//! There is no ambient "current session"; code that needs one receives it.
//!
//! ```text
//! SessionFactory ──open()──▶ Session ─┬─ IdentityMap   (canonical instances)
//!   (store, registry,                 ├─ UnitOfWork    (new / dirty / removed keys)
//!    config)                          └─ LoadContext ─▶ Mapper ─▶ Store
//! ```

use crate::context::{LoadContext, LoadCounters};
use crate::entity::{Entity, EntityRef};
use crate::error::{CommitFailure, CommitPhase, OrmError};
use crate::identity::{IdentityMap, IdentityMetrics};
use crate::lazy::{Lazy, LazyList};
use crate::registry::MapperRegistry;
use crate::store::{Store, StoreMetrics};
use crate::types::{EntityId, EntityKey, Value};
use crate::uow::{CommitReport, Tracking, UnitOfWork};
use lazyorm_config::SessionConfig;
use parking_lot::MappedRwLockReadGuard;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Snapshot of a session's activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub identity: IdentityMetrics,
    pub loading: LoadCounters,
    pub store: StoreMetrics,
    /// Entities currently held by the identity map
    pub cached: usize,
    pub pending_new: usize,
    pub pending_dirty: usize,
    pub pending_removed: usize,
    pub commits: u64,
}

pub struct Session {
    store: Arc<dyn Store>,
    registry: Arc<MapperRegistry>,
    config: SessionConfig,
    identity: IdentityMap,
    uow: UnitOfWork,
    counters: LoadCounters,
    commits: u64,
}

impl Session {
    pub fn new(store: Arc<dyn Store>, registry: Arc<MapperRegistry>, config: SessionConfig) -> Self {
        Self {
            store,
            registry,
            config,
            identity: IdentityMap::new(),
            uow: UnitOfWork::new(),
            counters: LoadCounters::default(),
            commits: 0,
        }
    }

    /// A load context borrowing this session's state
    pub fn context(&mut self) -> LoadContext<'_> {
        LoadContext::new(
            self.store.as_ref(),
            self.registry.as_ref(),
            &mut self.identity,
            &mut self.counters,
        )
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<MapperRegistry> {
        &self.registry
    }

    pub fn identity_map(&self) -> &IdentityMap {
        &self.identity
    }

    pub fn unit_of_work(&self) -> &UnitOfWork {
        &self.uow
    }

    // ========================================================================
    // Finders
    // ========================================================================

    /// The entity for `id`. Returns the cached instance if there is one,
    /// otherwise a ghost; the store is not touched either way.
    pub fn find<E: Entity>(&mut self, id: impl Into<EntityId>) -> Result<EntityRef<E>, OrmError> {
        self.context().find(id)
    }

    pub fn find_all<E: Entity>(&mut self) -> Result<Vec<EntityRef<E>>, OrmError> {
        self.context().find_all()
    }

    /// Entities for the rows returned by `sql`, one query in total
    pub fn find_many<E: Entity>(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<EntityRef<E>>, OrmError> {
        self.context().find_many(sql, params)
    }

    // ========================================================================
    // Access
    // ========================================================================

    /// Read an entity's fields, loading it first if it is a ghost.
    ///
    /// Drop the guard before modifying the same entity.
    pub fn get<'r, E: Entity>(
        &mut self,
        entity: &'r EntityRef<E>,
    ) -> Result<MappedRwLockReadGuard<'r, E>, OrmError> {
        self.context().get(entity)
    }

    pub fn ensure_loaded<E: Entity>(&mut self, entity: &EntityRef<E>) -> Result<(), OrmError> {
        self.context().ensure_loaded(entity)
    }

    pub fn resolve<'h, T>(&mut self, lazy: &'h Lazy<T>) -> Result<&'h T, OrmError> {
        lazy.get(&mut self.context())
    }

    pub fn collection<'h, E: Entity>(
        &mut self,
        list: &'h LazyList<E>,
    ) -> Result<&'h [EntityRef<E>], OrmError> {
        list.get(&mut self.context())
    }

    // ========================================================================
    // Changes
    // ========================================================================

    /// Apply `change` to an entity and register it dirty.
    ///
    /// A change to a removed entity is rejected without being applied.
    pub fn modify<E: Entity, R>(
        &mut self,
        entity: &EntityRef<E>,
        change: impl FnOnce(&mut E) -> R,
    ) -> Result<R, OrmError> {
        self.ensure_loaded(entity)?;
        let mut data = entity.try_write()?;
        self.uow.register_dirty(entity)?;
        Ok(change(&mut data))
    }

    /// Register an entity dirty whose fields were changed some other way
    pub fn mark_dirty<E: Entity>(&mut self, entity: &EntityRef<E>) -> Result<(), OrmError> {
        self.uow.register_dirty(entity)
    }

    /// Create a new entity with a store-allocated identifier.
    ///
    /// The entity is cached and registered new; it is written on commit.
    pub fn create<E: Entity>(&mut self, data: E) -> Result<EntityRef<E>, OrmError> {
        let id = self.store.next_id(E::KIND)?;
        self.create_with_id(id, data)
    }

    pub fn create_with_id<E: Entity>(
        &mut self,
        id: impl Into<EntityId>,
        mut data: E,
    ) -> Result<EntityRef<E>, OrmError> {
        let id = id.into();
        let key = EntityKey::new(E::KIND, id);
        if self.identity.contains(&key) {
            return Err(OrmError::invariant(format!(
                "{} is already present in this session",
                key
            )));
        }

        data.identified(id);
        let entity = EntityRef::loaded(id, data);
        self.uow.register_new(&entity)?;
        self.identity.insert(&entity)?;
        debug!("Created {}", key);
        Ok(entity)
    }

    /// Write a detached entity immediately, bypassing the unit of work
    pub fn insert_now<E: Entity>(&mut self, entity: &EntityRef<E>) -> Result<EntityId, OrmError> {
        let mapper = self.registry.mapper::<E>()?;
        mapper.insert(&mut self.context(), entity)
    }

    /// Register an entity for deletion on commit
    pub fn remove<E: Entity>(&mut self, entity: &EntityRef<E>) -> Result<(), OrmError> {
        let pending_insert = entity
            .key()
            .filter(|key| self.uow.tracking(key) == Some(Tracking::New));
        self.uow.register_removed(entity)?;
        if let Some(key) = pending_insert {
            // Never written, so it simply leaves the session
            self.identity.remove(&key);
        }
        Ok(())
    }

    pub fn mark_clean<E: Entity>(&mut self, entity: &EntityRef<E>) -> Result<(), OrmError> {
        self.uow.register_clean(entity)
    }

    // ========================================================================
    // Commit
    // ========================================================================

    /// Write all tracked changes.
    ///
    /// With `transactional_commit` the writes run inside one store
    /// transaction that is rolled back if any of them fails. A failed commit
    /// leaves this session unusable for further changes.
    pub fn commit(&mut self) -> Result<CommitReport, OrmError> {
        if self.uow.is_poisoned() {
            return Err(OrmError::invariant(
                "session was abandoned by a failed commit; open a new one",
            ));
        }
        if self.uow.is_empty() {
            return Ok(CommitReport::default());
        }

        let transactional = self.config.transactional_commit;
        if transactional {
            if let Err(e) = self.store.begin() {
                return Err(self.abandon(CommitPhase::Begin, CommitReport::default(), e.into()));
            }
        }

        let mut cx = LoadContext::new(
            self.store.as_ref(),
            self.registry.as_ref(),
            &mut self.identity,
            &mut self.counters,
        );
        let result = self.uow.commit(&mut cx);

        match result {
            Ok(report) => {
                if transactional {
                    if let Err(e) = self.store.commit() {
                        self.roll_back();
                        return Err(self.abandon(CommitPhase::Complete, report, e.into()));
                    }
                }
                self.commits += 1;
                info!("Committed: {}", report);
                Ok(report)
            }
            Err(e) => {
                if transactional {
                    self.roll_back();
                }
                Err(e)
            }
        }
    }

    /// Poison the unit of work for a failure outside any single entity write
    fn abandon(&mut self, phase: CommitPhase, progress: CommitReport, cause: OrmError) -> OrmError {
        self.uow.poison();
        warn!("Commit failed during {}: {}", phase, cause);
        OrmError::from(Box::new(CommitFailure {
            phase,
            key: None,
            progress,
            cause,
        }))
    }

    fn roll_back(&self) {
        if !self.store.in_transaction() {
            return;
        }
        match self.store.rollback() {
            Ok(()) => debug!("Rolled back failed commit"),
            Err(e) => warn!("Rollback after failed commit failed: {}", e),
        }
    }

    /// Commit and end the session
    pub fn finish(mut self) -> Result<CommitReport, OrmError> {
        self.commit()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            identity: self.identity.metrics(),
            loading: self.counters,
            store: self.store.metrics(),
            cached: self.identity.len(),
            pending_new: self.uow.new_keys().len(),
            pending_dirty: self.uow.dirty_keys().len(),
            pending_removed: self.uow.removed_keys().len(),
            commits: self.commits,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("uow", &self.uow)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Opens sessions over a shared store and registry.
#[derive(Clone)]
pub struct SessionFactory {
    store: Arc<dyn Store>,
    registry: Arc<MapperRegistry>,
    config: SessionConfig,
}

impl SessionFactory {
    pub fn new(store: Arc<dyn Store>, registry: Arc<MapperRegistry>, config: SessionConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn open(&self) -> Session {
        Session::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            self.config.clone(),
        )
    }

    /// Run `work` in a fresh session and commit it if `work` succeeds.
    ///
    /// On error the session is dropped with its pending changes.
    pub fn run<T, Err, F>(&self, work: F) -> Result<T, Err>
    where
        F: FnOnce(&mut Session) -> Result<T, Err>,
        Err: From<OrmError>,
    {
        let mut session = self.open();
        let value = work(&mut session)?;
        session.commit()?;
        Ok(value)
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<MapperRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}
