//! Data mappers: per-kind translation between rows and entities.
//!
//! A [`Mapping`] describes one entity type's table, its columns and how a
//! row decodes into fields. [`EntityMapper`] wraps a mapping with the
//! shared machinery: identity-map lookups, ghost creation, the load state
//! machine and the CRUD statements.
//!
//! All statements bind the identifier as `?1` followed by the mapped
//! columns in [`Mapping::columns`] order, so inserts and updates share
//! one parameter layout.

use crate::context::LoadContext;
use crate::entity::{Entity, EntityRef};
use crate::error::OrmError;
use crate::types::{EntityId, EntityKey, EntityKind, Row, Value};
use tracing::{debug, trace};

/// How one entity type maps onto a table.
pub trait Mapping: Send + Sync + 'static {
    type Entity: Entity;

    fn table(&self) -> &str;

    /// Non-key columns, in the order [`encode`](Mapping::encode) emits them
    fn columns(&self) -> &[&str];

    fn key_column(&self) -> &str {
        "id"
    }

    /// Column referencing an owning entity of kind `owner`, if any
    fn owner_column(&self, _owner: EntityKind) -> Option<&str> {
        None
    }

    /// Build the fields from a row. Associations should be resolved with
    /// `cx.find` so they come back as ghosts instead of being loaded.
    fn decode(&self, row: &Row, cx: &mut LoadContext<'_>) -> Result<Self::Entity, OrmError>;

    /// Column values for [`columns`](Mapping::columns)
    fn encode(&self, entity: &Self::Entity) -> Vec<Value>;

    fn select_list(&self) -> String {
        std::iter::once(self.key_column())
            .chain(self.columns().iter().copied())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn find_statement(&self) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            self.select_list(),
            self.table(),
            self.key_column()
        )
    }

    fn find_all_statement(&self) -> String {
        format!(
            "SELECT {} FROM {} ORDER BY {}",
            self.select_list(),
            self.table(),
            self.key_column()
        )
    }

    fn find_by_owner_statement(&self, owner: EntityKind) -> Option<String> {
        let column = self.owner_column(owner)?;
        Some(format!(
            "SELECT {} FROM {} WHERE {} = ?1 ORDER BY {}",
            self.select_list(),
            self.table(),
            column,
            self.key_column()
        ))
    }

    fn insert_statement(&self) -> String {
        let placeholders = (1..=self.columns().len() + 1)
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table(),
            self.select_list(),
            placeholders
        )
    }

    fn update_statement(&self) -> String {
        let assignments = self
            .columns()
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{} = ?{}", column, i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "UPDATE {} SET {} WHERE {} = ?1",
            self.table(),
            assignments,
            self.key_column()
        )
    }

    fn delete_statement(&self) -> String {
        format!("DELETE FROM {} WHERE {} = ?1", self.table(), self.key_column())
    }
}

/// Typed mapper operations for entity type `E`.
pub trait Mapper<E: Entity>: Send + Sync {
    fn table(&self) -> &str;

    /// Identity-map hit, or a fresh ghost registered in the map.
    /// Never touches the store.
    fn find(&self, cx: &mut LoadContext<'_>, id: EntityId) -> Result<EntityRef<E>, OrmError>;

    /// Fetch and populate a ghost; a no-op for loaded entities
    fn load(&self, cx: &mut LoadContext<'_>, entity: &EntityRef<E>) -> Result<(), OrmError>;

    /// Turn one already-fetched row into an entity, populating it if it is
    /// still a ghost
    fn load_row(&self, cx: &mut LoadContext<'_>, row: &Row) -> Result<EntityRef<E>, OrmError>;

    fn find_all(&self, cx: &mut LoadContext<'_>) -> Result<Vec<EntityRef<E>>, OrmError>;

    /// Run `sql` once and map every returned row
    fn find_many(
        &self,
        cx: &mut LoadContext<'_>,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<EntityRef<E>>, OrmError>;

    fn find_by_owner(
        &self,
        cx: &mut LoadContext<'_>,
        owner: EntityKind,
        owner_id: EntityId,
    ) -> Result<Vec<EntityRef<E>>, OrmError>;

    /// Write a new row, allocating an identifier if the entity has none
    fn insert(&self, cx: &mut LoadContext<'_>, entity: &EntityRef<E>)
        -> Result<EntityId, OrmError>;

    fn update(&self, cx: &mut LoadContext<'_>, entity: &EntityRef<E>) -> Result<(), OrmError>;

    fn delete(&self, cx: &mut LoadContext<'_>, id: EntityId) -> Result<(), OrmError>;
}

/// Mapper operations addressed by [`EntityKey`], for callers that do not
/// know the entity type statically.
pub trait ErasedMapper: Send + Sync {
    fn kind(&self) -> EntityKind;

    fn table(&self) -> &str;

    fn insert_key(&self, cx: &mut LoadContext<'_>, key: EntityKey) -> Result<(), OrmError>;

    fn update_key(&self, cx: &mut LoadContext<'_>, key: EntityKey) -> Result<(), OrmError>;

    fn delete_key(&self, cx: &mut LoadContext<'_>, key: EntityKey) -> Result<(), OrmError>;
}

struct Statements {
    find: String,
    find_all: String,
    insert: String,
    update: String,
    delete: String,
}

/// The standard [`Mapper`] built around a [`Mapping`].
pub struct EntityMapper<M: Mapping> {
    mapping: M,
    statements: Statements,
}

impl<M: Mapping> EntityMapper<M> {
    pub fn new(mapping: M) -> Self {
        let statements = Statements {
            find: mapping.find_statement(),
            find_all: mapping.find_all_statement(),
            insert: mapping.insert_statement(),
            update: mapping.update_statement(),
            delete: mapping.delete_statement(),
        };
        Self {
            mapping,
            statements,
        }
    }

    pub fn mapping(&self) -> &M {
        &self.mapping
    }

    fn fetch(&self, cx: &mut LoadContext<'_>, id: EntityId) -> Result<M::Entity, OrmError> {
        let rows = cx.store().run_query(&self.statements.find, &[id.into()])?;
        let row = rows
            .first()
            .ok_or(OrmError::NotFound(EntityKey::new(M::Entity::KIND, id)))?;
        self.mapping.decode(row, cx)
    }

    /// Identifier followed by the encoded columns
    fn params(&self, id: EntityId, entity: &EntityRef<M::Entity>) -> Result<Vec<Value>, OrmError> {
        let data = entity.try_read().ok_or_else(|| {
            OrmError::invariant(format!(
                "{}#{} must be loaded before it is written",
                M::Entity::KIND,
                id
            ))
        })?;
        let columns = self.mapping.encode(&data);
        if columns.len() != self.mapping.columns().len() {
            return Err(OrmError::invariant(format!(
                "{} mapping encoded {} values for {} columns",
                M::Entity::KIND,
                columns.len(),
                self.mapping.columns().len()
            )));
        }

        let mut params = Vec::with_capacity(columns.len() + 1);
        params.push(Value::from(id));
        params.extend(columns);
        Ok(params)
    }

    fn resolve(
        &self,
        cx: &mut LoadContext<'_>,
        key: EntityKey,
    ) -> Result<EntityRef<M::Entity>, OrmError> {
        cx.identity()
            .peek::<M::Entity>(key.id)
            .ok_or_else(|| OrmError::invariant(format!("{} is not in the identity map", key)))
    }
}

fn require_id<E: Entity>(entity: &EntityRef<E>, operation: &str) -> Result<EntityId, OrmError> {
    entity.id().ok_or_else(|| {
        OrmError::invariant(format!("cannot {} a {} without an id", operation, E::KIND))
    })
}

impl<M: Mapping> Mapper<M::Entity> for EntityMapper<M> {
    fn table(&self) -> &str {
        self.mapping.table()
    }

    fn find(
        &self,
        cx: &mut LoadContext<'_>,
        id: EntityId,
    ) -> Result<EntityRef<M::Entity>, OrmError> {
        if let Some(existing) = cx.identity().get::<M::Entity>(id) {
            return Ok(existing);
        }

        let ghost = EntityRef::ghost(id);
        cx.identity().insert(&ghost)?;
        cx.record_ghost();
        trace!("Created ghost {}#{}", M::Entity::KIND, id);
        Ok(ghost)
    }

    fn load(
        &self,
        cx: &mut LoadContext<'_>,
        entity: &EntityRef<M::Entity>,
    ) -> Result<(), OrmError> {
        let id = require_id(entity, "load")?;
        if !entity.begin_load()? {
            return Ok(());
        }

        debug!("Loading {}#{}", M::Entity::KIND, id);
        match self.fetch(cx, id) {
            Ok(data) => {
                entity.finish_load(data);
                cx.record_load();
                Ok(())
            }
            Err(e) => {
                entity.abort_load();
                Err(e)
            }
        }
    }

    fn load_row(
        &self,
        cx: &mut LoadContext<'_>,
        row: &Row,
    ) -> Result<EntityRef<M::Entity>, OrmError> {
        let id = row.get_id(self.mapping.key_column())?;
        let entity = self.find(cx, id)?;
        if !entity.is_ghost() || !entity.begin_load()? {
            return Ok(entity);
        }

        match self.mapping.decode(row, cx) {
            Ok(data) => {
                entity.finish_load(data);
                cx.record_load();
                Ok(entity)
            }
            Err(e) => {
                entity.abort_load();
                Err(e)
            }
        }
    }

    fn find_all(&self, cx: &mut LoadContext<'_>) -> Result<Vec<EntityRef<M::Entity>>, OrmError> {
        self.find_many(cx, &self.statements.find_all, &[])
    }

    fn find_many(
        &self,
        cx: &mut LoadContext<'_>,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<EntityRef<M::Entity>>, OrmError> {
        let rows = cx.store().run_query(sql, params)?;
        debug!(
            "Mapping {} {} rows from {}",
            rows.len(),
            M::Entity::KIND,
            self.mapping.table()
        );
        rows.iter().map(|row| self.load_row(cx, row)).collect()
    }

    fn find_by_owner(
        &self,
        cx: &mut LoadContext<'_>,
        owner: EntityKind,
        owner_id: EntityId,
    ) -> Result<Vec<EntityRef<M::Entity>>, OrmError> {
        let sql = self.mapping.find_by_owner_statement(owner).ok_or_else(|| {
            OrmError::invariant(format!(
                "{} has no column referencing {}",
                M::Entity::KIND,
                owner
            ))
        })?;
        self.find_many(cx, &sql, &[owner_id.into()])
    }

    fn insert(
        &self,
        cx: &mut LoadContext<'_>,
        entity: &EntityRef<M::Entity>,
    ) -> Result<EntityId, OrmError> {
        let id = match entity.id() {
            Some(id) => id,
            None => {
                let id = cx.store().next_id(M::Entity::KIND)?;
                entity.assign_id(id)?;
                id
            }
        };

        let params = self.params(id, entity)?;
        cx.store().run_execute(&self.statements.insert, &params)?;
        cx.identity().insert(entity)?;
        debug!("Inserted {}#{}", M::Entity::KIND, id);
        Ok(id)
    }

    fn update(
        &self,
        cx: &mut LoadContext<'_>,
        entity: &EntityRef<M::Entity>,
    ) -> Result<(), OrmError> {
        let id = require_id(entity, "update")?;
        // A ghost marked dirty is loaded so its stored values are rewritten unchanged
        self.load(cx, entity)?;

        let params = self.params(id, entity)?;
        let affected = cx.store().run_execute(&self.statements.update, &params)?;
        if affected == 0 {
            return Err(OrmError::NotFound(EntityKey::new(M::Entity::KIND, id)));
        }
        debug!("Updated {}#{}", M::Entity::KIND, id);
        Ok(())
    }

    fn delete(&self, cx: &mut LoadContext<'_>, id: EntityId) -> Result<(), OrmError> {
        let key = EntityKey::new(M::Entity::KIND, id);
        let affected = cx
            .store()
            .run_execute(&self.statements.delete, &[id.into()])?;
        if affected == 0 {
            return Err(OrmError::NotFound(key));
        }
        cx.identity().remove(&key);
        debug!("Deleted {}", key);
        Ok(())
    }
}

impl<M: Mapping> ErasedMapper for EntityMapper<M> {
    fn kind(&self) -> EntityKind {
        M::Entity::KIND
    }

    fn table(&self) -> &str {
        self.mapping.table()
    }

    fn insert_key(&self, cx: &mut LoadContext<'_>, key: EntityKey) -> Result<(), OrmError> {
        let entity = self.resolve(cx, key)?;
        self.insert(cx, &entity).map(|_| ())
    }

    fn update_key(&self, cx: &mut LoadContext<'_>, key: EntityKey) -> Result<(), OrmError> {
        let entity = self.resolve(cx, key)?;
        self.update(cx, &entity)
    }

    fn delete_key(&self, cx: &mut LoadContext<'_>, key: EntityKey) -> Result<(), OrmError> {
        self.delete(cx, key.id)
    }
}
