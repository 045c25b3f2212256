//! Entities and the ghost load-state machine.
//!
//! Every in-memory entity lives behind an [`EntityRef`], a cheap shared
//! handle. Two refs obtained for the same key in one session point at the
//! same cell, so reference equality is identity equality.
//!
//! ```text
//!   ghost(id) ──begin_load──▶ Loading ──finish_load──▶ Loaded
//!       ▲                        │
//!       └──────abort_load────────┘
//! ```

use crate::error::OrmError;
use crate::types::{EntityId, EntityKey, EntityKind};
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// A persistent domain type.
pub trait Entity: Send + Sync + 'static {
    /// Stable tag used to find this type's mapper
    const KIND: EntityKind;

    /// Called once when a new entity receives its identifier, before it is
    /// first written. Fields keyed on the entity's own id are set up here.
    fn identified(&mut self, _id: EntityId) {}
}

/// Observable load state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    /// Only the identifier is known
    Ghost,
    /// Fields are being populated
    Loading,
    /// All fields are populated
    Loaded,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ghost => write!(f, "ghost"),
            Self::Loading => write!(f, "loading"),
            Self::Loaded => write!(f, "loaded"),
        }
    }
}

/// Field storage tagged with its load state. Field data exists only when loaded.
pub(crate) enum Slot<E> {
    Ghost,
    Loading,
    Loaded(E),
}

impl<E> Slot<E> {
    fn state(&self) -> LoadState {
        match self {
            Slot::Ghost => LoadState::Ghost,
            Slot::Loading => LoadState::Loading,
            Slot::Loaded(_) => LoadState::Loaded,
        }
    }
}

pub(crate) struct EntityCell<E> {
    id: OnceLock<EntityId>,
    slot: RwLock<Slot<E>>,
}

/// Shared handle to one in-memory entity.
pub struct EntityRef<E: Entity> {
    cell: Arc<EntityCell<E>>,
}

impl<E: Entity> EntityRef<E> {
    fn from_parts(id: Option<EntityId>, slot: Slot<E>) -> Self {
        let cell = EntityCell {
            id: OnceLock::new(),
            slot: RwLock::new(slot),
        };
        if let Some(id) = id {
            let _ = cell.id.set(id);
        }
        Self {
            cell: Arc::new(cell),
        }
    }

    pub(crate) fn ghost(id: EntityId) -> Self {
        Self::from_parts(Some(id), Slot::Ghost)
    }

    pub(crate) fn loaded(id: EntityId, data: E) -> Self {
        Self::from_parts(Some(id), Slot::Loaded(data))
    }

    /// A loaded entity that has no identifier yet.
    ///
    /// The identifier is assigned when the entity is first inserted.
    pub fn detached(data: E) -> Self {
        Self::from_parts(None, Slot::Loaded(data))
    }

    pub(crate) fn from_cell(cell: Arc<EntityCell<E>>) -> Self {
        Self { cell }
    }

    pub(crate) fn cell(&self) -> &Arc<EntityCell<E>> {
        &self.cell
    }

    pub fn id(&self) -> Option<EntityId> {
        self.cell.id.get().copied()
    }

    pub fn key(&self) -> Option<EntityKey> {
        self.id().map(|id| EntityKey::new(E::KIND, id))
    }

    pub fn kind(&self) -> EntityKind {
        E::KIND
    }

    pub fn state(&self) -> LoadState {
        self.cell.slot.read().state()
    }

    pub fn is_ghost(&self) -> bool {
        self.state() == LoadState::Ghost
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == LoadState::Loaded
    }

    /// True when both handles point at the same in-memory entity
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Fix the identifier and hand it to [`Entity::identified`]. Setting it
    /// again to the same value is allowed.
    pub(crate) fn assign_id(&self, id: EntityId) -> Result<(), OrmError> {
        if let Some(current) = self.id() {
            return self.check_id(current, id);
        }

        let mut slot = self.cell.slot.try_write().ok_or_else(|| {
            OrmError::invariant(format!("{} is borrowed and cannot be given an id", E::KIND))
        })?;
        match self.cell.id.set(id) {
            Ok(()) => {
                if let Slot::Loaded(data) = &mut *slot {
                    data.identified(id);
                }
                Ok(())
            }
            Err(_) => self.check_id(self.id().unwrap_or(id), id),
        }
    }

    fn check_id(&self, current: EntityId, id: EntityId) -> Result<(), OrmError> {
        if current != id {
            return Err(OrmError::invariant(format!(
                "{} already has id {}, cannot reassign to {}",
                E::KIND,
                current,
                id
            )));
        }
        Ok(())
    }

    /// Ghost → Loading.
    ///
    /// Returns `false` if the entity is already loaded and there is nothing to do.
    pub(crate) fn begin_load(&self) -> Result<bool, OrmError> {
        let mut slot = self.cell.slot.write();
        match *slot {
            Slot::Ghost => {
                *slot = Slot::Loading;
                Ok(true)
            }
            Slot::Loading => Err(OrmError::ReentrantLoad(self.describe())),
            Slot::Loaded(_) => Ok(false),
        }
    }

    /// Loading → Loaded
    pub(crate) fn finish_load(&self, data: E) {
        *self.cell.slot.write() = Slot::Loaded(data);
    }

    /// Loading → Ghost, after a failed load
    pub(crate) fn abort_load(&self) {
        let mut slot = self.cell.slot.write();
        if matches!(*slot, Slot::Loading) {
            *slot = Slot::Ghost;
        }
    }

    /// Read the fields if the entity is loaded. Never triggers a load.
    pub fn try_read(&self) -> Option<MappedRwLockReadGuard<'_, E>> {
        RwLockReadGuard::try_map(self.cell.slot.read(), |slot| match slot {
            Slot::Loaded(data) => Some(data),
            _ => None,
        })
        .ok()
    }

    /// Write access to a loaded entity's fields.
    ///
    /// Fails instead of blocking when a read guard is still alive.
    pub(crate) fn try_write(&self) -> Result<MappedRwLockWriteGuard<'_, E>, OrmError> {
        let guard = self.cell.slot.try_write().ok_or_else(|| {
            OrmError::invariant(format!("{} is borrowed and cannot be modified", self.describe()))
        })?;
        RwLockWriteGuard::try_map(guard, |slot| match slot {
            Slot::Loaded(data) => Some(data),
            _ => None,
        })
        .map_err(|guard| {
            OrmError::invariant(format!(
                "{} is {} and cannot be modified",
                self.describe(),
                guard.state()
            ))
        })
    }

    fn describe(&self) -> String {
        match self.id() {
            Some(id) => EntityKey::new(E::KIND, id).to_string(),
            None => format!("{}#<unassigned>", E::KIND),
        }
    }
}

impl<E: Entity> Clone for EntityRef<E> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<E: Entity> fmt::Debug for EntityRef<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRef")
            .field("kind", &E::KIND)
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

/// Anything the unit of work can track.
pub trait Identified {
    fn entity_kind(&self) -> EntityKind;

    /// `None` until an identifier has been assigned
    fn entity_id(&self) -> Option<EntityId>;
}

impl<E: Entity> Identified for EntityRef<E> {
    fn entity_kind(&self) -> EntityKind {
        E::KIND
    }

    fn entity_id(&self) -> Option<EntityId> {
        self.id()
    }
}

impl Identified for EntityKey {
    fn entity_kind(&self) -> EntityKind {
        self.kind
    }

    fn entity_id(&self) -> Option<EntityId> {
        Some(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Widget {
        label: String,
    }

    impl Entity for Widget {
        const KIND: EntityKind = EntityKind::new("widget");
    }

    #[test]
    fn test_ghost_transitions() {
        let w = EntityRef::<Widget>::ghost(EntityId(7));
        assert_eq!(w.state(), LoadState::Ghost);
        assert!(w.try_read().is_none());

        assert!(w.begin_load().unwrap());
        assert_eq!(w.state(), LoadState::Loading);

        w.finish_load(Widget {
            label: "gear".into(),
        });
        assert!(w.is_loaded());
        assert_eq!(w.try_read().unwrap().label, "gear");

        // Loading an already loaded entity is a no-op
        assert!(!w.begin_load().unwrap());
    }

    #[test]
    fn test_begin_load_while_loading_fails_fast() {
        let w = EntityRef::<Widget>::ghost(EntityId(1));
        w.begin_load().unwrap();

        let err = w.begin_load().unwrap_err();
        assert!(matches!(err, OrmError::ReentrantLoad(ref what) if what == "widget#1"));
    }

    #[test]
    fn test_abort_load_reverts_to_ghost() {
        let w = EntityRef::<Widget>::ghost(EntityId(1));
        w.begin_load().unwrap();
        w.abort_load();
        assert!(w.is_ghost());
    }

    #[test]
    fn test_detached_entity_gets_id_once() {
        let w = EntityRef::detached(Widget {
            label: "bolt".into(),
        });
        assert_eq!(w.id(), None);
        assert_eq!(w.key(), None);
        assert!(w.is_loaded());

        w.assign_id(EntityId(3)).unwrap();
        w.assign_id(EntityId(3)).unwrap();
        assert!(w.assign_id(EntityId(4)).is_err());
        assert_eq!(w.key(), Some(EntityKey::new(Widget::KIND, 3)));
    }

    /// Remembers the id it was given
    #[derive(Debug, Default)]
    struct Ticket {
        number: Option<EntityId>,
    }

    impl Entity for Ticket {
        const KIND: EntityKind = EntityKind::new("ticket");

        fn identified(&mut self, id: EntityId) {
            assert!(self.number.is_none(), "identified twice");
            self.number = Some(id);
        }
    }

    #[test]
    fn test_assign_id_notifies_entity_once() {
        let t = EntityRef::detached(Ticket::default());
        t.assign_id(EntityId(12)).unwrap();
        t.assign_id(EntityId(12)).unwrap();
        assert_eq!(t.try_read().unwrap().number, Some(EntityId(12)));
    }

    #[test]
    fn test_assign_id_refuses_while_read() {
        let t = EntityRef::detached(Ticket::default());
        let guard = t.try_read().unwrap();
        assert!(t.assign_id(EntityId(1)).is_err());
        drop(guard);

        assert_eq!(t.id(), None);
        t.assign_id(EntityId(1)).unwrap();
    }

    #[test]
    fn test_clones_share_identity() {
        let a = EntityRef::loaded(EntityId(1), Widget { label: "a".into() });
        let b = a.clone();
        let c = EntityRef::loaded(EntityId(1), Widget { label: "a".into() });

        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
    }

    #[test]
    fn test_try_write_refuses_while_read() {
        let w = EntityRef::loaded(EntityId(1), Widget { label: "a".into() });
        let guard = w.try_read().unwrap();
        assert!(w.try_write().is_err());
        drop(guard);

        w.try_write().unwrap().label = "b".into();
        assert_eq!(w.try_read().unwrap().label, "b");
    }

    #[test]
    fn test_try_write_refuses_ghost() {
        let w = EntityRef::<Widget>::ghost(EntityId(2));
        let err = w.try_write().unwrap_err();
        assert!(err.to_string().contains("widget#2 is ghost"));
    }
}
