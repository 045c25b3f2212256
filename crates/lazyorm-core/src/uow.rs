//! Unit of Work: the session's change tracker.
//!
//! Tracks entity keys in three disjoint sets (new, dirty, removed) and
//! writes them out in one pass at commit time: inserts first, so later
//! updates can reference fresh identifiers, then updates, then deletes.
//!
//! The tracker holds keys only. The entities themselves stay owned by the
//! session's identity map and are resolved through it during commit.

use crate::context::LoadContext;
use crate::entity::Identified;
use crate::error::{CommitFailure, CommitPhase, OrmError};
use crate::types::EntityKey;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// Work performed by a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl CommitReport {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Display for CommitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} inserted, {} updated, {} deleted",
            self.inserted, self.updated, self.deleted
        )
    }
}

/// Which set an entity is tracked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tracking {
    New,
    Dirty,
    Removed,
}

#[derive(Debug, Default)]
pub struct UnitOfWork {
    new: Vec<EntityKey>,
    dirty: Vec<EntityKey>,
    removed: Vec<EntityKey>,
    poisoned: bool,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly created entity for insertion.
    pub fn register_new(&mut self, entity: &impl Identified) -> Result<(), OrmError> {
        let key = self.key_for(entity, "register as new")?;
        if let Some(tracking) = self.tracking(&key) {
            return Err(OrmError::invariant(format!(
                "{} is already tracked as {:?}",
                key, tracking
            )));
        }
        self.new.push(key);
        Ok(())
    }

    /// Track a changed entity for update. A no-op for entities already
    /// tracked as new or dirty.
    pub fn register_dirty(&mut self, entity: &impl Identified) -> Result<(), OrmError> {
        let key = self.key_for(entity, "register as dirty")?;
        match self.tracking(&key) {
            Some(Tracking::Removed) => Err(OrmError::invariant(format!(
                "{} is removed and cannot become dirty",
                key
            ))),
            Some(Tracking::New) | Some(Tracking::Dirty) => Ok(()),
            None => {
                self.dirty.push(key);
                Ok(())
            }
        }
    }

    /// Track an entity for deletion.
    ///
    /// An entity that was only ever new is simply forgotten, since it was
    /// never written.
    pub fn register_removed(&mut self, entity: &impl Identified) -> Result<(), OrmError> {
        let key = self.key_for(entity, "register as removed")?;
        if remove_key(&mut self.new, &key) {
            debug!("Dropped pending insert of {}", key);
            return Ok(());
        }
        remove_key(&mut self.dirty, &key);
        if !self.removed.contains(&key) {
            self.removed.push(key);
        }
        Ok(())
    }

    /// Declare an entity unchanged. Only validates its identifier.
    pub fn register_clean(&mut self, entity: &impl Identified) -> Result<(), OrmError> {
        self.key_for(entity, "register as clean").map(|_| ())
    }

    pub fn tracking(&self, key: &EntityKey) -> Option<Tracking> {
        if self.new.contains(key) {
            Some(Tracking::New)
        } else if self.dirty.contains(key) {
            Some(Tracking::Dirty)
        } else if self.removed.contains(key) {
            Some(Tracking::Removed)
        } else {
            None
        }
    }

    pub fn new_keys(&self) -> &[EntityKey] {
        &self.new
    }

    pub fn dirty_keys(&self) -> &[EntityKey] {
        &self.dirty
    }

    pub fn removed_keys(&self) -> &[EntityKey] {
        &self.removed
    }

    /// Number of tracked entities
    pub fn pending(&self) -> usize {
        self.new.len() + self.dirty.len() + self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Write every tracked change through its mapper: inserts, then
    /// updates, then deletes. Clears the tracked sets on success.
    ///
    /// On failure the returned [`CommitFailure`] names the phase, the
    /// entity and the work already done, and this unit of work refuses
    /// any further use.
    pub fn commit(&mut self, cx: &mut LoadContext<'_>) -> Result<CommitReport, OrmError> {
        self.ensure_usable()?;

        let new = std::mem::take(&mut self.new);
        let dirty = std::mem::take(&mut self.dirty);
        let removed = std::mem::take(&mut self.removed);
        let mut report = CommitReport::default();

        debug!("Commit phase insert: {} entities", new.len());
        for key in new {
            self.apply(cx, CommitPhase::Insert, key, report)?;
            report.inserted += 1;
        }

        debug!("Commit phase update: {} entities", dirty.len());
        for key in dirty {
            self.apply(cx, CommitPhase::Update, key, report)?;
            report.updated += 1;
        }

        debug!("Commit phase delete: {} entities", removed.len());
        for key in removed {
            self.apply(cx, CommitPhase::Delete, key, report)?;
            report.deleted += 1;
        }

        Ok(report)
    }

    fn apply(
        &mut self,
        cx: &mut LoadContext<'_>,
        phase: CommitPhase,
        key: EntityKey,
        progress: CommitReport,
    ) -> Result<(), OrmError> {
        let result = cx.registry().by_kind(key.kind).and_then(|mapper| match phase {
            CommitPhase::Insert => mapper.insert_key(cx, key),
            CommitPhase::Update => mapper.update_key(cx, key),
            CommitPhase::Delete => mapper.delete_key(cx, key),
            CommitPhase::Begin | CommitPhase::Complete => Err(OrmError::invariant(format!(
                "commit phase {} does not write entities",
                phase
            ))),
        });

        result.map_err(|cause| {
            self.poison();
            warn!("Commit failed during {} of {}: {}", phase, key, cause);
            OrmError::from(Box::new(CommitFailure {
                phase,
                key: Some(key),
                progress,
                cause,
            }))
        })
    }

    /// Refuse any further registration or commit
    pub(crate) fn poison(&mut self) {
        self.poisoned = true;
    }

    fn ensure_usable(&self) -> Result<(), OrmError> {
        if self.poisoned {
            return Err(OrmError::invariant(
                "unit of work was abandoned by a failed commit; start a new session",
            ));
        }
        Ok(())
    }

    fn key_for(&self, entity: &impl Identified, operation: &str) -> Result<EntityKey, OrmError> {
        self.ensure_usable()?;
        let kind = entity.entity_kind();
        let id = entity.entity_id().ok_or_else(|| {
            OrmError::invariant(format!("cannot {} a {} without an id", operation, kind))
        })?;
        Ok(EntityKey { kind, id })
    }
}

fn remove_key(keys: &mut Vec<EntityKey>, key: &EntityKey) -> bool {
    match keys.iter().position(|k| k == key) {
        Some(index) => {
            keys.remove(index);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityId, EntityKind};

    const ITEM: EntityKind = EntityKind::new("item");

    fn key(id: i64) -> EntityKey {
        EntityKey::new(ITEM, id)
    }

    /// An entity that has not been given an id yet
    struct Unsaved;

    impl Identified for Unsaved {
        fn entity_kind(&self) -> EntityKind {
            ITEM
        }

        fn entity_id(&self) -> Option<EntityId> {
            None
        }
    }

    #[test]
    fn test_register_new_twice_fails() {
        let mut uow = UnitOfWork::new();
        uow.register_new(&key(1)).unwrap();
        let err = uow.register_new(&key(1)).unwrap_err();
        assert!(matches!(err, OrmError::InvariantViolation(_)));
        assert_eq!(uow.new_keys(), &[key(1)]);
    }

    #[test]
    fn test_register_new_rejects_tracked_entities() {
        let mut uow = UnitOfWork::new();
        uow.register_dirty(&key(1)).unwrap();
        uow.register_removed(&key(2)).unwrap();

        assert!(uow.register_new(&key(1)).is_err());
        assert!(uow.register_new(&key(2)).is_err());
    }

    #[test]
    fn test_registration_requires_id() {
        let mut uow = UnitOfWork::new();
        assert!(uow.register_new(&Unsaved).is_err());
        assert!(uow.register_dirty(&Unsaved).is_err());
        assert!(uow.register_removed(&Unsaved).is_err());
        assert!(uow.register_clean(&Unsaved).is_err());
        assert!(uow.is_empty());
    }

    #[test]
    fn test_dirty_after_new_is_noop() {
        let mut uow = UnitOfWork::new();
        uow.register_new(&key(1)).unwrap();
        uow.register_dirty(&key(1)).unwrap();

        assert_eq!(uow.tracking(&key(1)), Some(Tracking::New));
        assert!(uow.dirty_keys().is_empty());
    }

    #[test]
    fn test_dirty_is_idempotent() {
        let mut uow = UnitOfWork::new();
        uow.register_dirty(&key(4)).unwrap();
        uow.register_dirty(&key(4)).unwrap();
        assert_eq!(uow.dirty_keys(), &[key(4)]);
    }

    #[test]
    fn test_dirty_after_removed_fails() {
        let mut uow = UnitOfWork::new();
        uow.register_removed(&key(1)).unwrap();
        assert!(uow.register_dirty(&key(1)).is_err());
    }

    #[test]
    fn test_removed_after_new_forgets_entity() {
        let mut uow = UnitOfWork::new();
        uow.register_new(&key(1)).unwrap();
        uow.register_removed(&key(1)).unwrap();

        assert_eq!(uow.tracking(&key(1)), None);
        assert!(uow.is_empty());
    }

    #[test]
    fn test_removed_evicts_dirty() {
        let mut uow = UnitOfWork::new();
        uow.register_dirty(&key(3)).unwrap();
        uow.register_removed(&key(3)).unwrap();
        uow.register_removed(&key(3)).unwrap();

        assert!(uow.dirty_keys().is_empty());
        assert_eq!(uow.removed_keys(), &[key(3)]);
    }

    #[test]
    fn test_clean_does_not_track() {
        let mut uow = UnitOfWork::new();
        uow.register_clean(&key(9)).unwrap();
        assert!(uow.is_empty());
    }

    #[test]
    fn test_sets_stay_disjoint() {
        let mut uow = UnitOfWork::new();
        for id in 1..=6 {
            uow.register_new(&key(id)).unwrap();
        }
        uow.register_dirty(&key(7)).unwrap();
        uow.register_removed(&key(2)).unwrap();
        uow.register_removed(&key(7)).unwrap();
        uow.register_dirty(&key(3)).unwrap();

        let mut all: Vec<EntityKey> = uow
            .new_keys()
            .iter()
            .chain(uow.dirty_keys())
            .chain(uow.removed_keys())
            .copied()
            .collect();
        let before = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), before);
        assert_eq!(uow.pending(), 6);
    }

    #[test]
    fn test_commit_report_display() {
        let report = CommitReport {
            inserted: 1,
            updated: 2,
            deleted: 3,
        };
        assert_eq!(report.to_string(), "1 inserted, 2 updated, 3 deleted");
        assert_eq!(report.total(), 6);
    }
}
