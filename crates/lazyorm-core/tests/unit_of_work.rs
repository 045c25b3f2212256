//! Integration tests for change tracking and commit.

mod common;

use common::{count_rows, empty_store, factory, factory_with, seeded_store};
use lazyorm_core::staff::{Department, Employee, TimeRecord};
use lazyorm_core::{
    CommitFailure, CommitPhase, CommitReport, Entity, EntityId, EntityKey, EntityRef, OrmError,
    SessionConfig, Store, Tracking, UnitOfWork, Value,
};
use pretty_assertions::assert_eq;

fn non_transactional() -> SessionConfig {
    SessionConfig {
        transactional_commit: false,
        ..Default::default()
    }
}

fn commit_failure(err: OrmError) -> Box<CommitFailure> {
    match err {
        OrmError::Commit(failure) => failure,
        other => panic!("expected a commit failure, got {other:?}"),
    }
}

// ============================================================================
// Registration rules
// ============================================================================

#[test]
fn test_register_new_twice_fails() {
    let store = seeded_store();
    let mut session = factory(&store).open();
    let ada = session.find::<Employee>(7).expect("find");

    let mut uow = UnitOfWork::new();
    uow.register_new(&ada).expect("first registration");
    let err = uow.register_new(&ada).expect_err("second registration");
    assert!(matches!(err, OrmError::InvariantViolation(_)));
}

#[test]
fn test_registration_requires_id() {
    let detached = EntityRef::detached(Department::new("Nowhere"));
    let mut uow = UnitOfWork::new();

    assert!(uow.register_new(&detached).is_err());
    assert!(uow.register_dirty(&detached).is_err());
    assert!(uow.register_removed(&detached).is_err());
    assert!(uow.register_clean(&detached).is_err());
}

#[test]
fn test_create_with_taken_id_fails() {
    let store = empty_store();
    let mut session = factory(&store).open();

    session
        .create_with_id(7, Department::new("Research"))
        .expect("create");
    let err = session
        .create_with_id(7, Department::new("Research again"))
        .expect_err("id 7 is taken in this session");
    assert!(matches!(err, OrmError::InvariantViolation(_)));
}

// ============================================================================
// Commit
// ============================================================================

#[test]
fn test_create_then_commit_inserts_once() {
    let store = empty_store();
    let mut session = factory(&store).open();

    let research = session
        .create_with_id(7, Department::new("Research"))
        .expect("create");
    assert_eq!(research.id(), Some(EntityId(7)));
    assert_eq!(
        session.unit_of_work().new_keys(),
        &[EntityKey::new(Department::KIND, 7)]
    );

    let report = session.commit().expect("commit");
    assert_eq!(
        report,
        CommitReport {
            inserted: 1,
            updated: 0,
            deleted: 0
        }
    );

    let writes = store.recorded();
    assert_eq!(writes.len(), 1);
    assert!(writes[0].sql.starts_with("INSERT INTO departments"));
    assert_eq!(writes[0].params[0], Value::Integer(7));
    assert!(session.unit_of_work().is_empty());
    assert_eq!(count_rows(&store, "departments"), 1);
}

#[test]
fn test_commit_order_is_insert_update_delete() {
    let store = seeded_store();
    let mut session = factory(&store).open();

    // Registered in reverse order on purpose
    let record = session.find::<TimeRecord>(4).expect("find");
    session.remove(&record).expect("remove");
    let grace = session.find::<Employee>(8).expect("find");
    session
        .modify(&grace, |e| e.name = "Grace Hopper".to_string())
        .expect("modify");
    session.create(Department::new("Operations")).expect("create");
    store.clear();

    session.commit().expect("commit");

    assert_eq!(store.write_verbs(), vec!["INSERT", "UPDATE", "DELETE"]);
    let executes = store.executes();
    assert!(executes[0].contains("departments"));
    assert!(executes[1].contains("employees"));
    assert!(executes[2].contains("time_records"));
}

#[test]
fn test_new_then_removed_writes_nothing() {
    let store = empty_store();
    let mut session = factory(&store).open();

    let temp = session.create(Department::new("Temporary")).expect("create");
    let key = temp.key().expect("key");
    session.remove(&temp).expect("remove");

    assert_eq!(session.unit_of_work().tracking(&key), None);
    assert!(!session.identity_map().contains(&key));

    let report = session.commit().expect("commit");
    assert!(report.is_empty());
    assert!(store.executes().is_empty());
}

#[test]
fn test_dirty_after_new_is_captured_by_insert() {
    let store = empty_store();
    let mut session = factory(&store).open();

    let dept = session.create(Department::new("Draft")).expect("create");
    session
        .modify(&dept, |d| d.name = "Final".to_string())
        .expect("modify");

    let key = dept.key().expect("key");
    assert_eq!(session.unit_of_work().tracking(&key), Some(Tracking::New));
    assert!(session.unit_of_work().dirty_keys().is_empty());

    session.commit().expect("commit");
    let writes = store.recorded();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].params[1], Value::from("Final"));
}

#[test]
fn test_dirty_then_removed_deletes_only() {
    let store = seeded_store();
    let mut session = factory(&store).open();

    let record = session.find::<TimeRecord>(3).expect("find");
    session.modify(&record, |r| r.hours = 5.0).expect("modify");
    session.remove(&record).expect("remove");
    store.clear();

    session.commit().expect("commit");

    let writes = store.recorded();
    assert_eq!(writes.len(), 1);
    assert!(writes[0].sql.starts_with("DELETE FROM time_records"));
    assert_eq!(writes[0].params, vec![Value::Integer(3)]);
    assert_eq!(count_rows(&store, "time_records"), 3);
}

#[test]
fn test_dirty_ghost_is_loaded_before_update() {
    let store = seeded_store();
    let mut session = factory(&store).open();

    let sales = session.find::<Department>(2).expect("find");
    session.mark_dirty(&sales).expect("mark dirty");
    assert!(sales.is_ghost());

    session.commit().expect("commit");

    assert_eq!(store.queries().len(), 1);
    assert_eq!(store.write_verbs(), vec!["UPDATE"]);
    assert_eq!(
        store.recorded()[1].params,
        vec![Value::Integer(2), Value::from("Sales")]
    );
}

#[test]
fn test_modify_removed_entity_is_rejected() {
    let store = seeded_store();
    let mut session = factory(&store).open();

    let linus = session.find::<Employee>(9).expect("find");
    session.remove(&linus).expect("remove");

    let err = session
        .modify(&linus, |e| e.name = "Torvalds".to_string())
        .expect_err("removed entities cannot change");
    assert!(matches!(err, OrmError::InvariantViolation(_)));
    assert_eq!(session.get(&linus).expect("read").name, "Linus");
}

#[test]
fn test_commit_clears_tracking() {
    let store = seeded_store();
    let mut session = factory(&store).open();

    let ada = session.find::<Employee>(7).expect("find");
    session
        .modify(&ada, |e| e.name = "Ada Lovelace".to_string())
        .expect("modify");
    session.commit().expect("commit");
    store.clear();

    let report = session.commit().expect("second commit");
    assert!(report.is_empty());
    assert!(store.recorded().is_empty());
    assert_eq!(session.stats().commits, 1);
}

#[test]
fn test_insert_now_assigns_identifier() {
    let store = seeded_store();
    let mut session = factory(&store).open();

    let legal = EntityRef::detached(Department::new("Legal"));
    let id = session.insert_now(&legal).expect("insert");

    assert_eq!(id, EntityId(100));
    assert_eq!(legal.id(), Some(id));
    let found = session.find::<Department>(id).expect("find");
    assert!(found.ptr_eq(&legal));
    assert_eq!(count_rows(&store, "departments"), 3);
}

#[test]
fn test_insert_now_gives_employee_its_records_list() {
    let store = seeded_store();
    let mut session = factory(&store).open();

    let hire = EntityRef::detached(Employee::new("Barbara"));
    assert_eq!(session.insert_now(&hire).expect("insert"), EntityId(100));

    let data = session.get(&hire).expect("read");
    assert!(!data.time_records.is_loaded());
    assert!(session
        .collection(&data.time_records)
        .expect("records")
        .is_empty());
    assert_eq!(store.queries().len(), 1);
}

#[test]
fn test_new_records_reference_new_owner() {
    let store = empty_store();
    let mut session = factory(&store).open();

    let dept = session.create(Department::new("Support")).expect("create");
    let alan = session
        .create(Employee::new("Alan").with_department(dept.clone()))
        .expect("create");
    session
        .create(TimeRecord::new(alan.clone(), 7.5).with_note("triage"))
        .expect("create");
    session.commit().expect("commit");

    assert_eq!(count_rows(&store, "departments"), 1);
    assert_eq!(count_rows(&store, "employees"), 1);
    assert_eq!(count_rows(&store, "time_records"), 1);
}

// ============================================================================
// Commit failure
// ============================================================================

#[test]
fn test_failed_commit_reports_phase_and_progress() {
    let store = seeded_store();
    store.fail_when("UPDATE employees");
    let mut session = factory(&store).open();

    session.create(Department::new("Audit")).expect("create");
    let ada = session.find::<Employee>(7).expect("find");
    session
        .modify(&ada, |e| e.name = "Countess".to_string())
        .expect("modify");

    let err = session.commit().expect_err("update is rigged to fail");
    let failure = commit_failure(err);
    assert_eq!(failure.phase, CommitPhase::Update);
    assert_eq!(failure.key, Some(EntityKey::new(Employee::KIND, 7)));
    assert_eq!(failure.progress.inserted, 1);
    assert!(matches!(failure.cause, OrmError::Store(_)));

    // The transaction was rolled back, including the insert
    assert_eq!(count_rows(&store, "departments"), 2);
}

#[test]
fn test_failed_commit_poisons_session() {
    let store = seeded_store();
    store.fail_when("DELETE");
    let mut session = factory(&store).open();

    let record = session.find::<TimeRecord>(1).expect("find");
    session.remove(&record).expect("remove");
    session.commit().expect_err("delete is rigged to fail");
    assert!(session.unit_of_work().is_poisoned());

    let again = session.commit().expect_err("poisoned");
    assert!(matches!(again, OrmError::InvariantViolation(_)));

    let other = session.find::<TimeRecord>(2).expect("find");
    assert!(session.remove(&other).is_err());
}

#[test]
fn test_failed_transaction_commit_is_a_commit_failure() {
    let store = empty_store();
    store.fail_next_commit();
    let mut session = factory(&store).open();

    session
        .create_with_id(50, Department::new("Archive"))
        .expect("create");
    let err = session.commit().expect_err("COMMIT is rigged to fail");
    let failure = commit_failure(err);
    assert_eq!(failure.phase, CommitPhase::Complete);
    assert_eq!(failure.key, None);
    assert_eq!(failure.progress.inserted, 1);
    assert!(matches!(failure.cause, OrmError::Store(_)));

    assert!(session.unit_of_work().is_poisoned());
    assert!(!store.in_transaction());
    assert_eq!(count_rows(&store, "departments"), 0);

    // The lost insert must not be reported as an empty, successful commit
    let again = session.commit().expect_err("poisoned");
    assert!(matches!(again, OrmError::InvariantViolation(_)));
    assert!(session.create(Department::new("Later")).is_err());
}

#[test]
fn test_non_transactional_commit_keeps_partial_progress() {
    let store = seeded_store();
    store.fail_when("UPDATE employees");
    let mut session = factory_with(&store, non_transactional()).open();

    session.create(Department::new("Audit")).expect("create");
    let ada = session.find::<Employee>(7).expect("find");
    session
        .modify(&ada, |e| e.name = "Countess".to_string())
        .expect("modify");
    session.commit().expect_err("update is rigged to fail");

    assert_eq!(count_rows(&store, "departments"), 3);
}

#[test]
fn test_update_of_vanished_row_is_not_found() {
    let store = seeded_store();
    let mut session = factory(&store).open();

    let sales = session.find::<Department>(2).expect("find");
    session.ensure_loaded(&sales).expect("load");
    store
        .inner()
        .execute_batch("DELETE FROM departments WHERE id = 2")
        .expect("delete behind the session's back");

    session
        .modify(&sales, |d| d.name = "Revenue".to_string())
        .expect("modify");
    let err = session.commit().expect_err("row is gone");
    let failure = commit_failure(err);
    assert_eq!(failure.phase, CommitPhase::Update);
    assert!(matches!(failure.cause, OrmError::NotFound(key) if key.id == EntityId(2)));
}

#[test]
fn test_delete_of_absent_row_is_reported() {
    let store = seeded_store();
    let mut session = factory(&store).open();

    let phantom = session.find::<TimeRecord>(999).expect("find");
    session.remove(&phantom).expect("remove");

    let err = session.commit().expect_err("nothing to delete");
    let failure = commit_failure(err);
    assert_eq!(failure.phase, CommitPhase::Delete);
    assert!(matches!(failure.cause, OrmError::NotFound(_)));
}
