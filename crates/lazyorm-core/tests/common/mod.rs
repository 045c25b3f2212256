//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lazyorm_core::staff;
use lazyorm_core::{
    EntityId, EntityKind, Row, SessionConfig, SessionFactory, SqliteStore, Statement, Store,
    StoreError, StoreMetrics, Value,
};
use parking_lot::Mutex;

/// Rows seeded by [`seeded_store`]
pub const SEED: &str = r#"
INSERT INTO departments (id, name) VALUES (1, 'Engineering'), (2, 'Sales');
INSERT INTO employees (id, name, department_id) VALUES
    (7, 'Ada', 1),
    (8, 'Grace', 1),
    (9, 'Linus', NULL);
INSERT INTO time_records (id, employee_id, hours, note) VALUES
    (1, 7, 8.0, 'design'),
    (2, 7, 6.5, NULL),
    (3, 7, 4.0, 'review'),
    (4, 8, 2.0, NULL);
INSERT INTO lazyorm_sequences (kind, next_id) VALUES
    ('department', 100),
    ('employee', 100),
    ('time_record', 100);
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Query,
    Execute,
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub verb: Verb,
    pub sql: String,
    pub params: Vec<Value>,
}

/// A store that records every statement sent to an in-memory SQLite store
/// and can be told to fail statements matching a fragment.
pub struct RecordingStore {
    inner: SqliteStore,
    log: Mutex<Vec<Recorded>>,
    fail_on: Mutex<Option<String>>,
    fail_commit: AtomicBool,
}

impl RecordingStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            log: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
            fail_commit: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &SqliteStore {
        &self.inner
    }

    /// Make every mutating statement containing `fragment` fail
    pub fn fail_when(&self, fragment: &str) {
        *self.fail_on.lock() = Some(fragment.to_string());
    }

    /// Make the next transaction commit fail, leaving the transaction open
    pub fn fail_next_commit(&self) {
        self.fail_commit.store(true, Ordering::SeqCst);
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.log.lock().clone()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }

    pub fn queries(&self) -> Vec<String> {
        self.sql_for(Verb::Query)
    }

    pub fn executes(&self) -> Vec<String> {
        self.sql_for(Verb::Execute)
    }

    /// First word of each executed statement, e.g. `["INSERT", "DELETE"]`
    pub fn write_verbs(&self) -> Vec<String> {
        self.executes()
            .iter()
            .filter_map(|sql| sql.split_whitespace().next().map(str::to_string))
            .collect()
    }

    fn sql_for(&self, verb: Verb) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter(|r| r.verb == verb)
            .map(|r| r.sql.clone())
            .collect()
    }

    fn record(&self, verb: Verb, statement: &Statement, params: &[Value]) {
        self.log.lock().push(Recorded {
            verb,
            sql: statement.sql().to_string(),
            params: params.to_vec(),
        });
    }
}

impl Store for RecordingStore {
    fn prepare(&self, sql: &str) -> Result<Statement, StoreError> {
        self.inner.prepare(sql)
    }

    fn query(&self, statement: &Statement, params: &[Value]) -> Result<Vec<Row>, StoreError> {
        self.record(Verb::Query, statement, params);
        self.inner.query(statement, params)
    }

    fn execute(&self, statement: &Statement, params: &[Value]) -> Result<usize, StoreError> {
        self.record(Verb::Execute, statement, params);
        if let Some(fragment) = self.fail_on.lock().as_deref() {
            if statement.sql().contains(fragment) {
                return Err(StoreError::Io(std::io::Error::other("injected failure")));
            }
        }
        self.inner.execute(statement, params)
    }

    fn next_id(&self, kind: EntityKind) -> Result<EntityId, StoreError> {
        self.inner.next_id(kind)
    }

    fn begin(&self) -> Result<(), StoreError> {
        self.inner.begin()
    }

    fn commit(&self) -> Result<(), StoreError> {
        if self.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("disk full at COMMIT")));
        }
        self.inner.commit()
    }

    fn rollback(&self) -> Result<(), StoreError> {
        self.inner.rollback()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    fn metrics(&self) -> StoreMetrics {
        self.inner.metrics()
    }
}

/// In-memory store with the staff schema and no rows
pub fn empty_store() -> Arc<RecordingStore> {
    let inner = SqliteStore::in_memory().expect("in-memory store");
    inner.execute_batch(staff::SCHEMA).expect("schema");
    Arc::new(RecordingStore::new(inner))
}

/// In-memory store with the staff schema and [`SEED`] rows
pub fn seeded_store() -> Arc<RecordingStore> {
    let store = empty_store();
    store.inner().execute_batch(SEED).expect("seed rows");
    store
}

pub fn factory(store: &Arc<RecordingStore>) -> SessionFactory {
    factory_with(store, SessionConfig::default())
}

pub fn factory_with(store: &Arc<RecordingStore>, config: SessionConfig) -> SessionFactory {
    let registry = staff::registry().expect("staff registry");
    let store: Arc<dyn Store> = Arc::clone(store) as _;
    SessionFactory::new(store, Arc::new(registry), config)
}

/// Count rows in `table` straight from the store
pub fn count_rows(store: &RecordingStore, table: &str) -> i64 {
    let rows = store
        .inner()
        .run_query(&format!("SELECT COUNT(*) AS n FROM {}", table), &[])
        .expect("count query");
    rows[0].get_i64("n").expect("count column")
}
