//! SQLite-backed [`Store`].

use super::{Statement, Store, StoreMetrics};
use crate::error::StoreError;
use crate::types::{EntityId, EntityKind, Row, Value};
use lazyorm_config::StoreConfig;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, Result as SqliteResult};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Table holding the next free identifier per entity kind
const SEQUENCE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS lazyorm_sequences (
    kind TEXT PRIMARY KEY NOT NULL,
    next_id INTEGER NOT NULL
);
"#;

/// Reserves `?2` identifiers for kind `?1` and returns the new high-water mark
const RESERVE_IDS: &str = r#"
INSERT INTO lazyorm_sequences (kind, next_id) VALUES (?1, 1 + ?2)
ON CONFLICT(kind) DO UPDATE SET next_id = next_id + ?2
RETURNING next_id
"#;

/// A half-open range of reserved identifiers
#[derive(Debug, Clone, Copy)]
struct IdBlock {
    next: i64,
    end: i64,
}

/// [`Store`] over a single SQLite connection.
///
/// Statements go through the connection's prepared statement cache, so
/// preparing the same SQL repeatedly is cheap.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    metrics: Mutex<StoreMetrics>,
    id_blocks: Mutex<HashMap<EntityKind, IdBlock>>,
    id_block_size: u32,
}

impl SqliteStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path, config: &StoreConfig) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::configure_connection(&conn, config)?;
        debug!("Opened SQLite store at {}", path.display());
        Self::from_connection(conn)
    }

    /// Create a private in-memory store
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SEQUENCE_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            metrics: Mutex::new(StoreMetrics::default()),
            id_blocks: Mutex::new(HashMap::new()),
            id_block_size: 1,
        })
    }

    /// Reserve identifiers `size` at a time instead of one per insert
    pub fn with_id_block_size(mut self, size: u32) -> Self {
        self.id_block_size = size.max(1);
        self
    }

    fn configure_connection(conn: &Connection, config: &StoreConfig) -> SqliteResult<()> {
        conn.pragma_update(None, "journal_mode", config.journal_mode.as_pragma())?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.set_prepared_statement_cache_capacity(config.statement_cache_capacity);
        Ok(())
    }

    /// Run a batch of statements, e.g. a schema script
    pub fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    fn reserve_block(&self, conn: &Connection, kind: EntityKind) -> Result<IdBlock, StoreError> {
        let size = i64::from(self.id_block_size);
        let high: i64 = conn.query_row(RESERVE_IDS, params![kind.as_str(), size], |row| {
            row.get(0)
        })?;
        debug!("Reserved ids {}..{} for {}", high - size, high, kind);
        Ok(IdBlock {
            next: high - size,
            end: high,
        })
    }
}

impl Store for SqliteStore {
    fn prepare(&self, sql: &str) -> Result<Statement, StoreError> {
        let conn = self.conn.lock();
        let stmt = conn.prepare_cached(sql)?;
        let statement = Statement::new(sql, stmt.parameter_count());
        self.metrics.lock().prepares += 1;
        Ok(statement)
    }

    fn query(&self, statement: &Statement, params: &[Value]) -> Result<Vec<Row>, StoreError> {
        statement.check_params(params)?;
        trace!(sql = statement.sql(), params = params.len(), "query");

        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(statement.sql())?;
        let columns: Arc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        let width = columns.len();

        let mut out = Vec::new();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(Value::from(row.get_ref(i)?));
            }
            out.push(Row::new(Arc::clone(&columns), values));
        }

        let mut metrics = self.metrics.lock();
        metrics.queries += 1;
        metrics.rows_read += out.len() as u64;
        Ok(out)
    }

    fn execute(&self, statement: &Statement, params: &[Value]) -> Result<usize, StoreError> {
        statement.check_params(params)?;
        trace!(sql = statement.sql(), params = params.len(), "execute");

        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(statement.sql())?;
        let affected = stmt.execute(params_from_iter(params.iter()))?;
        self.metrics.lock().executes += 1;
        Ok(affected)
    }

    fn next_id(&self, kind: EntityKind) -> Result<EntityId, StoreError> {
        let mut blocks = self.id_blocks.lock();
        let block = match blocks.get(&kind) {
            Some(block) if block.next < block.end => *block,
            _ => {
                let conn = self.conn.lock();
                self.reserve_block(&conn, kind)?
            }
        };

        let id = block.next;
        blocks.insert(
            kind,
            IdBlock {
                next: block.next + 1,
                end: block.end,
            },
        );
        self.metrics.lock().ids_allocated += 1;
        Ok(EntityId(id))
    }

    fn begin(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        if !conn.is_autocommit() {
            return Err(StoreError::TransactionActive);
        }
        conn.execute_batch("BEGIN IMMEDIATE")?;
        trace!("transaction started");
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        if conn.is_autocommit() {
            return Err(StoreError::NoTransaction);
        }
        conn.execute_batch("COMMIT")?;
        trace!("transaction committed");
        Ok(())
    }

    fn rollback(&self) -> Result<(), StoreError> {
        {
            let conn = self.conn.lock();
            if conn.is_autocommit() {
                return Err(StoreError::NoTransaction);
            }
            conn.execute_batch("ROLLBACK")?;
        }
        // Reservations made inside the transaction were undone with it
        self.id_blocks.lock().clear();
        debug!("transaction rolled back");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        !self.conn.lock().is_autocommit()
    }

    fn metrics(&self) -> StoreMetrics {
        *self.metrics.lock()
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("id_block_size", &self.id_block_size)
            .field("metrics", &self.metrics())
            .finish_non_exhaustive()
    }
}
