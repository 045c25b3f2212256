//! Backing store abstraction.
//!
//! Mappers never talk to a database directly. They prepare statements,
//! bind positional [`Value`] parameters and read back [`Row`]s through the
//! [`Store`] trait, which keeps the persistence core independent of any
//! particular driver.
//!
//! ```text
//! ┌──────────────┐    Statement + &[Value]    ┌───────────────┐
//! │ EntityMapper │ ─────────────────────────▶ │  dyn Store    │
//! │  (per kind)  │ ◀───────────────────────── │ (SqliteStore) │
//! └──────────────┘        Vec<Row>            └───────────────┘
//! ```

mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::types::{EntityId, EntityKind, Row, Value};
use serde::Serialize;
use std::sync::Arc;

/// A prepared, reusable statement handle.
///
/// Placeholders are positional (`?1`, `?2`, ...) and the parameter count is
/// checked on every execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Statement {
    sql: Arc<str>,
    parameter_count: usize,
}

impl Statement {
    pub fn new(sql: impl Into<Arc<str>>, parameter_count: usize) -> Self {
        Self {
            sql: sql.into(),
            parameter_count,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    /// Fail unless `params` matches the placeholder count
    pub fn check_params(&self, params: &[Value]) -> Result<(), StoreError> {
        if params.len() != self.parameter_count {
            return Err(StoreError::ParameterCount {
                expected: self.parameter_count,
                found: params.len(),
            });
        }
        Ok(())
    }
}

/// Counters of store round trips.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreMetrics {
    /// Statements prepared
    pub prepares: u64,
    /// Row-returning statements executed
    pub queries: u64,
    /// Mutating statements executed
    pub executes: u64,
    /// Rows returned by all queries
    pub rows_read: u64,
    /// Identifiers handed out
    pub ids_allocated: u64,
}

impl StoreMetrics {
    /// Total statements sent to the store
    pub fn round_trips(&self) -> u64 {
        self.queries + self.executes
    }
}

/// The relational store the mappers read from and write to.
///
/// Implementations must be shareable across sessions; each call is
/// independent unless bracketed by [`begin`](Store::begin) and
/// [`commit`](Store::commit)/[`rollback`](Store::rollback).
pub trait Store: Send + Sync {
    /// Prepare a statement for later execution
    fn prepare(&self, sql: &str) -> Result<Statement, StoreError>;

    /// Execute a row-returning statement
    fn query(&self, statement: &Statement, params: &[Value]) -> Result<Vec<Row>, StoreError>;

    /// Execute a mutating statement and return the affected row count
    fn execute(&self, statement: &Statement, params: &[Value]) -> Result<usize, StoreError>;

    /// Allocate a fresh, never reused identifier for `kind`
    fn next_id(&self, kind: EntityKind) -> Result<EntityId, StoreError>;

    fn begin(&self) -> Result<(), StoreError>;

    fn commit(&self) -> Result<(), StoreError>;

    fn rollback(&self) -> Result<(), StoreError>;

    fn in_transaction(&self) -> bool;

    fn metrics(&self) -> StoreMetrics;

    /// Prepare and run a query in one call
    fn run_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StoreError> {
        let statement = self.prepare(sql)?;
        self.query(&statement, params)
    }

    /// Prepare and run a mutating statement in one call
    fn run_execute(&self, sql: &str, params: &[Value]) -> Result<usize, StoreError> {
        let statement = self.prepare(sql)?;
        self.execute(&statement, params)
    }
}
