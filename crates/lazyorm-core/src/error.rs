//! Error types for the persistence core.
//!
//! Everything propagates to the session boundary; nothing in the core
//! retries or swallows a failure.

use crate::types::{EntityKey, EntityKind};
use crate::uow::CommitReport;
use std::fmt;
use thiserror::Error;

/// Errors raised by a [`Store`](crate::store::Store) implementation
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("statement expects {expected} parameters, got {found}")]
    ParameterCount { expected: usize, found: usize },

    #[error("no transaction is active")]
    NoTransaction,

    #[error("a transaction is already active")]
    TransactionActive,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur in mapper, identity map, unit of work and session operations
#[derive(Debug, Error)]
pub enum OrmError {
    /// A registration or lifecycle precondition failed. This is a
    /// programming error and is never worth retrying.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Something was accessed while it was still being loaded
    #[error("re-entrant load of {0}: accessed while it is still loading")]
    ReentrantLoad(String),

    #[error("{0} not found in store")]
    NotFound(EntityKey),

    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Commit(#[from] Box<CommitFailure>),

    #[error("no mapper registered for entity kind '{0}'")]
    MapperNotRegistered(EntityKind),

    #[error("entity kind '{0}' is already registered")]
    DuplicateMapper(EntityKind),

    #[error("cannot decode column '{column}': {message}")]
    Decode { column: String, message: String },
}

impl OrmError {
    /// Create a new InvariantViolation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    /// Create a new Decode error.
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// True for contract violations that indicate a bug in the caller
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Self::InvariantViolation(_)
                | Self::ReentrantLoad(_)
                | Self::MapperNotRegistered(_)
                | Self::DuplicateMapper(_)
        )
    }
}

/// Phase of a unit-of-work commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitPhase {
    /// Opening the store transaction
    Begin,
    Insert,
    Update,
    Delete,
    /// Committing the store transaction after every write succeeded
    Complete,
}

impl fmt::Display for CommitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin => write!(f, "begin"),
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// A commit that stopped part way through.
///
/// The unit of work that produced it is poisoned and must be discarded.
#[derive(Debug, Error)]
#[error("commit failed during {phase}{} ({progress}): {cause}", failed_entity(.key))]
pub struct CommitFailure {
    pub phase: CommitPhase,
    /// The entity being written, if the failure was tied to one
    pub key: Option<EntityKey>,
    /// Work completed before the failure
    pub progress: CommitReport,
    #[source]
    pub cause: OrmError,
}

fn failed_entity(key: &Option<EntityKey>) -> String {
    key.map(|key| format!(" of {}", key)).unwrap_or_default()
}
