//! LazyORM Core - Unit of Work and Lazy Load persistence core
//!
//! This crate provides an object-persistence core over a relational store:
//! - Session-scoped identity map (one in-memory instance per entity key)
//! - Ghost entities loaded on first access
//! - Lazy value and collection holders loaded with a single query
//! - Data mappers resolved through a registry keyed by entity kind
//! - Unit of Work change tracking committed as insert → update → delete
//! - Single-table inheritance and embedded value layouts for mappings

pub mod context;
pub mod entity;
pub mod error;
pub mod identity;
pub mod layout;
pub mod lazy;
pub mod mapper;
pub mod registry;
pub mod session;
pub mod staff;
pub mod store;
pub mod types;
pub mod uow;

// Re-exports for convenience
pub use context::{LoadContext, LoadCounters};
pub use entity::{Entity, EntityRef, Identified, LoadState};
pub use error::{CommitFailure, CommitPhase, OrmError, StoreError};
pub use identity::{IdentityMap, IdentityMetrics};
pub use layout::{Embedded, SingleTable, Variant};
pub use lazy::{Lazy, LazyList, Loader};
pub use mapper::{EntityMapper, ErasedMapper, Mapper, Mapping};
pub use registry::MapperRegistry;
pub use session::{Session, SessionFactory, SessionStats};
pub use store::{SqliteStore, Statement, Store, StoreMetrics};
pub use types::{EntityId, EntityKey, EntityKind, Row, Value};
pub use uow::{CommitReport, Tracking, UnitOfWork};

// Config re-exports
pub use lazyorm_config::{ConfigLoader, OrmConfig, SessionConfig, StoreConfig};
