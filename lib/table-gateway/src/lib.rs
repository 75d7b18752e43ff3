//! Table Gateway - Data access objects and many-to-many relations over
//! pluggable database backends.
//!
//! # Core Concepts
//!
//! - **Row**: an ordered map of column name to [`Value`], the raw form of a
//!   record.
//! - **Entity**: an application type converted to and from rows by an
//!   [`EntityConverter`].
//! - **Relation**: a many-to-many link between two tables through a join
//!   table, described by a [`RelationDescriptor`] and written by [`HasJoin`].
//!
//! # Traits
//!
//! - [`Table`]: table metadata for an entity type (derivable)
//! - [`TableMetadata`]: entity-type to table lookup used by relations
//! - [`QueryExecutor`] / [`TransactionExecutor`]: backend operations
//! - [`RowInserter`]: single-row inserts used when linking relations
//! - [`FieldSource`]: field reads from any serializable entity
//!
//! Backends: [`MemoryExecutor`] here, PostgreSQL in `table-gateway-postgres`.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod config;
mod dao;
mod entity;
mod error;
mod hooks;
mod memory;
mod query;
mod record;
mod relation;
mod table;
mod time;

pub use config::{ConnectionConfig, DATABASE_URL_VAR, GatewayConnection};
pub use dao::{Dao, DaoBuilder};
pub use entity::{DateKind, EntityAccess, EntityConverter, FieldSource};
pub use error::GatewayError;
pub use hooks::{HookEvent, HookFn, HookPayload, Hooks};
pub use memory::{MemoryExecutor, MemoryTransaction};
pub use query::{
    Delete, Filter, Join, Order, Query, QueryExecutor, Row, RowInserter, TransactionExecutor,
    Update, Value,
};
pub use record::{EntityDao, Record, RecordState};
pub use relation::{HasJoin, RelationDescriptor, ResolvedDescriptor, join_table_name};
pub use table::{Table, TableInfo, TableMetadata, TableRegistry};
pub use time::{
    Clock, DATE_FORMAT, DEFAULT_DATETIME_FORMAT, FixedClock, GatewayDatetime, SystemClock,
    TIME_FORMAT, Timestamps,
};

// Re-export derive macro
pub use table_gateway_derive::Table;
