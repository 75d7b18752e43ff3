//! PostgreSQL implementation for table-gateway.
//!
//! `PgPool` implements `QueryExecutor` and `RowInserter`, and `PgTransaction`
//! implements `TransactionExecutor`, so every `Dao`, `EntityDao` and
//! `HasJoin` from `table-gateway` runs unchanged against PostgreSQL.
//!
//! # Usage
//!
//! ```text
//! use table_gateway::{ConnectionConfig, Dao, GatewayConnection};
//! use table_gateway_postgres::PgPool;
//!
//! let pool = PgPool::connect(ConnectionConfig::from_env()?.url()).await?;
//! let authors = Dao::of::<Author>(pool.clone());
//! let row = authors.find(1i64).await?;
//! ```
//!
//! Row values are bound by their `Value` variant; result columns are decoded
//! by their PostgreSQL type (`TIMESTAMP` and `TIMESTAMPTZ` become
//! `Value::Datetime`, `DATE` and `TIME` their typed variants).

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod bind;
mod executor;
mod sql;

pub use bind::{arguments, bind_value, decode_column, decode_row};
pub use executor::{PgPool, PgTransaction};
pub use sql::Statement;

/// Statement builders used by the executors.
pub mod statements {
    pub use crate::sql::{delete, exists, insert, select, update};
}

// Re-export core types for convenience
pub use table_gateway::{
    ConnectionConfig, Delete, Filter, GatewayConnection, GatewayError, Order, Query,
    QueryExecutor, Row, RowInserter, TransactionExecutor, Update, Value,
};
