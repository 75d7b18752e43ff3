//! PostgreSQL implementation of QueryExecutor.

const DEFAULT_MAX_CONNECTIONS: u32 = 16;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Postgres, Transaction};
use std::ops::Deref;
use table_gateway::{
    ConnectionConfig, Delete, GatewayConnection, GatewayError, Query, QueryExecutor, Row,
    RowInserter, TransactionExecutor, Update, Value,
};

use crate::bind::{arguments, decode_column, decode_row};
use crate::sql::{self, Statement};

fn database_error(e: sqlx::Error) -> GatewayError {
    GatewayError::Database(e.to_string())
}

/// Wrapper around sqlx::PgPool that implements QueryExecutor.
#[derive(Clone, Debug)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    /// Create a new PgPool from an sqlx PgPool.
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self(pool)
    }

    /// Connect to a PostgreSQL database.
    pub async fn connect(url: &str) -> Result<Self, GatewayError> {
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(url)
            .await
            .map_err(database_error)?;
        tracing::debug!(max_connections = DEFAULT_MAX_CONNECTIONS, "connected to postgres");
        Ok(Self(pool))
    }

    /// Get the inner sqlx::PgPool.
    pub fn inner(&self) -> &sqlx::PgPool {
        &self.0
    }
}

impl Deref for PgPool {
    type Target = sqlx::PgPool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl GatewayConnection for PgPool {
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, GatewayError> {
        let config = config.into();
        PgPool::connect(config.url()).await
    }
}

async fn fetch_rows<'c, E>(executor: E, statement: &Statement) -> Result<Vec<Row>, GatewayError>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    tracing::trace!(sql = %statement.sql, params = statement.params.len(), "fetch");
    let args = arguments(&statement.params)?;
    let rows = sqlx::query_with(&statement.sql, args)
        .fetch_all(executor)
        .await
        .map_err(database_error)?;
    rows.iter().map(decode_row).collect()
}

async fn fetch_first_value<'c, E>(
    executor: E,
    statement: &Statement,
) -> Result<Value, GatewayError>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    tracing::trace!(sql = %statement.sql, params = statement.params.len(), "fetch one");
    let args = arguments(&statement.params)?;
    let row = sqlx::query_with(&statement.sql, args)
        .fetch_one(executor)
        .await
        .map_err(database_error)?;
    decode_column(&row, 0)
}

async fn execute<'c, E>(executor: E, statement: &Statement) -> Result<u64, GatewayError>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    tracing::trace!(sql = %statement.sql, params = statement.params.len(), "execute");
    let args = arguments(&statement.params)?;
    let result = sqlx::query_with(&statement.sql, args)
        .execute(executor)
        .await
        .map_err(database_error)?;
    Ok(result.rows_affected())
}

#[async_trait]
impl QueryExecutor for PgPool {
    type Transaction = PgTransaction;

    async fn fetch(&self, query: &Query) -> Result<Vec<Row>, GatewayError> {
        fetch_rows(&self.0, &sql::select(query)).await
    }

    async fn exists(&self, query: &Query) -> Result<bool, GatewayError> {
        match fetch_first_value(&self.0, &sql::exists(query)).await? {
            Value::Bool(exists) => Ok(exists),
            other => Err(GatewayError::Conversion(format!(
                "EXISTS returned {:?}",
                other
            ))),
        }
    }

    async fn insert(&self, table: &str, row: &Row) -> Result<u64, GatewayError> {
        execute(&self.0, &sql::insert(table, row, None)).await
    }

    async fn insert_get_id(
        &self,
        table: &str,
        key: &str,
        row: &Row,
    ) -> Result<Value, GatewayError> {
        fetch_first_value(&self.0, &sql::insert(table, row, Some(key))).await
    }

    async fn update(&self, update: &Update) -> Result<u64, GatewayError> {
        match sql::update(update) {
            Some(statement) => execute(&self.0, &statement).await,
            None => Ok(0),
        }
    }

    async fn delete(&self, delete: &Delete) -> Result<u64, GatewayError> {
        execute(&self.0, &sql::delete(delete)).await
    }

    async fn begin_transaction(&self) -> Result<Self::Transaction, GatewayError> {
        let tx = self.0.begin().await.map_err(database_error)?;
        Ok(PgTransaction { tx })
    }
}

#[async_trait]
impl RowInserter for PgPool {
    async fn insert_row(&mut self, table: &str, row: Row) -> Result<(), GatewayError> {
        QueryExecutor::insert(&*self, table, &row).await.map(|_| ())
    }
}

/// PostgreSQL transaction wrapper implementing TransactionExecutor.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl TransactionExecutor for PgTransaction {
    async fn fetch(&mut self, query: &Query) -> Result<Vec<Row>, GatewayError> {
        fetch_rows(&mut *self.tx, &sql::select(query)).await
    }

    async fn insert(&mut self, table: &str, row: &Row) -> Result<u64, GatewayError> {
        execute(&mut *self.tx, &sql::insert(table, row, None)).await
    }

    async fn insert_get_id(
        &mut self,
        table: &str,
        key: &str,
        row: &Row,
    ) -> Result<Value, GatewayError> {
        fetch_first_value(&mut *self.tx, &sql::insert(table, row, Some(key))).await
    }

    async fn update(&mut self, update: &Update) -> Result<u64, GatewayError> {
        match sql::update(update) {
            Some(statement) => execute(&mut *self.tx, &statement).await,
            None => Ok(0),
        }
    }

    async fn delete(&mut self, delete: &Delete) -> Result<u64, GatewayError> {
        execute(&mut *self.tx, &sql::delete(delete)).await
    }

    async fn commit(self) -> Result<(), GatewayError> {
        self.tx.commit().await.map_err(database_error)
    }

    async fn rollback(self) -> Result<(), GatewayError> {
        self.tx.rollback().await.map_err(database_error)
    }
}

#[async_trait]
impl RowInserter for PgTransaction {
    async fn insert_row(&mut self, table: &str, row: Row) -> Result<(), GatewayError> {
        TransactionExecutor::insert(self, table, &row).await.map(|_| ())
    }
}
