//! Database-agnostic query builder for table gateways.
//!
//! This module provides a query abstraction that can be translated to
//! different database backends (PostgreSQL, the in-memory store, etc.).

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use crate::time::{DATE_FORMAT, TIME_FORMAT};
use crate::{GatewayDatetime, GatewayError, Table};

/// A value that can be bound to a query parameter or held in a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Strings(Vec<String>),
    Datetime(GatewayDatetime),
    Date(NaiveDate),
    Time(NaiveTime),
    Json(serde_json::Value),
    Null,
}

/// A raw record: column name to value, in column order.
pub type Row = IndexMap<String, Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::UInt(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::UInt(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Convert a JSON value, keeping integers integral.
    ///
    /// Arrays made only of strings become `Strings`; other arrays and objects
    /// are kept as `Json`.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    n.as_f64().map(Value::Float).unwrap_or(Value::Null)
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) if items.iter().all(|v| v.is_string()) => {
                Value::Strings(
                    items
                        .into_iter()
                        .filter_map(|v| match v {
                            serde_json::Value::String(s) => Some(s),
                            _ => None,
                        })
                        .collect(),
                )
            }
            other => Value::Json(other),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::UInt(n) => serde_json::Value::from(*n),
            Value::Float(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Strings(v) => serde_json::Value::from(v.clone()),
            Value::Datetime(dt) => serde_json::to_value(dt).unwrap_or(serde_json::Value::Null),
            Value::Date(d) => serde_json::Value::String(d.format(DATE_FORMAT).to_string()),
            Value::Time(t) => serde_json::Value::String(t.format(TIME_FORMAT).to_string()),
            Value::Json(v) => v.clone(),
            Value::Null => serde_json::Value::Null,
        }
    }

    /// Order two values the way a database comparison would.
    ///
    /// Numbers compare across integer and float variants; other variants
    /// only compare with their own kind. `Null` never compares.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Datetime(a), Value::Datetime(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::Strings(a), Value::Strings(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::UInt(a), Value::UInt(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::UInt(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
            (Value::UInt(a), Value::Int(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
            (Value::Json(a), Value::Json(b)) if a == b => Some(Ordering::Equal),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::UInt(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::Strings(v)
    }
}

impl<'a> From<Vec<&'a str>> for Value {
    fn from(v: Vec<&'a str>) -> Self {
        Value::Strings(v.into_iter().map(|s| s.to_string()).collect())
    }
}

impl From<GatewayDatetime> for Value {
    fn from(dt: GatewayDatetime) -> Self {
        Value::Datetime(dt)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<NaiveTime> for Value {
    fn from(t: NaiveTime) -> Self {
        Value::Time(t)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::from_json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Filter conditions for queries.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// field = value
    Eq(String, Value),
    /// field != value
    Ne(String, Value),
    /// field > value
    Gt(String, Value),
    /// field >= value
    Gte(String, Value),
    /// field < value
    Lt(String, Value),
    /// field <= value
    Lte(String, Value),
    /// field IN (values) - for arrays
    In(String, Value),
    /// field IS NULL
    IsNull(String),
    /// field IS NOT NULL
    IsNotNull(String),
}

impl Filter {
    pub fn field(&self) -> &str {
        match self {
            Filter::Eq(field, _)
            | Filter::Ne(field, _)
            | Filter::Gt(field, _)
            | Filter::Gte(field, _)
            | Filter::Lt(field, _)
            | Filter::Lte(field, _)
            | Filter::In(field, _)
            | Filter::IsNull(field)
            | Filter::IsNotNull(field) => field,
        }
    }

    /// The bound value, if this filter takes one.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Filter::Eq(_, value)
            | Filter::Ne(_, value)
            | Filter::Gt(_, value)
            | Filter::Gte(_, value)
            | Filter::Lt(_, value)
            | Filter::Lte(_, value)
            | Filter::In(_, value) => Some(value),
            Filter::IsNull(_) | Filter::IsNotNull(_) => None,
        }
    }
}

/// Sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// The table to join.
    pub table: String,
    /// The field on the left table (main table).
    pub left_field: String,
    /// The field on the right table (joined table).
    pub right_field: String,
}

/// A SELECT query builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// The table to query.
    pub table: String,
    /// Columns to return. Empty selects every column.
    pub columns: Vec<String>,
    /// JOIN clauses.
    pub joins: Vec<Join>,
    /// Filter conditions.
    pub filters: Vec<Filter>,
    /// Order by clauses.
    pub order_by: Vec<(String, Order)>,
    /// Maximum number of results.
    pub limit: Option<u64>,
    /// Offset for pagination.
    pub offset: Option<u64>,
}

impl Query {
    /// Create a new query for a table type.
    pub fn of<T: Table>() -> Self {
        Self::for_table(T::table_name())
    }

    /// Create a new query with an explicit table name.
    pub fn for_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            joins: Vec::new(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Restrict the returned columns.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add a JOIN clause.
    ///
    /// Joins `join_table` where `left_field` (on main table) equals `right_field` (on join table).
    pub fn join(
        mut self,
        join_table: impl Into<String>,
        left_field: impl Into<String>,
        right_field: impl Into<String>,
    ) -> Self {
        self.joins.push(Join {
            table: join_table.into(),
            left_field: left_field.into(),
            right_field: right_field.into(),
        });
        self
    }

    /// Add a filter condition.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add an equality filter (shorthand for Filter::Eq).
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.into(), value.into()))
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Ne(field.into(), value.into()))
    }

    /// Add an IN filter (shorthand for Filter::In).
    pub fn r#in(self, field: impl Into<String>, values: impl Into<Value>) -> Self {
        self.filter(Filter::In(field.into(), values.into()))
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Gt(field.into(), value.into()))
    }

    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Gte(field.into(), value.into()))
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Lt(field.into(), value.into()))
    }

    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Lte(field.into(), value.into()))
    }

    pub fn is_null(self, field: impl Into<String>) -> Self {
        self.filter(Filter::IsNull(field.into()))
    }

    /// Add an order-by clause.
    pub fn order_by(mut self, field: impl Into<String>, order: Order) -> Self {
        self.order_by.push((field.into(), order));
        self
    }

    /// Set the maximum number of results.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the offset for pagination.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Turn the filters of this query into an UPDATE of `values`.
    pub fn into_update(self, values: Row) -> Update {
        Update {
            table: self.table,
            values,
            filters: self.filters,
        }
    }

    /// Turn the filters of this query into a DELETE.
    pub fn into_delete(self) -> Delete {
        Delete {
            table: self.table,
            filters: self.filters,
        }
    }
}

/// An UPDATE query builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// The table to update.
    pub table: String,
    /// Column values to set.
    pub values: Row,
    /// Filter conditions.
    pub filters: Vec<Filter>,
}

impl Update {
    pub fn for_table(table: impl Into<String>, values: Row) -> Self {
        Self {
            table: table.into(),
            values,
            filters: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.into(), value.into()))
    }
}

/// A DELETE query builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    /// The table to delete from.
    pub table: String,
    /// Filter conditions.
    pub filters: Vec<Filter>,
}

impl Delete {
    /// Create a new delete query with an explicit table name.
    pub fn for_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
        }
    }

    /// Add a filter condition.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add an equality filter (shorthand).
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.into(), value.into()))
    }

    /// Add an IN filter.
    pub fn r#in(self, field: impl Into<String>, values: impl Into<Value>) -> Self {
        self.filter(Filter::In(field.into(), values.into()))
    }
}

/// Trait for executing queries against a database backend.
///
/// Implemented by database-specific pool types (e.g., PgPool, MemoryExecutor).
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// The transaction type for this executor.
    type Transaction: TransactionExecutor;

    /// Execute a SELECT query and return results.
    async fn fetch(&self, query: &Query) -> Result<Vec<Row>, GatewayError>;

    /// Execute a SELECT query and return at most one result.
    async fn fetch_optional(&self, query: &Query) -> Result<Option<Row>, GatewayError> {
        let mut q = query.clone();
        q.limit = Some(1);

        let results = self.fetch(&q).await?;
        Ok(results.into_iter().next())
    }

    /// Check if any rows match the query (SELECT EXISTS).
    async fn exists(&self, query: &Query) -> Result<bool, GatewayError>;

    /// Insert a row and return the number of rows affected.
    async fn insert(&self, table: &str, row: &Row) -> Result<u64, GatewayError>;

    /// Insert a row and return the value the database assigned to `key`.
    async fn insert_get_id(&self, table: &str, key: &str, row: &Row)
    -> Result<Value, GatewayError>;

    /// Execute an UPDATE and return the number of rows affected.
    async fn update(&self, update: &Update) -> Result<u64, GatewayError>;

    /// Execute a DELETE query and return the number of rows affected.
    async fn delete(&self, delete: &Delete) -> Result<u64, GatewayError>;

    /// Begin a transaction. The returned executor can be used for queries within the transaction.
    async fn begin_transaction(&self) -> Result<Self::Transaction, GatewayError>;
}

/// Trait for executing queries within a transaction.
#[async_trait]
pub trait TransactionExecutor: Send + Sync {
    /// Execute a SELECT query within the transaction.
    async fn fetch(&mut self, query: &Query) -> Result<Vec<Row>, GatewayError>;

    /// Insert a row within the transaction.
    async fn insert(&mut self, table: &str, row: &Row) -> Result<u64, GatewayError>;

    /// Insert a row within the transaction and return its assigned key.
    async fn insert_get_id(
        &mut self,
        table: &str,
        key: &str,
        row: &Row,
    ) -> Result<Value, GatewayError>;

    /// Execute an UPDATE within the transaction.
    async fn update(&mut self, update: &Update) -> Result<u64, GatewayError>;

    /// Execute a DELETE query within the transaction.
    async fn delete(&mut self, delete: &Delete) -> Result<u64, GatewayError>;

    /// Commit the transaction.
    async fn commit(self) -> Result<(), GatewayError>;

    /// Rollback the transaction.
    async fn rollback(self) -> Result<(), GatewayError>;
}

/// Single-row insert into an arbitrary table.
///
/// This is what relation linking writes join rows through. Pools insert
/// directly; transactions insert inside the open transaction.
#[async_trait]
pub trait RowInserter: Send {
    async fn insert_row(&mut self, table: &str, row: Row) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn json_integers_stay_integral() {
        assert_eq!(Value::from_json(serde_json::json!(7)), Value::Int(7));
        assert_eq!(
            Value::from_json(serde_json::json!(u64::MAX)),
            Value::UInt(u64::MAX)
        );
        assert_eq!(Value::from_json(serde_json::json!(1.5)), Value::Float(1.5));
    }

    #[test]
    fn json_arrays_of_strings_become_strings() {
        assert_eq!(
            Value::from_json(serde_json::json!(["a", "b"])),
            Value::Strings(vec!["a".to_string(), "b".to_string()])
        );
        let mixed = serde_json::json!(["a", 1]);
        assert_eq!(Value::from_json(mixed.clone()), Value::Json(mixed));
    }

    #[test]
    fn numbers_compare_across_variants() {
        assert_eq!(Value::Int(3).compare(&Value::UInt(3)), Some(Ordering::Equal));
        assert_eq!(Value::Int(-1).compare(&Value::UInt(0)), Some(Ordering::Less));
        assert_eq!(Value::Float(2.5).compare(&Value::Int(2)), Some(Ordering::Greater));
        assert_eq!(Value::Null.compare(&Value::Null), None);
        assert_eq!(Value::from("1").compare(&Value::Int(1)), None);
    }

    #[test]
    fn query_filters_carry_over_to_update_and_delete() {
        let query = Query::for_table("author").eq("author_id", 7i64);
        let mut values = Row::new();
        values.insert("name".to_string(), Value::from("asao"));

        let update = query.clone().into_update(values.clone());
        assert_eq!(update.table, "author");
        assert_eq!(update.values, values);
        assert_eq!(update.filters, query.filters);

        let delete = query.clone().into_delete();
        assert_eq!(delete, Delete::for_table("author").eq("author_id", 7i64));
    }
}
