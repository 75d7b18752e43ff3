//! In-memory `QueryExecutor`.
//!
//! Tables are created on first insert. Queries support the full `Filter`
//! set, inner joins, ordering and pagination; unique constraints can be
//! declared per table. Transactions work on a snapshot that replaces the
//! shared store on commit.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::{
    Delete, Filter, GatewayError, Order, Query, QueryExecutor, Row, RowInserter,
    TransactionExecutor, Update, Value,
};

static NULL: Value = Value::Null;

/// Unique column sets per table.
type Constraints = HashMap<String, Vec<Vec<String>>>;

#[derive(Debug, Clone, Default)]
struct MemoryStore {
    tables: HashMap<String, Vec<Row>>,
    sequences: HashMap<String, i64>,
}

/// A row and the rows joined to it, by table name.
struct Joined<'a> {
    tables: Vec<(&'a str, &'a Row)>,
}

impl<'a> Joined<'a> {
    fn single(table: &'a str, row: &'a Row) -> Self {
        Self {
            tables: vec![(table, row)],
        }
    }

    /// Value of `table.column`, or of an unqualified column of the main table.
    fn get(&self, field: &str) -> &'a Value {
        let found = match field.split_once('.') {
            Some((table, column)) => self
                .tables
                .iter()
                .find(|(name, _)| *name == table)
                .and_then(|&(_, row)| row.get(column)),
            None => self.tables.first().and_then(|&(_, row)| row.get(field)),
        };
        found.unwrap_or(&NULL)
    }

    fn project(&self, columns: &[String]) -> Row {
        let Some(&(_, main)) = self.tables.first() else {
            return Row::new();
        };
        if columns.is_empty() {
            return main.clone();
        }

        let mut out = Row::new();
        for column in columns {
            if column == "*" {
                out.extend(main.iter().map(|(k, v)| (k.clone(), v.clone())));
            } else if let Some(table) = column.strip_suffix(".*") {
                if let Some(&(_, row)) = self.tables.iter().find(|(name, _)| *name == table) {
                    out.extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            } else {
                let name = column.rsplit_once('.').map_or(column.as_str(), |(_, c)| c);
                out.insert(name.to_string(), self.get(column).clone());
            }
        }
        out
    }
}

fn compares(a: &Value, b: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    a.compare(b).is_some_and(accept)
}

fn contains(set: &Value, value: &Value) -> bool {
    match set {
        Value::Strings(items) => value
            .as_str()
            .is_some_and(|s| items.iter().any(|item| item == s)),
        Value::Json(serde_json::Value::Array(items)) => items
            .iter()
            .any(|item| compares(&Value::from_json(item.clone()), value, Ordering::is_eq)),
        other => compares(other, value, Ordering::is_eq),
    }
}

fn matches(filter: &Filter, row: &Joined<'_>) -> bool {
    let value = row.get(filter.field());
    match filter {
        Filter::Eq(_, v) => compares(value, v, Ordering::is_eq),
        Filter::Ne(_, v) => compares(value, v, Ordering::is_ne),
        Filter::Gt(_, v) => compares(value, v, Ordering::is_gt),
        Filter::Gte(_, v) => compares(value, v, Ordering::is_ge),
        Filter::Lt(_, v) => compares(value, v, Ordering::is_lt),
        Filter::Lte(_, v) => compares(value, v, Ordering::is_le),
        Filter::In(_, v) => contains(v, value),
        Filter::IsNull(_) => value.is_null(),
        Filter::IsNotNull(_) => !value.is_null(),
    }
}

fn matches_all(filters: &[Filter], row: &Joined<'_>) -> bool {
    filters.iter().all(|filter| matches(filter, row))
}

/// Ascending order with nulls last.
fn sort_order(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.compare(b).unwrap_or(Ordering::Equal),
    }
}

fn collides(a: &Row, b: &Row, columns: &[String]) -> bool {
    columns.iter().all(|column| {
        match (a.get(column), b.get(column)) {
            (Some(x), Some(y)) => compares(x, y, Ordering::is_eq),
            _ => false,
        }
    })
}

fn check_unique(
    constraints: &Constraints,
    table: &str,
    existing: &[Row],
    row: &Row,
) -> Result<(), GatewayError> {
    for columns in constraints.get(table).into_iter().flatten() {
        if existing.iter().any(|other| collides(row, other, columns)) {
            return Err(GatewayError::Constraint(format!(
                "duplicate key value violates unique constraint on {}({})",
                table,
                columns.join(", ")
            )));
        }
    }
    Ok(())
}

fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

impl MemoryStore {
    fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.get(table).cloned().unwrap_or_default()
    }

    fn fetch(&self, query: &Query) -> Vec<Row> {
        let Some(main) = self.tables.get(&query.table) else {
            return Vec::new();
        };
        let mut candidates: Vec<Joined<'_>> = main
            .iter()
            .map(|row| Joined::single(&query.table, row))
            .collect();

        for join in &query.joins {
            let right = self.tables.get(&join.table).map_or(&[][..], Vec::as_slice);
            let mut next = Vec::new();
            for candidate in candidates {
                let left = candidate.get(&join.left_field);
                for row in right {
                    let other = row.get(&join.right_field).unwrap_or(&NULL);
                    if compares(left, other, Ordering::is_eq) {
                        let mut tables = candidate.tables.clone();
                        tables.push((join.table.as_str(), row));
                        next.push(Joined { tables });
                    }
                }
            }
            candidates = next;
        }

        candidates.retain(|row| matches_all(&query.filters, row));

        if !query.order_by.is_empty() {
            candidates.sort_by(|a, b| {
                for (field, order) in &query.order_by {
                    let ordering = sort_order(a.get(field), b.get(field));
                    let ordering = match order {
                        Order::Asc => ordering,
                        Order::Desc => ordering.reverse(),
                    };
                    if ordering.is_ne() {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        candidates
            .iter()
            .skip(query.offset.map_or(0, to_usize))
            .take(query.limit.map_or(usize::MAX, to_usize))
            .map(|row| row.project(&query.columns))
            .collect()
    }

    fn insert(
        &mut self,
        constraints: &Constraints,
        table: &str,
        row: &Row,
    ) -> Result<u64, GatewayError> {
        let rows = self.tables.entry(table.to_string()).or_default();
        check_unique(constraints, table, rows, row)?;
        rows.push(row.clone());
        Ok(1)
    }

    /// Insert with a serial key. An explicit non-null key is kept; otherwise
    /// the next sequence value is assigned. Sequence values are never reused.
    fn insert_get_id(
        &mut self,
        constraints: &Constraints,
        table: &str,
        key: &str,
        row: &Row,
    ) -> Result<Value, GatewayError> {
        let rows = self.tables.entry(table.to_string()).or_default();
        let sequence = self.sequences.entry(table.to_string()).or_insert(0);

        let id = match row.get(key) {
            Some(id) if !id.is_null() => {
                let taken = rows
                    .iter()
                    .any(|r| r.get(key).is_some_and(|v| compares(v, id, Ordering::is_eq)));
                if taken {
                    return Err(GatewayError::Constraint(format!(
                        "duplicate key value violates primary key {}({})",
                        table, key
                    )));
                }
                id.clone()
            }
            _ => {
                let highest = rows
                    .iter()
                    .filter_map(|r| r.get(key).and_then(Value::as_i64))
                    .max()
                    .unwrap_or(0);
                Value::Int(highest.max(*sequence) + 1)
            }
        };

        let mut stored = Row::with_capacity(row.len() + 1);
        stored.insert(key.to_string(), id.clone());
        for (column, value) in row {
            if column != key {
                stored.insert(column.clone(), value.clone());
            }
        }
        check_unique(constraints, table, rows, &stored)?;

        if let Some(n) = id.as_i64() {
            *sequence = (*sequence).max(n);
        }
        rows.push(stored);
        Ok(id)
    }

    fn update(&mut self, constraints: &Constraints, update: &Update) -> Result<u64, GatewayError> {
        let Some(rows) = self.tables.get(&update.table) else {
            return Ok(0);
        };

        let mut next = rows.clone();
        let mut count = 0;
        for row in next.iter_mut() {
            if matches_all(&update.filters, &Joined::single(&update.table, row)) {
                for (column, value) in &update.values {
                    row.insert(column.clone(), value.clone());
                }
                count += 1;
            }
        }
        for (i, row) in next.iter().enumerate() {
            check_unique(constraints, &update.table, &next[..i], row)?;
        }

        self.tables.insert(update.table.clone(), next);
        Ok(count)
    }

    fn delete(&mut self, delete: &Delete) -> u64 {
        let Some(rows) = self.tables.get_mut(&delete.table) else {
            return 0;
        };
        let before = rows.len();
        rows.retain(|row| !matches_all(&delete.filters, &Joined::single(&delete.table, row)));
        (before - rows.len()) as u64
    }
}

/// Shared in-memory database. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryExecutor {
    store: Arc<Mutex<MemoryStore>>,
    constraints: Arc<Constraints>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject rows whose `columns` all equal those of an existing row.
    pub fn with_unique<I, S>(mut self, table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::make_mut(&mut self.constraints)
            .entry(table.into())
            .or_default()
            .push(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Every row currently stored in `table`.
    pub fn rows(&self, table: &str) -> Result<Vec<Row>, GatewayError> {
        Ok(self.lock()?.rows(table))
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStore>, GatewayError> {
        self.store
            .lock()
            .map_err(|_| GatewayError::Database("memory store lock poisoned".to_string()))
    }

    fn with_store<T>(
        &self,
        f: impl FnOnce(&mut MemoryStore, &Constraints) -> Result<T, GatewayError>,
    ) -> Result<T, GatewayError> {
        let mut store = self.lock()?;
        f(&mut store, &self.constraints)
    }
}

#[async_trait]
impl QueryExecutor for MemoryExecutor {
    type Transaction = MemoryTransaction;

    async fn fetch(&self, query: &Query) -> Result<Vec<Row>, GatewayError> {
        self.with_store(|store, _| Ok(store.fetch(query)))
    }

    async fn exists(&self, query: &Query) -> Result<bool, GatewayError> {
        let mut query = query.clone();
        query.limit = Some(1);
        self.with_store(|store, _| Ok(!store.fetch(&query).is_empty()))
    }

    async fn insert(&self, table: &str, row: &Row) -> Result<u64, GatewayError> {
        self.with_store(|store, constraints| store.insert(constraints, table, row))
    }

    async fn insert_get_id(
        &self,
        table: &str,
        key: &str,
        row: &Row,
    ) -> Result<Value, GatewayError> {
        self.with_store(|store, constraints| store.insert_get_id(constraints, table, key, row))
    }

    async fn update(&self, update: &Update) -> Result<u64, GatewayError> {
        self.with_store(|store, constraints| store.update(constraints, update))
    }

    async fn delete(&self, delete: &Delete) -> Result<u64, GatewayError> {
        self.with_store(|store, _| Ok(store.delete(delete)))
    }

    async fn begin_transaction(&self) -> Result<MemoryTransaction, GatewayError> {
        let working = self.with_store(|store, _| Ok(store.clone()))?;
        tracing::trace!("memory transaction started");
        Ok(MemoryTransaction {
            shared: self.store.clone(),
            constraints: self.constraints.clone(),
            working,
        })
    }
}

#[async_trait]
impl RowInserter for MemoryExecutor {
    async fn insert_row(&mut self, table: &str, row: Row) -> Result<(), GatewayError> {
        QueryExecutor::insert(&*self, table, &row).await.map(|_| ())
    }
}

/// A transaction on a `MemoryExecutor`.
///
/// Writes go to a private snapshot taken at `begin_transaction`. Commit
/// replaces the shared tables with the snapshot; rollback, or dropping the
/// transaction, discards it.
#[derive(Debug)]
pub struct MemoryTransaction {
    shared: Arc<Mutex<MemoryStore>>,
    constraints: Arc<Constraints>,
    working: MemoryStore,
}

impl MemoryTransaction {
    fn publish(self) -> Result<(), GatewayError> {
        let mut store = self
            .shared
            .lock()
            .map_err(|_| GatewayError::Database("memory store lock poisoned".to_string()))?;
        *store = self.working;
        Ok(())
    }
}

#[async_trait]
impl TransactionExecutor for MemoryTransaction {
    async fn fetch(&mut self, query: &Query) -> Result<Vec<Row>, GatewayError> {
        Ok(self.working.fetch(query))
    }

    async fn insert(&mut self, table: &str, row: &Row) -> Result<u64, GatewayError> {
        self.working.insert(&self.constraints, table, row)
    }

    async fn insert_get_id(
        &mut self,
        table: &str,
        key: &str,
        row: &Row,
    ) -> Result<Value, GatewayError> {
        self.working.insert_get_id(&self.constraints, table, key, row)
    }

    async fn update(&mut self, update: &Update) -> Result<u64, GatewayError> {
        self.working.update(&self.constraints, update)
    }

    async fn delete(&mut self, delete: &Delete) -> Result<u64, GatewayError> {
        Ok(self.working.delete(delete))
    }

    async fn commit(self) -> Result<(), GatewayError> {
        self.publish()?;
        tracing::trace!("memory transaction committed");
        Ok(())
    }

    async fn rollback(self) -> Result<(), GatewayError> {
        tracing::trace!("memory transaction rolled back");
        Ok(())
    }
}

#[async_trait]
impl RowInserter for MemoryTransaction {
    async fn insert_row(&mut self, table: &str, row: Row) -> Result<(), GatewayError> {
        TransactionExecutor::insert(self, table, &row).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    async fn seeded() -> MemoryExecutor {
        let executor = MemoryExecutor::new();
        for (name, status) in [("carol", 2), ("alice", 1), ("bob", 1)] {
            executor
                .insert_get_id(
                    "users",
                    "user_id",
                    &row(&[("name", Value::from(name)), ("status", Value::Int(status))]),
                )
                .await
                .unwrap();
        }
        executor
    }

    #[tokio::test]
    async fn serial_keys_are_never_reused() {
        let executor = seeded().await;
        let delete = Delete::for_table("users").eq("user_id", 3i64);
        assert_eq!(executor.delete(&delete).await.unwrap(), 1);

        let id = executor
            .insert_get_id("users", "user_id", &row(&[("name", Value::from("dave"))]))
            .await
            .unwrap();
        assert_eq!(id, Value::Int(4));
    }

    #[tokio::test]
    async fn explicit_primary_key_must_be_free() {
        let executor = seeded().await;
        let taken = row(&[("user_id", Value::Int(1)), ("name", Value::from("eve"))]);
        assert!(matches!(
            executor.insert_get_id("users", "user_id", &taken).await,
            Err(GatewayError::Constraint(_))
        ));
    }

    #[tokio::test]
    async fn fetch_filters_orders_and_pages() {
        let executor = seeded().await;
        let query = Query::for_table("users")
            .eq("status", 1i64)
            .order_by("name", Order::Asc)
            .columns(["name"]);
        assert_eq!(
            executor.fetch(&query).await.unwrap(),
            vec![row(&[("name", Value::from("alice"))]), row(&[("name", Value::from("bob"))])]
        );

        let page = Query::for_table("users")
            .order_by("user_id", Order::Desc)
            .offset(1)
            .limit(1);
        let rows = executor.fetch(&page).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::from("alice")));
    }

    #[tokio::test]
    async fn in_and_null_filters() {
        let executor = seeded().await;
        let names = Query::for_table("users").r#in("name", vec!["bob", "carol"]);
        assert_eq!(executor.fetch(&names).await.unwrap().len(), 2);

        let missing = Query::for_table("users").is_null("email");
        assert_eq!(executor.fetch(&missing).await.unwrap().len(), 3);
        assert!(!executor
            .exists(&Query::for_table("users").ne("status", 1i64).ne("status", 2i64))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn joins_match_qualified_columns() {
        let executor = MemoryExecutor::new();
        for (id, name) in [(1, "admin"), (2, "editor")] {
            executor
                .insert("role", &row(&[("role_id", Value::Int(id)), ("name", Value::from(name))]))
                .await
                .unwrap();
        }
        for (author, role) in [(7, 1), (7, 2), (8, 2)] {
            executor
                .insert(
                    "author_role",
                    &row(&[("author_id", Value::Int(author)), ("role_id", Value::Int(role))]),
                )
                .await
                .unwrap();
        }

        let query = Query::for_table("role")
            .join("author_role", "role_id", "role_id")
            .eq("author_role.author_id", 8i64);
        assert_eq!(
            executor.fetch(&query).await.unwrap(),
            vec![row(&[("role_id", Value::Int(2)), ("name", Value::from("editor"))])]
        );
    }

    #[tokio::test]
    async fn unique_constraints_reject_duplicates() {
        let executor = MemoryExecutor::new().with_unique("author_role", ["author_id", "role_id"]);
        let link = row(&[("author_id", Value::Int(7)), ("role_id", Value::Int(1))]);
        executor.insert("author_role", &link).await.unwrap();

        assert!(matches!(
            executor.insert("author_role", &link).await,
            Err(GatewayError::Constraint(_))
        ));

        let other = row(&[("author_id", Value::Int(7)), ("role_id", Value::Int(2))]);
        executor.insert("author_role", &other).await.unwrap();
        let mut values = Row::new();
        values.insert("role_id".to_string(), Value::Int(1));
        let clash = Update::for_table("author_role", values).eq("role_id", 2i64);
        assert!(executor.update(&clash).await.is_err());
        assert_eq!(executor.rows("author_role").unwrap(), vec![link, other]);
    }

    #[tokio::test]
    async fn transactions_publish_only_on_commit() {
        let executor = MemoryExecutor::new();
        let first = row(&[("n", Value::Int(1))]);

        let mut tx = executor.begin_transaction().await.unwrap();
        tx.insert("t", &first).await.unwrap();
        assert_eq!(tx.fetch(&Query::for_table("t")).await.unwrap().len(), 1);
        assert!(executor.rows("t").unwrap().is_empty());
        tx.rollback().await.unwrap();
        assert!(executor.rows("t").unwrap().is_empty());

        let mut tx = executor.begin_transaction().await.unwrap();
        tx.insert_row("t", first.clone()).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(executor.rows("t").unwrap(), vec![first]);
    }
}
