//! Table Data Gateway over a `QueryExecutor`.
//!
//! A `Dao` mediates every read and write for one table:
//! - `insert`: stamps timestamps, lets the database assign a serial key
//! - `update` / `update_by_id`: stamps `updated_*` timestamps
//! - `select` / `first` / `find`: reads raw rows
//! - `delete` / `delete_by_id`
//!
//! Each operation fires its `*ing` hook before touching the database and its
//! `*ed` hook after.

use std::fmt;
use std::sync::Arc;

use crate::{
    Clock, GatewayError, HasJoin, HookEvent, HookPayload, Hooks, Query, QueryExecutor,
    RelationDescriptor, Row, SystemClock, Table, TableInfo, TableMetadata, Value,
};

/// Builder for a `Dao`, collecting hooks before construction.
pub struct DaoBuilder<X> {
    executor: X,
    info: TableInfo,
    hooks: Hooks,
    clock: Arc<dyn Clock>,
}

impl<X: QueryExecutor> DaoBuilder<X> {
    /// Use `clock` for timestamp columns.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Register a hook callback.
    pub fn hook<F>(mut self, event: HookEvent, callback: F) -> Self
    where
        F: Fn(&mut HookPayload<'_>) -> Result<(), GatewayError> + Send + Sync + 'static,
    {
        self.hooks.on(event, callback);
        self
    }

    /// Replace the hook registry.
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Build the DAO, firing `Constructing` and `Constructed`.
    pub fn build(self) -> Result<Dao<X>, GatewayError> {
        self.hooks
            .fire(HookEvent::Constructing, &mut HookPayload::None)?;
        let dao = Dao {
            executor: self.executor,
            info: self.info,
            hooks: self.hooks,
            clock: self.clock,
        };
        dao.hooks.fire(HookEvent::Constructed, &mut HookPayload::None)?;
        Ok(dao)
    }
}

/// Data access object for a single table.
#[derive(Clone)]
pub struct Dao<X> {
    executor: X,
    info: TableInfo,
    hooks: Hooks,
    clock: Arc<dyn Clock>,
}

impl<X> fmt::Debug for Dao<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dao")
            .field("info", &self.info)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl<X: QueryExecutor> Dao<X> {
    pub fn builder(executor: X, info: TableInfo) -> DaoBuilder<X> {
        DaoBuilder {
            executor,
            info,
            hooks: Hooks::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// A DAO without hooks, using the system clock.
    pub fn new(executor: X, info: TableInfo) -> Self {
        Self {
            executor,
            info,
            hooks: Hooks::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// A DAO for a table type.
    pub fn of<T: Table>(executor: X) -> Self {
        Self::new(executor, T::table_info())
    }

    pub fn info(&self) -> &TableInfo {
        &self.info
    }

    pub fn table(&self) -> &str {
        self.info.name()
    }

    pub fn primary_key(&self) -> &str {
        self.info.primary_key()
    }

    pub fn executor(&self) -> &X {
        &self.executor
    }

    pub(crate) fn fire(
        &self,
        event: HookEvent,
        payload: &mut HookPayload<'_>,
    ) -> Result<(), GatewayError> {
        self.hooks.fire(event, payload)
    }

    /// A fresh query on this table.
    pub fn query(&self) -> Result<Query, GatewayError> {
        let mut query = Query::for_table(self.info.name());
        self.fire(HookEvent::NewQuery, &mut HookPayload::Query(&mut query))?;
        Ok(query)
    }

    /// Insert a row and return it as written.
    ///
    /// With a serial primary key the database assigns the key and it is
    /// written back into the returned row; a null key in `row` is dropped
    /// before inserting.
    pub async fn insert(&self, mut row: Row) -> Result<Row, GatewayError> {
        let now = self.clock.now();
        self.info.timestamps().stamp(&mut row, &now, true);
        self.fire(HookEvent::Inserting, &mut HookPayload::Row(&mut row))?;

        let key = self.info.primary_key();
        if self.info.insert_serial() {
            if row.get(key).is_some_and(Value::is_null) {
                row.shift_remove(key);
            }
            let id = self
                .executor
                .insert_get_id(self.info.name(), key, &row)
                .await?;
            row.insert(key.to_string(), id);
        } else {
            self.executor.insert(self.info.name(), &row).await?;
        }
        tracing::debug!(table = self.info.name(), id = ?row.get(key), "inserted row");

        self.fire(HookEvent::Inserted, &mut HookPayload::Row(&mut row))?;
        Ok(row)
    }

    /// Update the rows matched by `query` and return the number affected.
    pub async fn update(&self, query: Query, row: Row) -> Result<u64, GatewayError> {
        self.apply_update(query, row).await.map(|(count, _)| count)
    }

    /// Update the row with primary key `id`. The key column itself is not
    /// rewritten.
    pub async fn update_by_id(
        &self,
        id: impl Into<Value>,
        mut row: Row,
    ) -> Result<u64, GatewayError> {
        row.shift_remove(self.info.primary_key());
        let query = self.query()?.eq(self.info.primary_key(), id);
        self.update(query, row).await
    }

    pub(crate) async fn apply_update(
        &self,
        query: Query,
        mut row: Row,
    ) -> Result<(u64, Row), GatewayError> {
        let now = self.clock.now();
        self.info.timestamps().stamp(&mut row, &now, false);
        self.fire(HookEvent::Updating, &mut HookPayload::Row(&mut row))?;

        let mut update = query.into_update(row);
        let count = self.executor.update(&update).await?;
        tracing::debug!(table = %update.table, count, "updated rows");

        self.fire(HookEvent::Updated, &mut HookPayload::Row(&mut update.values))?;
        Ok((count, update.values))
    }

    /// Select the rows matched by `query`.
    pub async fn select(&self, mut query: Query) -> Result<Vec<Row>, GatewayError> {
        self.fire(HookEvent::Selecting, &mut HookPayload::Query(&mut query))?;
        let mut rows = self.executor.fetch(&query).await?;
        tracing::debug!(table = %query.table, count = rows.len(), "selected rows");

        self.fire(HookEvent::Selected, &mut HookPayload::Rows(&mut rows))?;
        Ok(rows)
    }

    /// First row matched by `query`.
    pub async fn first(&self, query: Query) -> Result<Option<Row>, GatewayError> {
        let rows = self.select(query.limit(1)).await?;
        Ok(rows.into_iter().next())
    }

    /// Row with primary key `id`.
    pub async fn find(&self, id: impl Into<Value>) -> Result<Option<Row>, GatewayError> {
        let query = self.query()?.eq(self.info.primary_key(), id);
        self.first(query).await
    }

    /// Delete the rows matched by `query` and return the number removed.
    pub async fn delete(&self, mut query: Query) -> Result<u64, GatewayError> {
        self.fire(HookEvent::Deleting, &mut HookPayload::Query(&mut query))?;
        let count = self.executor.delete(&query.clone().into_delete()).await?;
        tracing::debug!(table = %query.table, count, "deleted rows");

        self.fire(HookEvent::Deleted, &mut HookPayload::Query(&mut query))?;
        Ok(count)
    }

    /// Delete the row with primary key `id`.
    pub async fn delete_by_id(&self, id: impl Into<Value>) -> Result<u64, GatewayError> {
        let id = id.into();
        self.fire(HookEvent::Deleting, &mut HookPayload::Id(&id))?;
        let delete = self
            .query()?
            .eq(self.info.primary_key(), id.clone())
            .into_delete();
        let count = self.executor.delete(&delete).await?;
        tracing::debug!(table = self.info.name(), id = ?id, count, "deleted row");

        self.fire(HookEvent::Deleted, &mut HookPayload::Id(&id))?;
        Ok(count)
    }

    /// The configured column list, or the keys of `row` when none is
    /// configured.
    pub fn columns(&self, row: &Row) -> Vec<String> {
        if !self.info.columns().is_empty() {
            return self.info.columns().to_vec();
        }
        row.keys().cloned().collect()
    }

    /// A many-to-many relation from this table through a join table.
    pub fn has_join(
        &self,
        descriptor: RelationDescriptor,
        metadata: &(impl TableMetadata + ?Sized),
    ) -> Result<HasJoin, GatewayError> {
        HasJoin::new(descriptor, &self.info, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FixedClock, GatewayDatetime, MemoryExecutor, Timestamps};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn now() -> GatewayDatetime {
        GatewayDatetime::parse("2014-05-07 05:57:00", None).unwrap()
    }

    fn user_row(name: &str) -> Row {
        let mut row = Row::new();
        row.insert("name".to_string(), Value::from(name));
        row.insert("status".to_string(), Value::Int(1));
        row
    }

    fn dao(executor: MemoryExecutor) -> Dao<MemoryExecutor> {
        Dao::builder(executor, TableInfo::new("users").with_primary_key("user_id"))
            .clock(FixedClock(now()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn insert_assigns_serial_key_and_timestamps() {
        let dao = dao(MemoryExecutor::new());
        let row = dao.insert(user_row("asao")).await.unwrap();

        assert_eq!(row.get("user_id"), Some(&Value::Int(1)));
        assert_eq!(row.get("created_at"), Some(&Value::Datetime(now())));
        assert_eq!(row.get("updated_at"), Some(&Value::Datetime(now())));

        let second = dao.insert(user_row("bob")).await.unwrap();
        assert_eq!(second.get("user_id"), Some(&Value::Int(2)));
    }

    #[tokio::test]
    async fn insert_without_serial_keeps_given_key() {
        let info = TableInfo::new("author_role")
            .with_insert_serial(false)
            .with_timestamps(Timestamps::none());
        let executor = MemoryExecutor::new();
        let dao = Dao::new(executor.clone(), info);

        let mut row = Row::new();
        row.insert("author_id".to_string(), Value::Int(7));
        row.insert("role_id".to_string(), Value::Int(1));
        let written = dao.insert(row.clone()).await.unwrap();

        assert_eq!(written, row);
        assert_eq!(executor.rows("author_role").unwrap(), vec![row]);
    }

    #[tokio::test]
    async fn update_by_id_stamps_only_updated_at() {
        let executor = MemoryExecutor::new();
        let dao = dao(executor.clone());
        dao.insert(user_row("asao")).await.unwrap();

        let later = GatewayDatetime::parse("2014-05-08 00:00:00", None).unwrap();
        let dao = Dao::builder(executor, dao.info().clone())
            .clock(FixedClock(later))
            .build()
            .unwrap();
        let count = dao.update_by_id(1i64, user_row("renamed")).await.unwrap();
        assert_eq!(count, 1);

        let found = dao.find(1i64).await.unwrap().unwrap();
        assert_eq!(found.get("name"), Some(&Value::from("renamed")));
        assert_eq!(found.get("created_at"), Some(&Value::Datetime(now())));
        assert_eq!(found.get("updated_at"), Some(&Value::Datetime(later)));
    }

    #[tokio::test]
    async fn select_and_delete_follow_the_query() {
        let dao = dao(MemoryExecutor::new());
        for name in ["a", "b", "c"] {
            dao.insert(user_row(name)).await.unwrap();
        }

        let rows = dao.select(dao.query().unwrap().gte("user_id", 2i64)).await.unwrap();
        assert_eq!(rows.len(), 2);

        let first = dao
            .first(dao.query().unwrap().eq("name", "c"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.get("user_id"), Some(&Value::Int(3)));

        assert_eq!(dao.delete_by_id(1i64).await.unwrap(), 1);
        assert_eq!(dao.delete(dao.query().unwrap().eq("status", 1i64)).await.unwrap(), 2);
        assert!(dao.select(dao.query().unwrap()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hooks_fire_around_each_operation() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut builder = Dao::builder(MemoryExecutor::new(), TableInfo::new("users"));
        for event in [
            HookEvent::Constructing,
            HookEvent::Constructed,
            HookEvent::NewQuery,
            HookEvent::Inserting,
            HookEvent::Inserted,
            HookEvent::Selecting,
            HookEvent::Selected,
        ] {
            let events = events.clone();
            builder = builder.hook(event, move |_| {
                events.lock().unwrap().push(event);
                Ok(())
            });
        }
        let dao = builder.build().unwrap();
        dao.insert(user_row("asao")).await.unwrap();
        dao.select(dao.query().unwrap()).await.unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                HookEvent::Constructing,
                HookEvent::Constructed,
                HookEvent::Inserting,
                HookEvent::Inserted,
                HookEvent::NewQuery,
                HookEvent::Selecting,
                HookEvent::Selected,
            ]
        );
    }

    #[tokio::test]
    async fn inserting_hook_can_fill_values() {
        let dao = Dao::builder(MemoryExecutor::new(), TableInfo::new("users"))
            .hook(HookEvent::Inserting, |payload| {
                if let HookPayload::Row(row) = payload {
                    row.insert("status".to_string(), Value::Int(9));
                }
                Ok(())
            })
            .build()
            .unwrap();

        let row = dao.insert(Row::new()).await.unwrap();
        assert_eq!(row.get("status"), Some(&Value::Int(9)));
    }

    #[tokio::test]
    async fn failing_hook_aborts_the_write() {
        let executor = MemoryExecutor::new();
        let dao = Dao::builder(executor.clone(), TableInfo::new("users"))
            .hook(HookEvent::Inserting, |_| {
                Err(GatewayError::Configuration("read only".to_string()))
            })
            .build()
            .unwrap();

        assert!(dao.insert(user_row("asao")).await.is_err());
        assert!(executor.rows("users").unwrap().is_empty());
    }

    #[test]
    fn columns_prefer_configuration() {
        let executor = MemoryExecutor::new();
        let row = user_row("asao");

        let open = Dao::new(executor.clone(), TableInfo::new("users"));
        assert_eq!(open.columns(&row), vec!["name".to_string(), "status".to_string()]);

        let fixed = Dao::new(
            executor,
            TableInfo::new("users").with_columns(["status", "name", "email"]),
        );
        assert_eq!(
            fixed.columns(&row),
            vec!["status".to_string(), "name".to_string(), "email".to_string()]
        );
    }
}
