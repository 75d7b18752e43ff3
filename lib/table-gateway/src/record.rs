//! Entity-level DAO with explicit persistence state.

use std::marker::PhantomData;
use std::ops::Deref;

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    Dao, EntityConverter, FieldSource, GatewayError, HasJoin, HookEvent, HookPayload, Query,
    QueryExecutor, RelationDescriptor, Row, Table, TableMetadata, Value,
};

/// Where a record stands relative to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Created in memory, never written.
    New,
    /// Loaded from or saved to the database.
    Persisted,
    /// Removed from the database.
    Deleted,
}

/// An entity together with its persistence state.
///
/// Serializes as the bare entity.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct Record<E> {
    entity: E,
    #[serde(skip)]
    state: RecordState,
}

impl<E> Record<E> {
    pub fn new(entity: E) -> Self {
        Self {
            entity,
            state: RecordState::New,
        }
    }

    fn persisted(entity: E) -> Self {
        Self {
            entity,
            state: RecordState::Persisted,
        }
    }

    pub fn entity(&self) -> &E {
        &self.entity
    }

    pub fn entity_mut(&mut self) -> &mut E {
        &mut self.entity
    }

    pub fn into_entity(self) -> E {
        self.entity
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn is_persisted(&self) -> bool {
        self.state == RecordState::Persisted
    }

    pub fn is_deleted(&self) -> bool {
        self.state == RecordState::Deleted
    }
}

impl<E> Deref for Record<E> {
    type Target = E;

    fn deref(&self) -> &Self::Target {
        &self.entity
    }
}

/// DAO that reads and writes entities instead of raw rows.
///
/// Hooks registered on the underlying `Dao` also receive the entity events
/// (`Creating`/`Created`, `Saving`/`Saved`, `Loading`/`Loaded`,
/// `Removing`/`Removed`).
#[derive(Debug, Clone)]
pub struct EntityDao<E, X> {
    dao: Dao<X>,
    converter: EntityConverter,
    _marker: PhantomData<fn() -> E>,
}

impl<E, X> EntityDao<E, X>
where
    E: Table,
    X: QueryExecutor,
{
    /// Entity DAO for a table type over `executor`.
    pub fn of(executor: X) -> Self {
        Self::new(Dao::of::<E>(executor), EntityConverter::for_table::<E>())
    }

    /// Entity DAO for a table type over a configured `Dao`.
    pub fn with_dao(dao: Dao<X>) -> Self {
        Self::new(dao, EntityConverter::for_table::<E>())
    }
}

impl<E, X> EntityDao<E, X>
where
    E: Serialize + DeserializeOwned + Send + Sync,
    X: QueryExecutor,
{
    pub fn new(dao: Dao<X>, converter: EntityConverter) -> Self {
        Self {
            dao,
            converter,
            _marker: PhantomData,
        }
    }

    pub fn dao(&self) -> &Dao<X> {
        &self.dao
    }

    pub fn converter(&self) -> &EntityConverter {
        &self.converter
    }

    /// Build a new, unsaved record from raw data.
    pub fn create(&self, mut data: Row) -> Result<Record<E>, GatewayError> {
        self.dao
            .fire(HookEvent::Creating, &mut HookPayload::Row(&mut data))?;
        let entity = self.converter.to_entity(&data)?;
        self.dao
            .fire(HookEvent::Created, &mut HookPayload::Row(&mut data))?;
        Ok(Record::new(entity))
    }

    /// Write a record: update when persisted, insert otherwise.
    ///
    /// Values the database or the DAO assigned (serial key, timestamps) are
    /// written back into the entity.
    pub async fn save(&self, record: &mut Record<E>) -> Result<(), GatewayError> {
        if record.is_deleted() {
            return Err(GatewayError::NotFound(format!(
                "Record was removed from {}",
                self.dao.table()
            )));
        }

        let mut data = self.converter.to_row(&record.entity)?;
        self.dao
            .fire(HookEvent::Saving, &mut HookPayload::Row(&mut data))?;

        let mut written = if record.is_persisted() {
            let key = self.dao.primary_key();
            let id = data.get(key).cloned().unwrap_or(Value::Null);
            let mut values = data;
            values.shift_remove(key);
            let query = self.dao.query()?.eq(key, id.clone());
            let (_, mut written) = self.dao.apply_update(query, values).await?;
            written.insert(key.to_string(), id);
            written
        } else {
            self.dao.insert(data).await?
        };
        self.converter.merge(&mut record.entity, &written)?;
        record.state = RecordState::Persisted;

        self.dao
            .fire(HookEvent::Saved, &mut HookPayload::Row(&mut written))?;
        Ok(())
    }

    /// Load the records matched by `query`.
    pub async fn load(&self, mut query: Query) -> Result<Vec<Record<E>>, GatewayError> {
        self.dao
            .fire(HookEvent::Loading, &mut HookPayload::Query(&mut query))?;
        let mut rows = self.dao.select(query).await?;
        self.dao
            .fire(HookEvent::Loaded, &mut HookPayload::Rows(&mut rows))?;

        rows.iter()
            .map(|row| self.converter.to_entity(row).map(Record::persisted))
            .collect()
    }

    /// Load the record with primary key `id`.
    pub async fn find(&self, id: impl Into<Value>) -> Result<Option<Record<E>>, GatewayError> {
        let query = self.dao.query()?.eq(self.dao.primary_key(), id).limit(1);
        Ok(self.load(query).await?.into_iter().next())
    }

    /// Delete a record's row and mark it deleted.
    ///
    /// Only persisted records can be removed; a new or already removed record
    /// fails with `NotFound` and no hooks fire.
    pub async fn remove(&self, record: &mut Record<E>) -> Result<u64, GatewayError> {
        if !record.is_persisted() {
            return Err(GatewayError::NotFound(format!(
                "Record is not stored in {}",
                self.dao.table()
            )));
        }

        let key = self.converter.json_key(self.dao.primary_key());
        let id = record.entity.get_field(key)?;
        self.dao.fire(HookEvent::Removing, &mut HookPayload::Id(&id))?;

        let count = self.dao.delete_by_id(id.clone()).await?;
        record.state = RecordState::Deleted;

        self.dao.fire(HookEvent::Removed, &mut HookPayload::Id(&id))?;
        Ok(count)
    }

    /// Whether the record came from, or was written to, the database.
    pub fn is_retrieved(&self, record: &Record<E>) -> bool {
        record.is_persisted()
    }

    pub fn is_deleted(&self, record: &Record<E>) -> bool {
        record.is_deleted()
    }

    /// A many-to-many relation from this entity's table through a join table.
    pub fn has_join(
        &self,
        descriptor: RelationDescriptor,
        metadata: &(impl TableMetadata + ?Sized),
    ) -> Result<HasJoin, GatewayError> {
        self.dao.has_join(descriptor, metadata)
    }
}
