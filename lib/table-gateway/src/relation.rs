//! Many-to-many relations through a join table.
//!
//! A `RelationDescriptor` names the target entity type and, optionally, the
//! join table and key columns. Anything left unset is filled in from table
//! metadata by convention:
//!
//! - `join_by`: both table names, sorted, joined with `_` (`author` and
//!   `role` always give `author_role`)
//! - `target_key`: the target table's primary key; `target_by` and
//!   `join_target_key` default to it
//! - `source_key`: the source table's primary key; `join_source_key`
//!   defaults to it
//!
//! `HasJoin::relate` then writes one join row per target entity.

use crate::{
    FieldSource, GatewayError, Query, Row, RowInserter, Table, TableInfo, TableMetadata, Value,
};

/// Join table name for two tables, independent of which side is the source.
pub fn join_table_name(a: &str, b: &str) -> String {
    let mut tables = [a, b];
    tables.sort_unstable();
    tables.join("_")
}

/// A partially specified many-to-many relation.
///
/// Empty strings count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationDescriptor {
    pub target: String,
    pub join_by: Option<String>,
    pub target_key: Option<String>,
    pub target_by: Option<String>,
    pub join_target_key: Option<String>,
    pub source_key: Option<String>,
    pub join_source_key: Option<String>,
}

/// A relation with every naming field filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDescriptor {
    pub target: String,
    pub join_by: String,
    pub target_key: String,
    pub target_by: String,
    pub join_target_key: String,
    pub source_key: String,
    pub join_source_key: String,
}

impl RelationDescriptor {
    /// Relation to the entity type registered as `target`.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    /// Relation to a table type.
    pub fn to<T: Table>() -> Self {
        Self::new(T::entity_type())
    }

    pub fn join_by(mut self, join_by: impl Into<String>) -> Self {
        self.join_by = Some(join_by.into());
        self
    }

    pub fn target_key(mut self, key: impl Into<String>) -> Self {
        self.target_key = Some(key.into());
        self
    }

    pub fn target_by(mut self, key: impl Into<String>) -> Self {
        self.target_by = Some(key.into());
        self
    }

    pub fn join_target_key(mut self, key: impl Into<String>) -> Self {
        self.join_target_key = Some(key.into());
        self
    }

    pub fn source_key(mut self, key: impl Into<String>) -> Self {
        self.source_key = Some(key.into());
        self
    }

    pub fn join_source_key(mut self, key: impl Into<String>) -> Self {
        self.join_source_key = Some(key.into());
        self
    }

    /// Fill in every unset field.
    ///
    /// Target metadata is only looked up when `join_by` or `target_key` is
    /// missing; a failed lookup is returned unchanged.
    pub fn resolve(
        &self,
        source_table: &str,
        source_key: &str,
        metadata: &(impl TableMetadata + ?Sized),
    ) -> Result<ResolvedDescriptor, GatewayError> {
        let mut target_info: Option<TableInfo> = None;
        let mut target = || -> Result<TableInfo, GatewayError> {
            match &target_info {
                Some(info) => Ok(info.clone()),
                None => {
                    let info = metadata.table_info(&self.target)?;
                    target_info = Some(info.clone());
                    Ok(info)
                }
            }
        };

        let join_by = match supplied(&self.join_by) {
            Some(join_by) => join_by,
            None => join_table_name(source_table, target()?.name()),
        };
        let target_key = match supplied(&self.target_key) {
            Some(key) => key,
            None => target()?.primary_key().to_string(),
        };
        let target_by = supplied(&self.target_by).unwrap_or_else(|| target_key.clone());
        let join_target_key =
            supplied(&self.join_target_key).unwrap_or_else(|| target_key.clone());
        let source_key = supplied(&self.source_key).unwrap_or_else(|| source_key.to_string());
        let join_source_key =
            supplied(&self.join_source_key).unwrap_or_else(|| source_key.clone());

        Ok(ResolvedDescriptor {
            target: self.target.clone(),
            join_by,
            target_key,
            target_by,
            join_target_key,
            source_key,
            join_source_key,
        })
    }
}

fn supplied(field: &Option<String>) -> Option<String> {
    field.as_ref().filter(|s| !s.is_empty()).cloned()
}

impl From<ResolvedDescriptor> for RelationDescriptor {
    fn from(resolved: ResolvedDescriptor) -> Self {
        Self {
            target: resolved.target,
            join_by: Some(resolved.join_by),
            target_key: Some(resolved.target_key),
            target_by: Some(resolved.target_by),
            join_target_key: Some(resolved.join_target_key),
            source_key: Some(resolved.source_key),
            join_source_key: Some(resolved.join_source_key),
        }
    }
}

/// A many-to-many relation from a source table to a target entity type.
///
/// Starts unlinked; a successful `relate` links it.
#[derive(Debug, Clone)]
pub struct HasJoin {
    info: ResolvedDescriptor,
    target_table: String,
    // entity fields holding source_key and target_key
    source_field: String,
    target_field: String,
    linked: bool,
}

impl HasJoin {
    /// Resolve `descriptor` against the source table and the registry.
    pub fn new(
        descriptor: RelationDescriptor,
        source: &TableInfo,
        metadata: &(impl TableMetadata + ?Sized),
    ) -> Result<Self, GatewayError> {
        let target = metadata.table_info(&descriptor.target)?;
        let info = descriptor.resolve(source.name(), source.primary_key(), metadata)?;
        Ok(Self {
            source_field: source.field_name(&info.source_key).to_string(),
            target_field: target.field_name(&info.target_key).to_string(),
            target_table: target.name().to_string(),
            info,
            linked: false,
        })
    }

    pub fn descriptor(&self) -> &ResolvedDescriptor {
        &self.info
    }

    pub fn target_table(&self) -> &str {
        &self.target_table
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Link `source` to every entity in `targets`.
    ///
    /// Writes `{join_source_key: source id, join_target_key: target id}` into
    /// the join table once per target, in order. The first failed insert is
    /// returned and the remaining targets are not written; the relation stays
    /// unlinked. No transaction is opened here: pass a transaction as the
    /// `inserter` to make the batch atomic.
    ///
    /// An entity without a value for its key fails with `Conversion` before
    /// its row is written.
    pub async fn relate<S, T, I>(
        &mut self,
        source: &S,
        targets: &[T],
        inserter: &mut I,
    ) -> Result<bool, GatewayError>
    where
        S: FieldSource + ?Sized,
        T: FieldSource,
        I: RowInserter + ?Sized,
    {
        let source_id = key_value(source, &self.source_field)?;
        tracing::debug!(
            join_table = %self.info.join_by,
            source_id = ?source_id,
            targets = targets.len(),
            "relating entities"
        );

        for target in targets {
            let target_id = key_value(target, &self.target_field)?;
            let mut row = Row::new();
            row.insert(self.info.join_source_key.clone(), source_id.clone());
            row.insert(self.info.join_target_key.clone(), target_id);
            tracing::trace!(join_table = %self.info.join_by, row = ?row, "inserting join row");
            inserter.insert_row(&self.info.join_by, row).await?;
        }

        self.linked = true;
        Ok(self.linked)
    }

    /// Query for the target rows linked to `source`.
    pub fn targets_query<S>(&self, source: &S) -> Result<Query, GatewayError>
    where
        S: FieldSource + ?Sized,
    {
        let source_id = key_value(source, &self.source_field)?;
        Ok(Query::for_table(&self.target_table)
            .join(
                &self.info.join_by,
                &self.info.target_key,
                &self.info.join_target_key,
            )
            .eq(
                format!("{}.{}", self.info.join_by, self.info.join_source_key),
                source_id,
            ))
    }
}

fn key_value<S: FieldSource + ?Sized>(entity: &S, field: &str) -> Result<Value, GatewayError> {
    match entity.get_field(field)? {
        Value::Null => Err(GatewayError::Conversion(format!(
            "Entity has no value for key field '{}'",
            field
        ))),
        value => Ok(value),
    }
}
