//! Table metadata for gateway types.
//!
//! Types implementing `Table` can be read and written through a `Dao`.
//! Add `#[derive(Table)]` to a serde struct to generate the implementation.

use std::collections::HashMap;

use serde::{Serialize, de::DeserializeOwned};

use crate::time::DEFAULT_DATETIME_FORMAT;
use crate::{GatewayError, Timestamps};

/// Trait for entity types backed by a database table.
///
/// Generated by `#[derive(Table)]`.
///
/// # Example
///
/// ```text
/// #[derive(Table, Serialize, Deserialize, Clone)]
/// #[table(name = "author")]
/// pub struct Author {
///     pub author_id: Option<i64>,
///     pub name: String,
///     pub created_at: Option<GatewayDatetime>,
///     pub updated_at: Option<GatewayDatetime>,
/// }
/// ```
///
/// # Conventions
///
/// The table name defaults to the type name in snake_case and the primary key
/// to `{table}_id`. Inserts let the database assign the primary key unless
/// `#[table(insert_serial = false)]` is given.
///
/// Use `#[column(skip)]` to exclude a field from the table.
/// Use `#[column(name = "custom_name")]` to override the column name.
pub trait Table: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Identifier used to look this type up in a `TableMetadata` registry.
    fn entity_type() -> &'static str;

    /// The database table name for this type.
    fn table_name() -> &'static str;

    /// Primary key column name.
    fn primary_key() -> &'static str;

    /// Column names in order.
    fn columns() -> &'static [&'static str];

    /// JSON key names in order, corresponding 1:1 with columns().
    fn json_keys() -> &'static [&'static str];

    /// Column types in order (database-agnostic).
    /// Values: "text", "datetime", "date", "time", "bigint", "integer", "float", "boolean", "json"
    fn column_types() -> &'static [&'static str];

    /// Whether the database assigns the primary key on insert.
    fn insert_serial() -> bool {
        true
    }

    /// Timestamp columns maintained on insert and update.
    fn timestamps() -> Timestamps {
        Timestamps::default()
    }

    fn table_info() -> TableInfo {
        TableInfo::new(Self::table_name())
            .with_primary_key(Self::primary_key())
            .with_columns(Self::columns().iter().copied())
            .with_json_keys(Self::json_keys().iter().copied())
            .with_insert_serial(Self::insert_serial())
            .with_timestamps(Self::timestamps())
    }
}

/// Runtime description of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    name: String,
    primary_key: String,
    columns: Vec<String>,
    json_keys: Vec<String>,
    insert_serial: bool,
    timestamps: Timestamps,
    datetime_format: String,
}

impl TableInfo {
    /// Describe `name` with the conventional defaults: primary key
    /// `{name}_id`, serial inserts, `created_at`/`updated_at` timestamps.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            primary_key: format!("{}_id", name),
            name,
            columns: Vec::new(),
            json_keys: Vec::new(),
            insert_serial: true,
            timestamps: Timestamps::default(),
            datetime_format: DEFAULT_DATETIME_FORMAT.to_string(),
        }
    }

    pub fn of<T: Table>() -> Self {
        T::table_info()
    }

    pub fn with_primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = key.into();
        self
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Entity field names, one per entry of `columns`.
    pub fn with_json_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.json_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_insert_serial(mut self, insert_serial: bool) -> Self {
        self.insert_serial = insert_serial;
        self
    }

    pub fn with_timestamps(mut self, timestamps: Timestamps) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn with_datetime_format(mut self, format: impl Into<String>) -> Self {
        self.datetime_format = format.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Configured column list; empty when the table accepts any column.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Entity field stored in `column`. Columns without a mapped key are
    /// read under their own name.
    pub fn field_name<'a>(&'a self, column: &'a str) -> &'a str {
        self.columns
            .iter()
            .zip(self.json_keys.iter())
            .find(|(c, _)| c.as_str() == column)
            .map(|(_, key)| key.as_str())
            .unwrap_or(column)
    }

    pub fn insert_serial(&self) -> bool {
        self.insert_serial
    }

    pub fn timestamps(&self) -> &Timestamps {
        &self.timestamps
    }

    pub fn datetime_format(&self) -> &str {
        &self.datetime_format
    }
}

/// Lookup from an entity-type identifier to its table description.
pub trait TableMetadata {
    fn table_info(&self, entity_type: &str) -> Result<TableInfo, GatewayError>;
}

/// Registry of known tables keyed by entity type.
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    tables: HashMap<String, TableInfo>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entity_type: impl Into<String>, info: TableInfo) {
        self.tables.insert(entity_type.into(), info);
    }

    pub fn register_table<T: Table>(&mut self) {
        self.register(T::entity_type(), T::table_info());
    }

    pub fn with_table<T: Table>(mut self) -> Self {
        self.register_table::<T>();
        self
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.tables.contains_key(entity_type)
    }
}

impl TableMetadata for TableRegistry {
    fn table_info(&self, entity_type: &str) -> Result<TableInfo, GatewayError> {
        self.tables.get(entity_type).cloned().ok_or_else(|| {
            GatewayError::Configuration(format!(
                "No table registered for entity type: {}",
                entity_type
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn primary_key_defaults_to_table_id() {
        let info = TableInfo::new("author");
        assert_eq!(info.name(), "author");
        assert_eq!(info.primary_key(), "author_id");
        assert!(info.insert_serial());
        assert_eq!(info.timestamps(), &Timestamps::default());
        assert_eq!(info.datetime_format(), DEFAULT_DATETIME_FORMAT);
    }

    #[test]
    fn explicit_primary_key_wins() {
        let info = TableInfo::new("users").with_primary_key("user_id");
        assert_eq!(info.primary_key(), "user_id");
    }

    #[test]
    fn field_names_follow_the_key_mapping() {
        let info = TableInfo::new("writer")
            .with_columns(["writer_id", "pen_name"])
            .with_json_keys(["writerId", "penName"]);
        assert_eq!(info.field_name("writer_id"), "writerId");
        assert_eq!(info.field_name("pen_name"), "penName");
        assert_eq!(info.field_name("bio"), "bio");
        assert_eq!(TableInfo::new("writer").field_name("writer_id"), "writer_id");
    }

    #[test]
    fn registry_lookup() {
        let mut registry = TableRegistry::new();
        registry.register("RoleDao", TableInfo::new("role"));

        assert!(registry.contains("RoleDao"));
        assert_eq!(registry.table_info("RoleDao").unwrap().name(), "role");
        assert!(matches!(
            registry.table_info("BlogDao"),
            Err(GatewayError::Configuration(_))
        ));
    }
}
