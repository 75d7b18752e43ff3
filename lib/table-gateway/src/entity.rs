//! Conversion between raw rows and application entities.
//!
//! Entities are any serde types. Conversion goes through `serde_json`, with
//! datetime columns parsed into typed values on the way to a row and
//! rendered back to strings on the way to an entity.

use chrono::{NaiveDate, NaiveTime};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::time::{DATE_FORMAT, DEFAULT_DATETIME_FORMAT, TIME_FORMAT};
use crate::{GatewayDatetime, GatewayError, Row, Table, Value};

/// Kind of value held by a datetime column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateKind {
    Datetime,
    Date,
    Time,
}

impl DateKind {
    /// Map a `Table::column_types()` entry to a datetime kind.
    pub fn from_column_type(column_type: &str) -> Option<Self> {
        match column_type {
            "datetime" => Some(DateKind::Datetime),
            "date" => Some(DateKind::Date),
            "time" => Some(DateKind::Time),
            _ => None,
        }
    }
}

/// Converts rows to entities and back.
#[derive(Debug, Clone)]
pub struct EntityConverter {
    datetime_columns: IndexMap<String, DateKind>,
    datetime_format: String,
    // (json key, column); empty maps keys to columns one to one
    keys: Vec<(String, String)>,
}

impl Default for EntityConverter {
    fn default() -> Self {
        Self {
            datetime_columns: IndexMap::new(),
            datetime_format: DEFAULT_DATETIME_FORMAT.to_string(),
            keys: Vec::new(),
        }
    }
}

impl EntityConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converter for a table type: its column mapping, its typed datetime
    /// columns and its timestamp columns.
    pub fn for_table<T: Table>() -> Self {
        let mut converter = Self::new();
        converter.keys = T::json_keys()
            .iter()
            .zip(T::columns().iter())
            .map(|(key, column)| (key.to_string(), column.to_string()))
            .collect();
        for (column, column_type) in T::columns().iter().zip(T::column_types().iter()) {
            if let Some(kind) = DateKind::from_column_type(column_type) {
                converter.set_datetime(*column, kind);
            }
        }
        for (column, kind) in T::timestamps().columns() {
            converter.set_datetime(column, kind);
        }
        converter
    }

    /// Treat `column` as holding datetime values of `kind`.
    pub fn set_datetime(&mut self, column: impl Into<String>, kind: DateKind) {
        self.datetime_columns.insert(column.into(), kind);
    }

    pub fn with_datetime(mut self, column: impl Into<String>, kind: DateKind) -> Self {
        self.set_datetime(column, kind);
        self
    }

    /// Format used when rendering `Datetime` columns for an entity.
    pub fn with_datetime_format(mut self, format: impl Into<String>) -> Self {
        self.datetime_format = format.into();
        self
    }

    pub fn datetime_kind(&self, column: &str) -> Option<DateKind> {
        self.datetime_columns.get(column).copied()
    }

    /// Convert an entity into a row.
    pub fn to_row<E: Serialize + ?Sized>(&self, entity: &E) -> Result<Row, GatewayError> {
        let json = serde_json::to_value(entity)?;
        let serde_json::Value::Object(mut obj) = json else {
            return Err(GatewayError::Conversion(
                "Expected JSON object for entity".to_string(),
            ));
        };

        let mut row = Row::new();
        if self.keys.is_empty() {
            for (column, value) in obj {
                let value = self.column_value(&column, value)?;
                row.insert(column, value);
            }
        } else {
            for (json_key, column) in &self.keys {
                let value = obj.remove(json_key).unwrap_or(serde_json::Value::Null);
                row.insert(column.clone(), self.column_value(column, value)?);
            }
        }
        Ok(row)
    }

    /// Convert a row into an entity.
    ///
    /// Columns without a counterpart in the column mapping are ignored.
    pub fn to_entity<E: DeserializeOwned>(&self, row: &Row) -> Result<E, GatewayError> {
        let mut obj = serde_json::Map::new();
        if self.keys.is_empty() {
            for (column, value) in row {
                obj.insert(column.clone(), self.render(column, value));
            }
        } else {
            for (json_key, column) in &self.keys {
                if let Some(value) = row.get(column) {
                    obj.insert(json_key.clone(), self.render(column, value));
                }
            }
        }
        Ok(serde_json::from_value(serde_json::Value::Object(obj))?)
    }

    /// Read a named field from an entity. Missing fields read as `Null`.
    pub fn get<E: Serialize + ?Sized>(entity: &E, field: &str) -> Result<Value, GatewayError> {
        match serde_json::to_value(entity)? {
            serde_json::Value::Object(mut obj) => Ok(obj
                .remove(field)
                .map(Value::from_json)
                .unwrap_or(Value::Null)),
            _ => Err(GatewayError::Conversion(format!(
                "Cannot read field '{}' from a non-object entity",
                field
            ))),
        }
    }

    /// Write a named field on an entity.
    pub fn set<E: Serialize + DeserializeOwned>(
        entity: &mut E,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<(), GatewayError> {
        let serde_json::Value::Object(mut obj) = serde_json::to_value(&*entity)? else {
            return Err(GatewayError::Conversion(format!(
                "Cannot set field '{}' on a non-object entity",
                field
            )));
        };
        obj.insert(field.to_string(), value.into().to_json());
        *entity = serde_json::from_value(serde_json::Value::Object(obj))?;
        Ok(())
    }

    /// JSON key of the entity field stored in `column`.
    pub fn json_key<'a>(&'a self, column: &'a str) -> &'a str {
        self.keys
            .iter()
            .find(|(_, c)| c == column)
            .map(|(key, _)| key.as_str())
            .unwrap_or(column)
    }

    /// Overwrite the fields of `entity` that `row` holds a column for.
    ///
    /// Fields the entity does not serialize are left alone, so a row with
    /// extra columns never fails to merge.
    pub fn merge<E: Serialize + DeserializeOwned>(
        &self,
        entity: &mut E,
        row: &Row,
    ) -> Result<(), GatewayError> {
        let serde_json::Value::Object(mut obj) = serde_json::to_value(&*entity)? else {
            return Err(GatewayError::Conversion(
                "Expected JSON object for entity".to_string(),
            ));
        };
        for (column, value) in row {
            if let Some(slot) = obj.get_mut(self.json_key(column)) {
                *slot = self.render(column, value);
            }
        }
        *entity = serde_json::from_value(serde_json::Value::Object(obj))?;
        Ok(())
    }

    fn column_value(&self, column: &str, value: serde_json::Value) -> Result<Value, GatewayError> {
        match (self.datetime_kind(column), value) {
            (Some(kind), serde_json::Value::String(s)) => {
                parse_date_kind(kind, &s, &self.datetime_format)
            }
            (_, value) => Ok(Value::from_json(value)),
        }
    }

    fn render(&self, column: &str, value: &Value) -> serde_json::Value {
        match (self.datetime_kind(column), value) {
            (Some(DateKind::Datetime), Value::Datetime(dt)) => {
                serde_json::Value::String(dt.format(&self.datetime_format))
            }
            _ => value.to_json(),
        }
    }
}

fn parse_date_kind(kind: DateKind, s: &str, format: &str) -> Result<Value, GatewayError> {
    match kind {
        DateKind::Datetime => GatewayDatetime::parse(s, Some(format)).map(Value::Datetime),
        DateKind::Date => NaiveDate::parse_from_str(s, DATE_FORMAT)
            .or_else(|_| GatewayDatetime::parse(s, None).map(|dt| dt.date()))
            .map(Value::Date)
            .map_err(|_| GatewayError::Conversion(format!("Invalid date '{}'", s))),
        DateKind::Time => NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(s, TIME_FORMAT))
            .map(Value::Time)
            .map_err(|e| GatewayError::Conversion(format!("Invalid time '{}': {}", s, e))),
    }
}

/// Named field access on an entity.
///
/// Every `Serialize` type is a field source; relation linking reads key
/// values through it.
pub trait FieldSource {
    fn get_field(&self, name: &str) -> Result<Value, GatewayError>;
}

impl<T: Serialize + ?Sized> FieldSource for T {
    fn get_field(&self, name: &str) -> Result<Value, GatewayError> {
        EntityConverter::get(self, name)
    }
}

/// A dynamic entity whose fields can be assigned once.
///
/// Fields that already hold a non-null value cannot be overwritten, and no
/// field can be removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityAccess {
    fields: serde_json::Map<String, serde_json::Value>,
}

impl EntityAccess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an entity from a row, assigning every column.
    pub fn from_row(row: &Row) -> Result<Self, GatewayError> {
        let mut entity = Self::new();
        entity.assign(row.iter().map(|(k, v)| (k.clone(), v.clone())))?;
        Ok(entity)
    }

    pub fn assign<I, K>(&mut self, data: I) -> Result<(), GatewayError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for (name, value) in data {
            self.set(name, value)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Value {
        self.fields
            .get(name)
            .cloned()
            .map(Value::from_json)
            .unwrap_or(Value::Null)
    }

    /// Whether `name` holds a non-null value.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.get(name).is_some_and(|v| !v.is_null())
    }

    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), GatewayError> {
        let name = name.into();
        if self.contains(&name) {
            return Err(GatewayError::ImmutableField(name));
        }
        self.fields.insert(name, value.into().to_json());
        Ok(())
    }

    pub fn unset(&mut self, name: &str) -> Result<(), GatewayError> {
        Err(GatewayError::ImmutableField(name.to_string()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}
