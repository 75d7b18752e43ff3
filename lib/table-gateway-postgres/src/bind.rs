//! Binding `Value`s to PostgreSQL parameters and decoding rows back.

use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{Arguments, Column, Row as _, TypeInfo};
use table_gateway::{GatewayDatetime, GatewayError, Row, Value};

fn bind_error(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::Database(e.to_string())
}

/// Bind a Value to PgArguments.
pub fn bind_value(args: &mut PgArguments, value: &Value) -> Result<(), GatewayError> {
    match value {
        Value::String(s) => args.add(s.clone()),
        Value::Int(n) => args.add(*n),
        Value::UInt(n) => {
            // PostgreSQL doesn't have unsigned, use i64
            let n = i64::try_from(*n).map_err(|_| {
                GatewayError::Conversion(format!("{} does not fit in BIGINT", n))
            })?;
            args.add(n)
        }
        Value::Float(n) => args.add(*n),
        Value::Bool(b) => args.add(*b),
        Value::Strings(v) => args.add(v.clone()),
        Value::Datetime(dt) => args.add(dt.0),
        Value::Date(d) => args.add(*d),
        Value::Time(t) => args.add(*t),
        Value::Json(v) => args.add(v.clone()),
        Value::Null => args.add(None::<String>),
    }
    .map_err(bind_error)
}

/// Arguments for a statement's parameters, in order.
pub fn arguments(params: &[Value]) -> Result<PgArguments, GatewayError> {
    let mut args = PgArguments::default();
    for value in params {
        bind_value(&mut args, value)?;
    }
    Ok(args)
}

fn get<'r, T>(row: &'r PgRow, idx: usize) -> Result<Option<T>, GatewayError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<Option<T>, _>(idx).map_err(bind_error)
}

/// Decode one column by its PostgreSQL type.
pub fn decode_column(row: &PgRow, idx: usize) -> Result<Value, GatewayError> {
    let column = row
        .columns()
        .get(idx)
        .ok_or_else(|| GatewayError::Database(format!("Column index out of range: {}", idx)))?;

    let value = match column.type_info().name() {
        "BOOL" => get::<bool>(row, idx)?.map(Value::Bool),
        "INT2" => get::<i16>(row, idx)?.map(|n| Value::Int(i64::from(n))),
        "INT4" => get::<i32>(row, idx)?.map(|n| Value::Int(i64::from(n))),
        "INT8" => get::<i64>(row, idx)?.map(Value::Int),
        "FLOAT4" => get::<f32>(row, idx)?.map(|n| Value::Float(f64::from(n))),
        "FLOAT8" => get::<f64>(row, idx)?.map(Value::Float),
        "TIMESTAMP" => get::<chrono::NaiveDateTime>(row, idx)?
            .map(|dt| Value::Datetime(GatewayDatetime::from(dt))),
        "TIMESTAMPTZ" => get::<chrono::DateTime<chrono::Utc>>(row, idx)?
            .map(|dt| Value::Datetime(GatewayDatetime::from(dt))),
        "DATE" => get::<chrono::NaiveDate>(row, idx)?.map(Value::Date),
        "TIME" => get::<chrono::NaiveTime>(row, idx)?.map(Value::Time),
        "JSON" | "JSONB" => get::<serde_json::Value>(row, idx)?.map(Value::Json),
        "TEXT[]" | "VARCHAR[]" => get::<Vec<String>>(row, idx)?.map(Value::Strings),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => get::<String>(row, idx)?.map(Value::String),
        other => {
            return Err(GatewayError::Conversion(format!(
                "Unsupported column type {} for column {}",
                other,
                column.name()
            )));
        }
    };

    Ok(value.unwrap_or(Value::Null))
}

/// Decode a whole row, keeping column order.
pub fn decode_row(row: &PgRow) -> Result<Row, GatewayError> {
    let mut out = Row::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), decode_column(row, idx)?);
    }
    Ok(out)
}
