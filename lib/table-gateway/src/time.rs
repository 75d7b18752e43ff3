use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{GatewayError, Row, Value};

/// Format used for datetime columns unless a table configures its own.
pub const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

const PARSE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
];

/// Database timestamp with microsecond precision.
///
/// Stored without a timezone, as `TIMESTAMP` columns are. Serializes in the
/// database format so entities round-trip through rows unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GatewayDatetime(pub NaiveDateTime);

impl GatewayDatetime {
    /// Current UTC time truncated to microseconds.
    pub fn now() -> Self {
        GatewayDatetime(datetime_micros())
    }

    pub fn date(&self) -> NaiveDate {
        self.0.date()
    }

    /// Time of day truncated to whole seconds.
    pub fn time(&self) -> NaiveTime {
        let time = self.0.time();
        time.with_nanosecond(0).unwrap_or(time)
    }

    pub fn format(&self, format: &str) -> String {
        self.0.format(format).to_string()
    }

    /// Parse a datetime string, trying `format` first and then the database
    /// and RFC 3339 layouts.
    pub fn parse(s: &str, format: Option<&str>) -> Result<Self, GatewayError> {
        if let Some(dt) = format.and_then(|f| NaiveDateTime::parse_from_str(s, f).ok()) {
            return Ok(GatewayDatetime(truncate_micros(dt)));
        }
        for format in PARSE_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
                return Ok(GatewayDatetime(truncate_micros(dt)));
            }
        }
        DateTime::parse_from_rfc3339(s)
            .map(|dt| GatewayDatetime(truncate_micros(dt.naive_utc())))
            .map_err(|e| GatewayError::Conversion(format!("Invalid datetime '{}': {}", s, e)))
    }
}

impl Serialize for GatewayDatetime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.format("%Y-%m-%d %H:%M:%S%.f").to_string())
    }
}

impl<'de> Deserialize<'de> for GatewayDatetime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        GatewayDatetime::parse(&s, None).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for GatewayDatetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DEFAULT_DATETIME_FORMAT))
    }
}

impl From<NaiveDateTime> for GatewayDatetime {
    fn from(dt: NaiveDateTime) -> Self {
        GatewayDatetime(truncate_micros(dt))
    }
}

impl From<DateTime<Utc>> for GatewayDatetime {
    fn from(dt: DateTime<Utc>) -> Self {
        GatewayDatetime(truncate_micros(dt.naive_utc()))
    }
}

impl From<GatewayDatetime> for NaiveDateTime {
    fn from(dt: GatewayDatetime) -> Self {
        dt.0
    }
}

fn truncate_micros(dt: NaiveDateTime) -> NaiveDateTime {
    let micros = dt.nanosecond() / 1_000 * 1_000;
    dt.with_nanosecond(micros).unwrap_or(dt)
}

/// Create a DateTime truncated to microsecond precision (6 decimal places)
fn datetime_micros() -> NaiveDateTime {
    let now = match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(time) => time,
        Err(_) => std::time::Duration::from_secs(0),
    };

    let timestamp_micros = (now.as_secs() as i64 * 1_000_000) + (now.subsec_micros() as i64);
    if let Some(time) = DateTime::from_timestamp_micros(timestamp_micros) {
        time.naive_utc()
    } else {
        DateTime::<Utc>::from_timestamp_nanos(0).naive_utc()
    }
}

/// Source of the current time for timestamp columns.
pub trait Clock: Send + Sync {
    fn now(&self) -> GatewayDatetime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> GatewayDatetime {
        GatewayDatetime::now()
    }
}

/// Clock that always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub GatewayDatetime);

impl Clock for FixedClock {
    fn now(&self) -> GatewayDatetime {
        self.0
    }
}

/// Columns maintained automatically on insert and update.
///
/// `updated_*` columns are written on every insert and update, `created_*`
/// columns only on insert. `None` disables a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timestamps {
    pub created_at: Option<String>,
    pub created_date: Option<String>,
    pub created_time: Option<String>,
    pub updated_at: Option<String>,
    pub updated_date: Option<String>,
    pub updated_time: Option<String>,
}

impl Default for Timestamps {
    fn default() -> Self {
        Self {
            created_at: Some("created_at".to_string()),
            created_date: None,
            created_time: None,
            updated_at: Some("updated_at".to_string()),
            updated_date: None,
            updated_time: None,
        }
    }
}

impl Timestamps {
    /// No automatic timestamp columns.
    pub fn none() -> Self {
        Self {
            created_at: None,
            created_date: None,
            created_time: None,
            updated_at: None,
            updated_date: None,
            updated_time: None,
        }
    }

    /// Write timestamp columns into `row`.
    pub fn stamp(&self, row: &mut Row, now: &GatewayDatetime, inserting: bool) {
        set_columns(
            row,
            now,
            &self.updated_at,
            &self.updated_date,
            &self.updated_time,
        );
        if !inserting {
            return;
        }
        set_columns(
            row,
            now,
            &self.created_at,
            &self.created_date,
            &self.created_time,
        );
    }

    /// Every configured column with the kind of value it receives.
    pub fn columns(&self) -> Vec<(&str, crate::DateKind)> {
        use crate::DateKind;
        [
            (&self.created_at, DateKind::Datetime),
            (&self.created_date, DateKind::Date),
            (&self.created_time, DateKind::Time),
            (&self.updated_at, DateKind::Datetime),
            (&self.updated_date, DateKind::Date),
            (&self.updated_time, DateKind::Time),
        ]
        .into_iter()
        .filter_map(|(column, kind)| column.as_deref().map(|c| (c, kind)))
        .collect()
    }
}

fn set_columns(
    row: &mut Row,
    now: &GatewayDatetime,
    at: &Option<String>,
    date: &Option<String>,
    time: &Option<String>,
) {
    if let Some(column) = at {
        row.insert(column.clone(), Value::Datetime(*now));
    }
    if let Some(column) = date {
        row.insert(column.clone(), Value::Date(now.date()));
    }
    if let Some(column) = time {
        row.insert(column.clone(), Value::Time(now.time()));
    }
}
