//! Storage drivers
//!
//! A driver persists one value map per `(key, granularity, bucket)` triple.
//! How that triple is laid out in the store depends on the
//! [`JoinedIdentifier`] mode:
//! - `Full`: a single column `key::granularity::timestamp`
//! - `Partial`: `key::granularity` plus an integer `at` column
//! - `Separated`: `key`, `granularity` and `at` columns
//!
//! Value maps are stored nested; increments and sets merge leaf by leaf.

mod mongo;
mod mysql;
mod postgres;
mod redis;
mod sqlite;

pub use self::mongo::{MongoDriver, MongoOptions};
pub use self::mysql::MysqlDriver;
pub use self::postgres::PostgresDriver;
pub use self::redis::RedisDriver;
pub use self::sqlite::{SqliteDriver, MEMORY_PATH};

use super::error::{StatsError, StatsResult};
use super::packer::{deep_inc, deep_set};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use rusqlite::types::{ToSql, ToSqlOutput};
use serde_json::{Map, Value};

/// Table (or collection) name used when none is configured
pub const DEFAULT_TABLE: &str = "tally_stats";

/// How identifiers are laid out in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinedIdentifier {
    Full,
    Partial,
    Separated,
}

impl JoinedIdentifier {
    /// Key columns for this layout, in binding order
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            JoinedIdentifier::Full => &["key"],
            JoinedIdentifier::Partial => &["key", "at"],
            JoinedIdentifier::Separated => &["key", "granularity", "at"],
        }
    }
}

/// Kind of write applied to a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOp {
    /// Add numeric leaves
    Increment,
    /// Overwrite leaves
    Set,
}

/// One bucket of one metric key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    pub key: String,
    pub granularity: String,
    pub at: DateTime<FixedOffset>,
}

impl Identifier {
    pub fn new(key: impl Into<String>, granularity: impl Into<String>, at: DateTime<FixedOffset>) -> Self {
        Self {
            key: key.into(),
            granularity: granularity.into(),
            at,
        }
    }

    /// Lay the identifier out according to `mode`.
    pub fn join(&self, mode: JoinedIdentifier, separator: &str) -> StoredKey {
        let ts = self.at.timestamp();
        match mode {
            JoinedIdentifier::Full => StoredKey {
                key: format!("{}{sep}{}{sep}{}", self.key, self.granularity, ts, sep = separator),
                granularity: None,
                at: None,
            },
            JoinedIdentifier::Partial => StoredKey {
                key: format!("{}{}{}", self.key, separator, self.granularity),
                granularity: None,
                at: Some(ts),
            },
            JoinedIdentifier::Separated => StoredKey {
                key: self.key.clone(),
                granularity: Some(self.granularity.clone()),
                at: Some(ts),
            },
        }
    }
}

/// An identifier as it appears in the key columns of a store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoredKey {
    pub key: String,
    pub granularity: Option<String>,
    /// Bucket start as unix seconds
    pub at: Option<i64>,
}

impl StoredKey {
    /// Column values in the order of [`JoinedIdentifier::columns`]
    pub fn bind_values(&self) -> Vec<SqlValue> {
        let mut values = vec![SqlValue::Text(self.key.clone())];
        if let Some(granularity) = &self.granularity {
            values.push(SqlValue::Text(granularity.clone()));
        }
        if let Some(at) = self.at {
            values.push(SqlValue::Int(at));
        }
        values
    }
}

/// A key column value bound into a SQL statement
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SqlValue::Text(value) => value.to_sql(),
            SqlValue::Int(value) => value.to_sql(),
        }
    }
}

/// Bind key column values onto a sqlx query in column order.
macro_rules! bind_key_values {
    ($query:expr, $values:expr) => {{
        let mut query = $query;
        for value in $values {
            query = match value {
                $crate::stats::driver::SqlValue::Text(text) => query.bind(text),
                $crate::stats::driver::SqlValue::Int(int) => query.bind(int),
            };
        }
        query
    }};
}
pub(crate) use bind_key_values;

/// Resolve and check a table name; blank means [`DEFAULT_TABLE`].
pub fn table_name(input: &str) -> StatsResult<String> {
    let name = input.trim();
    if name.is_empty() {
        return Ok(DEFAULT_TABLE.to_string());
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if !valid {
        return Err(StatsError::Config(format!(
            "invalid table name: {} (letters, digits and underscores only)",
            name
        )));
    }
    Ok(name.to_string())
}

/// `col = ?` conditions joined with AND; `placeholder` renders the n-th (1-based) parameter.
pub(crate) fn where_clause(
    mode: JoinedIdentifier,
    quote: impl Fn(&str) -> String,
    placeholder: impl Fn(usize) -> String,
) -> String {
    mode.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{} = {}", quote(col), placeholder(i + 1)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Decode a stored JSON document into a value map.
pub(crate) fn decode_stored(raw: &str) -> StatsResult<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(StatsError::Serialization(format!(
            "stored data is not an object: {}",
            other
        ))),
    }
}

/// Apply a write to the stored document and encode the result.
pub(crate) fn merge_stored(
    existing: Option<&str>,
    op: WriteOp,
    values: &Map<String, Value>,
) -> StatsResult<String> {
    let mut current = match existing {
        Some(raw) => decode_stored(raw)?,
        None => Map::new(),
    };
    match op {
        WriteOp::Increment => deep_inc(&mut current, values),
        WriteOp::Set => deep_set(&mut current, values),
    }
    Ok(serde_json::to_string(&current)?)
}

/// Persistence contract every storage engine implements.
///
/// `get` returns one map per identifier, in order; buckets with nothing
/// stored come back empty.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Canonical driver name (`sqlite`, `postgres`, ...)
    fn name(&self) -> &'static str;

    /// Table, collection or key prefix the driver writes to
    fn target(&self) -> String;

    async fn inc(&self, identifiers: &[Identifier], values: &Map<String, Value>) -> StatsResult<()>;

    async fn set(&self, identifiers: &[Identifier], values: &Map<String, Value>) -> StatsResult<()>;

    async fn get(&self, identifiers: &[Identifier]) -> StatsResult<Vec<Map<String, Value>>>;

    /// Create tables, collections or indexes
    async fn setup(&self) -> StatsResult<()>;

    async fn write(
        &self,
        op: WriteOp,
        identifiers: &[Identifier],
        values: &Map<String, Value>,
    ) -> StatsResult<()> {
        match op {
            WriteOp::Increment => self.inc(identifiers, values).await,
            WriteOp::Set => self.set(identifiers, values).await,
        }
    }
}
