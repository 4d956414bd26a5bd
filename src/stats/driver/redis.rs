//! Redis driver
//!
//! Each bucket is a hash at `<prefix><sep><key><sep><granularity><sep><ts>`
//! whose fields are packed value paths. Numbers go through `HINCRBYFLOAT`,
//! everything else through `HSET`. No schema, so setup is a no-op.

use super::{Driver, Identifier, JoinedIdentifier, WriteOp};
use crate::stats::error::StatsResult;
use crate::stats::packer::{pack, parse_scalar, unpack};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Key prefix used when none is configured
pub const DEFAULT_PREFIX: &str = "tally";

/// A single hash field update
#[derive(Debug, Clone, PartialEq)]
enum FieldWrite {
    IncrBy(f64),
    Set(String),
}

fn field_writes(op: WriteOp, values: &Map<String, Value>) -> Vec<(String, FieldWrite)> {
    pack(values)
        .into_iter()
        .map(|(field, value)| {
            let write = match (&value, op) {
                (Value::Number(n), WriteOp::Increment) => FieldWrite::IncrBy(n.as_f64().unwrap_or(0.0)),
                (Value::String(s), _) => FieldWrite::Set(s.clone()),
                (other, _) => FieldWrite::Set(other.to_string()),
            };
            (field, write)
        })
        .collect()
}

fn storage_key(prefix: &str, separator: &str, identifier: &Identifier) -> String {
    let joined = identifier.join(JoinedIdentifier::Full, separator).key;
    format!("{}{}{}", prefix, separator, joined)
}

pub struct RedisDriver {
    conn: MultiplexedConnection,
    prefix: String,
    separator: String,
}

impl RedisDriver {
    /// Connect to the server at `url` (`redis://host:port/db`).
    pub async fn connect(url: &str, prefix: &str, separator: &str) -> StatsResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let prefix = match prefix.trim() {
            "" => DEFAULT_PREFIX.to_string(),
            value => value.to_string(),
        };

        Ok(Self {
            conn,
            prefix,
            separator: separator.to_string(),
        })
    }

    async fn apply(
        &self,
        op: WriteOp,
        identifiers: &[Identifier],
        values: &Map<String, Value>,
    ) -> StatsResult<()> {
        let writes = field_writes(op, values);
        if writes.is_empty() || identifiers.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for identifier in identifiers {
            let key = storage_key(&self.prefix, &self.separator, identifier);
            for (field, write) in &writes {
                match write {
                    FieldWrite::IncrBy(amount) => {
                        pipe.cmd("HINCRBYFLOAT").arg(&key).arg(field).arg(*amount).ignore();
                    }
                    FieldWrite::Set(value) => {
                        pipe.cmd("HSET").arg(&key).arg(field).arg(value).ignore();
                    }
                }
            }
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;

        debug!(prefix = %self.prefix, count = identifiers.len(), ?op, "redis write");
        Ok(())
    }
}

#[async_trait]
impl Driver for RedisDriver {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn target(&self) -> String {
        self.prefix.clone()
    }

    async fn inc(&self, identifiers: &[Identifier], values: &Map<String, Value>) -> StatsResult<()> {
        self.apply(WriteOp::Increment, identifiers, values).await
    }

    async fn set(&self, identifiers: &[Identifier], values: &Map<String, Value>) -> StatsResult<()> {
        self.apply(WriteOp::Set, identifiers, values).await
    }

    async fn get(&self, identifiers: &[Identifier]) -> StatsResult<Vec<Map<String, Value>>> {
        if identifiers.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for identifier in identifiers {
            pipe.cmd("HGETALL")
                .arg(storage_key(&self.prefix, &self.separator, identifier));
        }

        let mut conn = self.conn.clone();
        let hashes: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        Ok(hashes
            .into_iter()
            .map(|hash| {
                let packed: BTreeMap<String, Value> = hash
                    .into_iter()
                    .map(|(field, raw)| (field, parse_scalar(&raw)))
                    .collect();
                unpack(&packed)
            })
            .collect())
    }

    async fn setup(&self) -> StatsResult<()> {
        Ok(())
    }
}
