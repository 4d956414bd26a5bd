//! Time-series access library
//!
//! Records metric events into granularity buckets and reads them back as
//! series:
//! - Write path: event → bucket per granularity → (buffer) → driver
//! - Read path: range → bucket timeline → driver → series
//!
//! Every write also bumps the bookkeeping key [`SYSTEM_KEY`], which is how
//! the set of known metric keys is discovered later.

pub mod buffer;
pub mod config;
pub mod driver;
pub mod error;
pub mod nocturnal;
pub mod packer;

pub use buffer::{Operation, WriteBuffer};
pub use config::{BufferOptions, StatsConfig};
pub use driver::{Driver, Identifier, JoinedIdentifier, WriteOp};
pub use error::{StatsError, StatsResult};
pub use nocturnal::Granularity;

use crate::series::Series;
use chrono::{DateTime, FixedOffset};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

/// Bookkeeping key counting writes per metric key
pub const SYSTEM_KEY: &str = "__system__key__";

pub struct Stats {
    config: StatsConfig,
    driver: Box<dyn Driver>,
    granularities: Vec<(String, Granularity)>,
    buffer: Option<WriteBuffer>,
}

impl Stats {
    /// Fails when a configured granularity cannot be bucketed.
    pub fn new(config: StatsConfig, driver: Box<dyn Driver>) -> StatsResult<Self> {
        let granularities = config
            .effective_granularities()
            .into_iter()
            .map(|name| Granularity::parse(&name).map(|parsed| (name, parsed)))
            .collect::<StatsResult<Vec<_>>>()?;

        let buffer = if config.buffer.enabled {
            Some(WriteBuffer::new(config.buffer.clone()))
        } else {
            None
        };

        Ok(Self {
            config,
            driver,
            granularities,
            buffer,
        })
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    pub fn target(&self) -> String {
        self.driver.target()
    }

    pub fn is_buffered(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn effective_granularities(&self) -> Vec<String> {
        self.granularities.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Add `values` into every bucket containing `at`.
    pub async fn track(
        &self,
        key: &str,
        at: DateTime<FixedOffset>,
        values: &Map<String, Value>,
    ) -> StatsResult<()> {
        self.record(WriteOp::Increment, key, at, values).await
    }

    /// Overwrite the leaves of `values` in every bucket containing `at`.
    pub async fn assert(
        &self,
        key: &str,
        at: DateTime<FixedOffset>,
        values: &Map<String, Value>,
    ) -> StatsResult<()> {
        self.record(WriteOp::Set, key, at, values).await
    }

    /// Read the buckets of `key` between `from` and `to`.
    ///
    /// Pending buffered writes are flushed first. With `skip_blanks`, empty
    /// buckets are dropped from the series.
    pub async fn values(
        &self,
        key: &str,
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
        granularity: &str,
        skip_blanks: bool,
    ) -> StatsResult<Series> {
        self.flush().await?;

        let name = granularity.trim().to_lowercase();
        let parsed = Granularity::parse(&name)?;
        let points = nocturnal::timeline(
            from,
            to,
            &parsed,
            self.config.time_zone,
            self.config.beginning_of_week,
        )?;

        let identifiers: Vec<Identifier> = points
            .iter()
            .map(|at| Identifier::new(key, name.clone(), *at))
            .collect();
        let maps = self.driver.get(&identifiers).await?;
        debug!(key, granularity = %name, buckets = identifiers.len(), "stats values");

        let (at, values): (Vec<_>, Vec<_>) = points
            .into_iter()
            .zip(maps)
            .filter(|(_, values)| !skip_blanks || !values.is_empty())
            .unzip();

        Ok(Series::new(at, values))
    }

    /// Write out everything queued in the buffer.
    ///
    /// Operations not written because of a driver error stay queued.
    pub async fn flush(&self) -> StatsResult<()> {
        let buffer = match &self.buffer {
            Some(buffer) => buffer,
            None => return Ok(()),
        };

        let mut operations = buffer.drain().await;
        if operations.is_empty() {
            return Ok(());
        }
        debug!(count = operations.len(), driver = self.driver.name(), "flushing write buffer");

        for index in 0..operations.len() {
            let operation = &operations[index];
            let written = self
                .driver
                .write(operation.op, &operation.identifiers, &operation.values)
                .await;
            if let Err(e) = written {
                let pending = operations.split_off(index);
                warn!(error = %e, pending = pending.len(), "buffer flush failed; writes kept queued");
                buffer.requeue(pending).await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Create the driver's tables, collections or indexes.
    pub async fn setup(&self) -> StatsResult<()> {
        self.driver.setup().await
    }

    fn identifiers(&self, key: &str, at: DateTime<FixedOffset>) -> StatsResult<Vec<Identifier>> {
        self.granularities
            .iter()
            .map(|(name, granularity)| {
                let bucket =
                    granularity.floor(at, self.config.time_zone, self.config.beginning_of_week)?;
                Ok(Identifier::new(key, name.clone(), bucket))
            })
            .collect()
    }

    async fn record(
        &self,
        op: WriteOp,
        key: &str,
        at: DateTime<FixedOffset>,
        values: &Map<String, Value>,
    ) -> StatsResult<()> {
        let mut system_values = Map::new();
        system_values.insert("count".to_string(), json!(1));
        let mut keys = Map::new();
        keys.insert(key.to_string(), json!(1));
        system_values.insert("keys".to_string(), Value::Object(keys));

        let operations = [
            Operation {
                op,
                identifiers: self.identifiers(key, at)?,
                values: values.clone(),
            },
            Operation {
                op: WriteOp::Increment,
                identifiers: self.identifiers(SYSTEM_KEY, at)?,
                values: system_values,
            },
        ];

        match &self.buffer {
            Some(buffer) => {
                let mut due = false;
                for operation in operations {
                    due |= buffer.push(operation).await;
                }
                if due {
                    self.flush().await?;
                }
            }
            None => {
                for operation in &operations {
                    self.driver
                        .write(operation.op, &operation.identifiers, &operation.values)
                        .await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::driver::{SqliteDriver, MEMORY_PATH};
    use std::time::Duration;

    fn at(value: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(value).unwrap()
    }

    fn values(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    async fn stats(config: StatsConfig) -> Stats {
        let driver = SqliteDriver::open(MEMORY_PATH, "", config.joined, &config.separator).unwrap();
        driver.setup().await.unwrap();
        Stats::new(config, Box::new(driver)).unwrap()
    }

    #[tokio::test]
    async fn test_track_accumulates_per_bucket() {
        let stats = stats(StatsConfig::default()).await;
        stats
            .track("signup", at("2024-01-02T15:04:05Z"), &values(json!({"count": 1})))
            .await
            .unwrap();
        stats
            .track("signup", at("2024-01-02T15:30:00Z"), &values(json!({"count": 2})))
            .await
            .unwrap();

        let series = stats
            .values("signup", at("2024-01-02T14:00:00Z"), at("2024-01-02T16:00:00Z"), "1h", false)
            .await
            .unwrap();
        assert_eq!(series.len(), 3);
        assert!(series.values[0].is_empty());
        assert_eq!(series.values[1].get("count"), Some(&json!(3)));

        let daily = stats
            .values("signup", at("2024-01-02T00:00:00Z"), at("2024-01-02T23:59:59Z"), "1D", true)
            .await
            .unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily.values[0].get("count"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_system_key_counts_writes() {
        let stats = stats(StatsConfig::default()).await;
        let moment = at("2024-01-02T15:04:05Z");
        stats.track("a", moment, &values(json!({"count": 1}))).await.unwrap();
        stats.track("b", moment, &values(json!({"count": 1}))).await.unwrap();
        stats.assert("a", moment, &values(json!({"level": 4}))).await.unwrap();

        let series = stats
            .values(SYSTEM_KEY, moment, moment, "1h", true)
            .await
            .unwrap();
        assert_eq!(
            Value::Object(series.values[0].clone()),
            json!({"count": 3, "keys": {"a": 2, "b": 1}})
        );
    }

    #[tokio::test]
    async fn test_assert_overwrites() {
        let stats = stats(StatsConfig::default()).await;
        let moment = at("2024-01-02T15:04:05Z");
        stats.assert("gauge", moment, &values(json!({"level": 4}))).await.unwrap();
        stats.assert("gauge", moment, &values(json!({"level": 2}))).await.unwrap();

        let series = stats.values("gauge", moment, moment, "1m", true).await.unwrap();
        assert_eq!(series.values[0].get("level"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_buffered_writes_are_visible_to_reads() {
        let mut config = StatsConfig::default();
        config.joined = JoinedIdentifier::Separated;
        config.granularities = vec!["1h".to_string()];
        config.buffer = BufferOptions {
            enabled: true,
            duration: Duration::from_secs(3600),
            size: 100,
            aggregate: true,
            async_flush: true,
        };
        let stats = stats(config).await;
        assert!(stats.is_buffered());

        let moment = at("2024-01-02T15:04:05Z");
        stats.track("k", moment, &values(json!({"count": 1}))).await.unwrap();
        stats.track("k", moment, &values(json!({"count": 1}))).await.unwrap();

        let series = stats.values("k", moment, moment, "1h", true).await.unwrap();
        assert_eq!(series.values[0].get("count"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_writes() {
        let mut config = StatsConfig::default();
        config.granularities = vec!["1h".to_string()];
        config.buffer = BufferOptions {
            enabled: true,
            duration: Duration::from_secs(3600),
            size: 100,
            aggregate: false,
            async_flush: false,
        };
        let driver = SqliteDriver::open(MEMORY_PATH, "", config.joined, &config.separator).unwrap();
        let stats = Stats::new(config, Box::new(driver)).unwrap();

        let moment = at("2024-01-02T15:04:05Z");
        stats.track("k", moment, &values(json!({"count": 1}))).await.unwrap();
        // no table yet
        assert!(stats.flush().await.is_err());

        stats.setup().await.unwrap();
        stats.flush().await.unwrap();
        let series = stats.values("k", moment, moment, "1h", true).await.unwrap();
        assert_eq!(series.values[0].get("count"), Some(&json!(1)));

        let system = stats.values(SYSTEM_KEY, moment, moment, "1h", true).await.unwrap();
        assert_eq!(system.values[0].get("count"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_invalid_granularity() {
        let config = StatsConfig {
            granularities: vec!["1h".to_string(), "hourly".to_string()],
            ..StatsConfig::default()
        };
        let driver = SqliteDriver::open(MEMORY_PATH, "", config.joined, "::").unwrap();
        let result = Stats::new(config, Box::new(driver));
        assert!(matches!(result, Err(StatsError::InvalidGranularity(_))));

        let stats = stats(StatsConfig::default()).await;
        let moment = at("2024-01-02T15:04:05Z");
        let err = stats.values("k", moment, moment, "1x", false).await.unwrap_err();
        assert!(matches!(err, StatsError::InvalidGranularity(_)));
    }
}
