//! Local query backend
//!
//! Builds one storage driver from connection options and serves reads and
//! writes through the time-series library. Storage failures pass through
//! the setup guidance before reaching the caller.

use super::guidance::suggest_setup;
use super::DriverKind;
use crate::error::{MetricsError, MetricsResult};
use crate::series::Series;
use crate::stats::config::{buffer_enabled, parse_joined, parse_time_zone, parse_weekday};
use crate::stats::driver::{
    MongoDriver, MongoOptions, MysqlDriver, PostgresDriver, RedisDriver, SqliteDriver,
    DEFAULT_TABLE,
};
use crate::stats::{BufferOptions, Driver, Stats, StatsConfig, StatsError};
use crate::timeframe::{validate_granularity, SourceInfo};
use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_MONGO_URI: &str = "mongodb://127.0.0.1:27017";

/// Connection and library parameters for a local driver
#[derive(Debug, Clone, PartialEq)]
pub struct DriverOptions {
    /// SQLite file path (also a database name fallback for servers)
    pub db_path: String,
    /// Full connection string; overrides host, port and credentials
    pub dsn: String,
    pub host: String,
    pub port: Option<u16>,
    pub user: String,
    pub password: String,
    pub database: String,
    pub table: String,
    pub collection: String,
    /// Key prefix for the key-value store
    pub prefix: String,
    pub joined: String,
    pub separator: String,
    pub timezone: String,
    pub week_start: String,
    pub granularities: Vec<String>,
    /// `auto`, `on` or `off`
    pub buffer_mode: String,
    /// Drivers allowed to buffer; empty allows all
    pub buffer_drivers: Vec<String>,
    pub buffer_duration: Duration,
    pub buffer_size: usize,
    pub buffer_aggregate: bool,
    pub buffer_async: bool,
    /// Connect timeout for the document store
    pub timeout: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        let buffer = BufferOptions::default();
        Self {
            db_path: String::new(),
            dsn: String::new(),
            host: String::new(),
            port: None,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            table: DEFAULT_TABLE.to_string(),
            collection: String::new(),
            prefix: String::new(),
            joined: "full".to_string(),
            separator: "::".to_string(),
            timezone: "GMT".to_string(),
            week_start: "monday".to_string(),
            granularities: Vec::new(),
            buffer_mode: "auto".to_string(),
            buffer_drivers: Vec::new(),
            buffer_duration: buffer.duration,
            buffer_size: buffer.size,
            buffer_aggregate: buffer.aggregate,
            buffer_async: buffer.async_flush,
            timeout: Duration::from_secs(10),
        }
    }
}

fn or_default<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    match value.trim() {
        "" => fallback,
        trimmed => trimmed,
    }
}

impl DriverOptions {
    /// Library configuration for `kind`.
    pub fn stats_config(&self, kind: DriverKind) -> MetricsResult<StatsConfig> {
        let enabled = buffer_enabled(&self.buffer_mode, &self.buffer_drivers, kind.as_str());
        Ok(StatsConfig {
            time_zone: parse_time_zone(&self.timezone)?,
            beginning_of_week: parse_weekday(or_default(&self.week_start, "monday"))?,
            separator: or_default(&self.separator, "::").to_string(),
            joined: parse_joined(&self.joined)?,
            granularities: self
                .granularities
                .iter()
                .map(|g| g.trim().to_lowercase())
                .filter(|g| !g.is_empty())
                .collect(),
            buffer: BufferOptions {
                enabled,
                duration: self.buffer_duration,
                size: self.buffer_size,
                aggregate: self.buffer_aggregate,
                async_flush: self.buffer_async,
            },
        })
    }

    /// Database name: explicit, else the db path for server drivers, else
    /// the default table name.
    pub fn resolve_database_name(&self, kind: DriverKind) -> String {
        if !self.database.trim().is_empty() {
            return self.database.trim().to_string();
        }
        if kind != DriverKind::Sqlite && !self.db_path.trim().is_empty() {
            return self.db_path.trim().to_string();
        }
        DEFAULT_TABLE.to_string()
    }

    pub fn table_name(&self) -> &str {
        or_default(&self.table, DEFAULT_TABLE)
    }

    pub fn postgres_dsn(&self) -> String {
        if !self.dsn.trim().is_empty() {
            return self.dsn.trim().to_string();
        }
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode=disable",
            urlencoding::encode(or_default(&self.user, "postgres")),
            urlencoding::encode(or_default(&self.password, "password")),
            or_default(&self.host, DEFAULT_HOST),
            self.port.unwrap_or(5432),
            urlencoding::encode(&self.resolve_database_name(DriverKind::Postgres)),
        )
    }

    pub fn mysql_url(&self) -> String {
        if !self.dsn.trim().is_empty() {
            return self.dsn.trim().to_string();
        }
        format!(
            "mysql://{}:{}@{}:{}/{}",
            urlencoding::encode(or_default(&self.user, "root")),
            urlencoding::encode(or_default(&self.password, "password")),
            or_default(&self.host, DEFAULT_HOST),
            self.port.unwrap_or(3306),
            urlencoding::encode(&self.resolve_database_name(DriverKind::Mysql)),
        )
    }

    /// A DSN without a scheme is taken as `host:port[/db]`.
    pub fn redis_url(&self) -> String {
        let dsn = self.dsn.trim();
        if !dsn.is_empty() {
            return if dsn.contains("://") {
                dsn.to_string()
            } else {
                format!("redis://{}", dsn)
            };
        }

        let credentials = match (self.user.trim(), self.password.trim()) {
            ("", "") => String::new(),
            (user, "") => format!("{}@", urlencoding::encode(user)),
            (user, password) => format!(
                "{}:{}@",
                urlencoding::encode(user),
                urlencoding::encode(password)
            ),
        };
        let db = match self.database.trim() {
            "" => "0",
            value => value,
        };
        format!(
            "redis://{}{}:{}/{}",
            credentials,
            or_default(&self.host, DEFAULT_HOST),
            self.port.unwrap_or(6379),
            db
        )
    }

    pub fn mongo_options(&self) -> MongoOptions {
        let uri = if !self.dsn.trim().is_empty() {
            self.dsn.trim().to_string()
        } else {
            let host = or_default(&self.host, DEFAULT_MONGO_URI);
            if host.contains("://") {
                host.to_string()
            } else {
                format!("mongodb://{}", host)
            }
        };
        let collection = or_default(&self.collection, self.table_name()).to_string();

        MongoOptions {
            uri,
            database: self.resolve_database_name(DriverKind::Mongo),
            collection,
            timeout: self.timeout,
        }
    }
}

/// How a local write combines with stored values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Add to existing values
    #[default]
    Track,
    /// Overwrite existing values
    Assert,
}

impl WriteMode {
    /// Parse a mode name; blank means track.
    pub fn parse(value: &str) -> MetricsResult<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "track" => Ok(Self::Track),
            "assert" => Ok(Self::Assert),
            _ => Err(MetricsError::invalid(format!(
                "invalid mode: {} (expected track or assert)",
                value
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Assert => "assert",
        }
    }
}

/// One local driver behind the time-series library
pub struct LocalBackend {
    kind: DriverKind,
    stats: Stats,
}

impl LocalBackend {
    /// Open the driver for `kind`.
    pub async fn connect(kind: DriverKind, options: &DriverOptions) -> MetricsResult<Self> {
        let config = options.stats_config(kind)?;
        let table = options.table_name();

        let driver: Box<dyn Driver> = match kind {
            DriverKind::Sqlite => {
                let path = options.db_path.trim();
                if path.is_empty() {
                    return Err(MetricsError::Config(
                        "--db is required for sqlite driver".to_string(),
                    ));
                }
                Box::new(SqliteDriver::open(path, table, config.joined, &config.separator)?)
            }
            DriverKind::Postgres => Box::new(PostgresDriver::connect(
                &options.postgres_dsn(),
                table,
                config.joined,
                &config.separator,
            )?),
            DriverKind::Mysql => Box::new(MysqlDriver::connect(
                &options.mysql_url(),
                table,
                config.joined,
                &config.separator,
            )?),
            DriverKind::Redis => Box::new(
                RedisDriver::connect(&options.redis_url(), &options.prefix, &config.separator)
                    .await?,
            ),
            DriverKind::Mongo => Box::new(
                MongoDriver::connect(&options.mongo_options(), config.joined, &config.separator)
                    .await?,
            ),
        };

        debug!(driver = kind.as_str(), target = %driver.target(), "local backend ready");
        Self::new(kind, config, driver)
    }

    /// Wrap an already-open driver.
    pub fn new(kind: DriverKind, config: StatsConfig, driver: Box<dyn Driver>) -> MetricsResult<Self> {
        let stats = Stats::new(config, driver)?;
        Ok(Self { kind, stats })
    }

    pub fn kind(&self) -> DriverKind {
        self.kind
    }

    pub fn driver_name(&self) -> &'static str {
        self.kind.as_str()
    }

    /// Table, collection or key prefix the driver writes to
    pub fn target(&self) -> String {
        self.stats.target()
    }

    pub fn is_buffered(&self) -> bool {
        self.stats.is_buffered()
    }

    pub fn effective_granularities(&self) -> Vec<String> {
        self.stats.effective_granularities()
    }

    /// Local sources declare no default; only the tracked granularities.
    pub fn source_info(&self) -> SourceInfo {
        SourceInfo {
            default_granularity: None,
            available_granularities: self.effective_granularities(),
        }
    }

    /// Explicit granularity, else `1h`, `1d` or the first tracked one.
    pub fn resolve_granularity(&self, explicit: Option<&str>) -> MetricsResult<String> {
        match explicit.map(str::trim).filter(|v| !v.is_empty()) {
            Some(value) => validate_granularity(value),
            None => Ok(self.source_info().pick_default()),
        }
    }

    pub async fn fetch_values(
        &self,
        key: &str,
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
        granularity: &str,
        skip_blanks: bool,
    ) -> MetricsResult<Series> {
        self.stats
            .values(key, from, to, granularity, skip_blanks)
            .await
            .map_err(|e| self.guide(e))
    }

    pub async fn write(
        &self,
        mode: WriteMode,
        key: &str,
        at: DateTime<FixedOffset>,
        values: &Map<String, Value>,
    ) -> MetricsResult<()> {
        let result = match mode {
            WriteMode::Track => self.stats.track(key, at, values).await,
            WriteMode::Assert => self.stats.assert(key, at, values).await,
        };
        result.map_err(|e| self.guide(e))
    }

    /// Create the storage objects the driver needs.
    pub async fn setup(&self) -> MetricsResult<()> {
        self.stats.setup().await.map_err(MetricsError::from)
    }

    /// Write out buffered operations.
    pub async fn flush(&self) -> MetricsResult<()> {
        self.stats.flush().await.map_err(|e| self.guide(e))
    }

    fn guide(&self, err: StatsError) -> MetricsError {
        suggest_setup(err.into(), self.driver_name(), &self.target())
    }
}
