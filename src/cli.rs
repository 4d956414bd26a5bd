//! tally CLI
//!
//! Command-line interface over the orchestrator:
//! - Read, list and reshape metric series
//! - Push metric events
//! - Provision local storage
//! - Manage transponders on the remote API
//! - Serve the agent protocol on stdio

use crate::backend::{Backend, ConnectOptions, DriverOptions, RemoteConfig, WriteMode};
use crate::config::{generate_default_config, parse_duration, split_list, Config, SourceConfig};
use crate::error::{MetricsError, MetricsResult};
use crate::orchestrator::{
    load_json_payload, Orchestrator, QueryMode, QueryRequest, RangeArgs, SeriesRequest,
    WriteRequest,
};
use crate::output::{render, OutputFormat, Table};
use crate::protocol::AgentServer;
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Query and write time-series metrics locally or through the metrics API")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(long, env = "TALLY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Source name from the config file
    #[arg(long, env = "TALLY_SOURCE", global = true)]
    pub source: Option<String>,

    /// Output format for commands that produce rows
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json, global = true)]
    pub format: OutputFormat,

    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read and write metrics
    Metrics {
        #[command(subcommand)]
        command: MetricsCommand,
    },

    /// Manage transponders (remote API only)
    Transponders {
        #[command(subcommand)]
        command: TranspondersCommand,
    },

    /// Serve the agent protocol on stdin/stdout
    Mcp,

    /// Print a default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the version
    Version,
}

#[derive(Subcommand, Debug)]
pub enum MetricsCommand {
    /// Fetch a raw series
    Get {
        /// Metric key (default: the system key)
        #[arg(long)]
        key: Option<String>,
        /// Leave out buckets with no data
        #[arg(long)]
        skip_blanks: bool,
        #[command(flatten)]
        range: RangeFlags,
    },

    /// List metric keys, or the value paths of one key
    Keys {
        /// Metric key (local drivers default to system keys)
        #[arg(long)]
        key: Option<String>,
        #[command(flatten)]
        range: RangeFlags,
    },

    /// Aggregate a value path (sum, mean, min, max)
    Aggregate {
        #[command(flatten)]
        query: QueryFlags,
        /// Aggregator: sum|mean|min|max
        #[arg(long)]
        aggregator: Option<String>,
    },

    /// Reshape a value path into timeline entries
    Timeline {
        #[command(flatten)]
        query: QueryFlags,
    },

    /// Reshape a value path into categorical totals
    Category {
        #[command(flatten)]
        query: QueryFlags,
    },

    /// Write a metric event
    Push {
        #[arg(long)]
        key: String,
        /// RFC3339 timestamp (default: now)
        #[arg(long)]
        at: Option<String>,
        /// Values payload as JSON
        #[arg(long)]
        values: Option<String>,
        /// Path to a JSON file with the values payload
        #[arg(long)]
        values_file: Option<PathBuf>,
        /// track|assert (local drivers)
        #[arg(long, default_value = "track")]
        mode: String,
    },

    /// Create the table, indexes or collection of a local driver
    Setup,
}

#[derive(Subcommand, Debug)]
pub enum TranspondersCommand {
    List,
    Create {
        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
        /// Path to a JSON file with the payload
        #[arg(long)]
        payload_file: Option<PathBuf>,
    },
    Update {
        #[arg(long)]
        id: String,
        #[arg(long)]
        payload: Option<String>,
        #[arg(long)]
        payload_file: Option<PathBuf>,
    },
    Delete {
        #[arg(long)]
        id: String,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct RangeFlags {
    /// RFC3339 start timestamp
    #[arg(long)]
    pub from: Option<String>,
    /// RFC3339 end timestamp
    #[arg(long)]
    pub to: Option<String>,
    /// Granularity (e.g. 1h, 1d)
    #[arg(long)]
    pub granularity: Option<String>,
}

impl From<&RangeFlags> for RangeArgs {
    fn from(flags: &RangeFlags) -> Self {
        RangeArgs {
            from: non_blank(flags.from.as_deref()),
            to: non_blank(flags.to.as_deref()),
            granularity: non_blank(flags.granularity.as_deref()),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct QueryFlags {
    #[arg(long, default_value = "")]
    pub key: String,
    #[arg(long, default_value = "")]
    pub value_path: String,
    /// Number of slices
    #[arg(long, default_value_t = 1)]
    pub slices: i64,
    #[command(flatten)]
    pub range: RangeFlags,
}

impl QueryFlags {
    fn request(&self, mode: QueryMode, aggregator: Option<String>) -> QueryRequest {
        QueryRequest {
            mode,
            key: self.key.trim().to_string(),
            value_path: self.value_path.trim().to_string(),
            aggregator: aggregator.and_then(|a| non_blank(Some(&a))),
            slices: self.slices,
            range: RangeArgs::from(&self.range),
        }
    }
}

/// Connection flags; each also reads a `TALLY_*` variable.
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Driver: api|sqlite|postgres|mysql|redis|mongo
    #[arg(long, env = "TALLY_DRIVER", global = true)]
    pub driver: Option<String>,
    /// Metrics API base URL
    #[arg(long, env = "TALLY_URL", global = true)]
    pub url: Option<String>,
    /// API token
    #[arg(long, env = "TALLY_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,
    /// HTTP timeout (e.g. 30s)
    #[arg(long, env = "TALLY_TIMEOUT", global = true)]
    pub timeout: Option<String>,
    /// SQLite file path, or database name fallback
    #[arg(long, env = "TALLY_DB", global = true)]
    pub db: Option<String>,
    /// Connection string (postgres/mysql/redis/mongo)
    #[arg(long, env = "TALLY_DSN", global = true)]
    pub dsn: Option<String>,
    #[arg(long, env = "TALLY_HOST", global = true)]
    pub host: Option<String>,
    #[arg(long, env = "TALLY_PORT", global = true)]
    pub port: Option<u16>,
    #[arg(long, env = "TALLY_USER", global = true)]
    pub user: Option<String>,
    #[arg(long, env = "TALLY_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,
    #[arg(long, env = "TALLY_DATABASE", global = true)]
    pub database: Option<String>,
    /// Table name (sqlite/postgres/mysql)
    #[arg(long, env = "TALLY_TABLE", global = true)]
    pub table: Option<String>,
    /// Collection name (mongo)
    #[arg(long, env = "TALLY_COLLECTION", global = true)]
    pub collection: Option<String>,
    /// Key prefix (redis)
    #[arg(long, env = "TALLY_PREFIX", global = true)]
    pub prefix: Option<String>,
    /// Identifier mode: full|partial|separated
    #[arg(long, env = "TALLY_JOINED", global = true)]
    pub joined: Option<String>,
    #[arg(long, env = "TALLY_SEPARATOR", global = true)]
    pub separator: Option<String>,
    /// Fixed-offset time zone (GMT, UTC, +02:00)
    #[arg(long, env = "TALLY_TIMEZONE", global = true)]
    pub timezone: Option<String>,
    /// monday..sunday
    #[arg(long, env = "TALLY_WEEK_START", global = true)]
    pub week_start: Option<String>,
    /// Comma-separated granularities
    #[arg(long, env = "TALLY_GRANULARITIES", global = true)]
    pub granularities: Option<String>,
    /// auto|on|off
    #[arg(long, env = "TALLY_BUFFER_MODE", global = true)]
    pub buffer_mode: Option<String>,
    /// Comma-separated drivers allowed to buffer
    #[arg(long, env = "TALLY_BUFFER_DRIVERS", global = true)]
    pub buffer_drivers: Option<String>,
    /// Buffer flush interval (e.g. 1s)
    #[arg(long, env = "TALLY_BUFFER_DURATION", global = true)]
    pub buffer_duration: Option<String>,
    #[arg(long, env = "TALLY_BUFFER_SIZE", global = true)]
    pub buffer_size: Option<usize>,
    #[arg(long, env = "TALLY_BUFFER_AGGREGATE", global = true)]
    pub buffer_aggregate: Option<bool>,
    #[arg(long, env = "TALLY_BUFFER_ASYNC", global = true)]
    pub buffer_async: Option<bool>,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// First non-blank of flag and config value
fn pick(flag: &Option<String>, config: &Option<String>) -> Option<String> {
    non_blank(flag.as_deref()).or_else(|| non_blank(config.as_deref()))
}

fn duration_arg(label: &str, raw: &str) -> MetricsResult<std::time::Duration> {
    parse_duration(raw).map_err(|e| MetricsError::Config(format!("invalid {}: {}", label, e)))
}

impl ConnectionArgs {
    /// Merge flags over the selected config source.
    pub fn resolve(&self, source: &SourceConfig) -> MetricsResult<ConnectOptions> {
        let mut remote = RemoteConfig::default();
        if let Some(url) = pick(&self.url, &source.url) {
            remote.base_url = url;
        }
        remote.token = pick(&self.token, &source.token);
        let mut local = DriverOptions::default();
        if let Some(raw) = pick(&self.timeout, &source.timeout) {
            remote.timeout = duration_arg("timeout", &raw)?;
            local.timeout = remote.timeout;
        }

        let set = |target: &mut String, flag: &Option<String>, config: &Option<String>| {
            if let Some(value) = pick(flag, config) {
                *target = value;
            }
        };
        set(&mut local.db_path, &self.db, &source.db);
        set(&mut local.dsn, &self.dsn, &source.dsn);
        set(&mut local.host, &self.host, &source.host);
        set(&mut local.user, &self.user, &source.user);
        set(&mut local.password, &self.password, &source.password);
        set(&mut local.database, &self.database, &source.database_name());
        set(&mut local.table, &self.table, &source.table);
        set(&mut local.collection, &self.collection, &source.collection);
        set(&mut local.prefix, &self.prefix, &source.prefix);
        set(&mut local.joined, &self.joined, &source.joined);
        set(&mut local.separator, &self.separator, &source.separator);
        set(&mut local.timezone, &self.timezone, &source.timezone);
        set(&mut local.week_start, &self.week_start, &source.week_start);
        set(&mut local.buffer_mode, &self.buffer_mode, &source.buffer_mode);
        local.port = self.port.or(source.port);

        if let Some(list) = non_blank(self.granularities.as_deref()) {
            local.granularities = split_list(&list);
        } else if let Some(list) = &source.granularities {
            local.granularities = list.to_vec();
        }
        if let Some(list) = non_blank(self.buffer_drivers.as_deref()) {
            local.buffer_drivers = split_list(&list);
        } else if let Some(list) = &source.buffer_drivers {
            local.buffer_drivers = list.to_vec();
        }
        if let Some(raw) = pick(&self.buffer_duration, &source.buffer_duration) {
            local.buffer_duration = duration_arg("buffer duration", &raw)?;
        }
        if let Some(size) = self.buffer_size.or(source.buffer_size).filter(|s| *s > 0) {
            local.buffer_size = size;
        }
        if let Some(aggregate) = self.buffer_aggregate.or(source.buffer_aggregate) {
            local.buffer_aggregate = aggregate;
        }
        if let Some(async_flush) = self.buffer_async.or(source.buffer_async) {
            local.buffer_async = async_flush;
        }
        Ok(ConnectOptions {
            driver: pick(&self.driver, &source.driver).unwrap_or_default(),
            remote,
            local,
        })
    }
}

/// Run a parsed command line against the loaded configuration.
pub async fn run(cli: Cli, config: &Config) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Version => {
            println!("tally {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Commands::Config { output } => return write_default_config(output.as_deref()),
        _ => {}
    }

    let (source_name, source) = config.select_source(cli.source.as_deref())?;
    let options = cli
        .connection
        .resolve(&source)
        .with_context(|| format!("source {}", source_name))?;
    let orchestrator = Orchestrator::new(Backend::connect(&options).await?);

    if let Commands::Mcp = cli.command {
        AgentServer::new(orchestrator).serve_stdio().await?;
        return Ok(());
    }

    let outcome = execute(&cli, &orchestrator).await;
    if let Err(e) = orchestrator.flush().await {
        tracing::error!(error = %e, "Failed to flush buffered metrics");
        outcome?;
        return Err(e.into());
    }
    outcome
}

async fn execute(cli: &Cli, orchestrator: &Orchestrator) -> anyhow::Result<()> {
    let format = cli.format;
    match &cli.command {
        Commands::Metrics { command } => match command {
            MetricsCommand::Get {
                key,
                skip_blanks,
                range,
            } => {
                let request = SeriesRequest {
                    key: non_blank(key.as_deref()),
                    range: range.into(),
                    skip_blanks: *skip_blanks,
                };
                emit(format, &orchestrator.fetch_series(&request).await?, None)
            }
            MetricsCommand::Keys { key, range } => {
                let request = SeriesRequest {
                    key: non_blank(key.as_deref()),
                    range: range.into(),
                    skip_blanks: false,
                };
                let listing = orchestrator.list_metrics(&request).await?;
                let table = Table::from_key_counts(&listing.paths);
                emit(format, &listing, Some(table))
            }
            MetricsCommand::Aggregate { query, aggregator } => {
                let request = query.request(QueryMode::Aggregate, aggregator.clone());
                let result = orchestrator.run_query(&request).await?;
                let table = result.table().map(|t| Table::from_series(&t));
                emit(format, &result, table)
            }
            MetricsCommand::Timeline { query } => {
                let result = orchestrator
                    .run_query(&query.request(QueryMode::Timeline, None))
                    .await?;
                let table = result.table().map(|t| Table::from_series(&t));
                emit(format, &result, table)
            }
            MetricsCommand::Category { query } => {
                let result = orchestrator
                    .run_query(&query.request(QueryMode::Category, None))
                    .await?;
                let table = result.table().map(|t| Table::from_series(&t));
                emit(format, &result, table)
            }
            MetricsCommand::Push {
                key,
                at,
                values,
                values_file,
                mode,
            } => {
                if key.trim().is_empty() {
                    return Err(MetricsError::invalid("--key is required").into());
                }
                let values = load_json_payload(values.as_deref(), values_file.as_deref())?
                    .ok_or_else(|| MetricsError::invalid("--values or --values-file is required"))?;
                let request = WriteRequest {
                    key: key.trim().to_string(),
                    values: Some(values),
                    at: non_blank(at.as_deref()),
                    mode: WriteMode::parse(mode)?,
                };
                emit(format, &orchestrator.write_metric(&request).await?, None)
            }
            MetricsCommand::Setup => {
                println!("{}", orchestrator.setup().await?);
                Ok(())
            }
        },
        Commands::Transponders { command } => {
            let response = match command {
                TranspondersCommand::List => orchestrator.list_transponders().await?,
                TranspondersCommand::Create {
                    payload,
                    payload_file,
                } => {
                    let payload = load_json_payload(payload.as_deref(), payload_file.as_deref())?;
                    orchestrator.create_transponder(payload).await?
                }
                TranspondersCommand::Update {
                    id,
                    payload,
                    payload_file,
                } => {
                    let payload = load_json_payload(payload.as_deref(), payload_file.as_deref())?;
                    orchestrator.update_transponder(id, payload).await?
                }
                TranspondersCommand::Delete { id } => orchestrator.delete_transponder(id).await?,
            };
            emit(format, &response, None)
        }
        Commands::Mcp | Commands::Config { .. } | Commands::Version => Ok(()),
    }
}

/// Render to stdout.
fn emit<T: Serialize + ?Sized>(
    format: OutputFormat,
    payload: &T,
    table: Option<Table>,
) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    render(&mut out, format, payload, table)?;
    out.flush()?;
    Ok(())
}

fn write_default_config(output: Option<&Path>) -> anyhow::Result<()> {
    let config = generate_default_config();
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &config)
                .with_context(|| format!("write config {:?}", path))?;
            println!("Config written to {:?}", path);
        }
        None => print!("{}", config),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StringList;
    use std::time::Duration;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from([
            "tally",
            "metrics",
            "aggregate",
            "--key",
            "signup",
            "--value-path",
            "count",
            "--aggregator",
            "sum",
            "--slices",
            "3",
            "--driver",
            "sqlite",
            "--format",
            "csv",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Csv);
        assert_eq!(cli.connection.driver.as_deref(), Some("sqlite"));
        match cli.command {
            Commands::Metrics {
                command: MetricsCommand::Aggregate { query, aggregator },
            } => {
                let request = query.request(QueryMode::Aggregate, aggregator);
                assert_eq!(request.key, "signup");
                assert_eq!(request.aggregator.as_deref(), Some("sum"));
                assert_eq!(request.slice_count(), 3);
            }
            other => panic!("unexpected {:?}", other),
        }

        let cli = Cli::try_parse_from(["tally", "transponders", "delete", "--id", "t1"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Transponders {
                command: TranspondersCommand::Delete { .. }
            }
        ));
        assert!(Cli::try_parse_from(["tally", "metrics", "push"]).is_err());

        let cli = Cli::try_parse_from(["tally", "metrics", "get", "--key", "k", "--skip-blanks"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Metrics {
                command: MetricsCommand::Get {
                    skip_blanks: true,
                    ..
                }
            }
        ));
    }

    #[test]
    fn test_flags_override_source() {
        let source = SourceConfig {
            driver: Some("postgres".to_string()),
            url: Some("https://metrics.example.com".to_string()),
            token: Some("from-config".to_string()),
            timeout: Some("5s".to_string()),
            db: Some("stats".to_string()),
            table: Some("events".to_string()),
            granularities: Some(StringList::Items(vec!["1h".to_string(), " ".to_string()])),
            buffer_size: Some(10),
            buffer_aggregate: Some(false),
            ..SourceConfig::default()
        };
        let flags = ConnectionArgs {
            token: Some("from-flag".to_string()),
            table: Some("  ".to_string()),
            buffer_drivers: Some("sqlite, mysql".to_string()),
            ..ConnectionArgs::default()
        };

        let options = flags.resolve(&source).unwrap();
        assert_eq!(options.driver, "postgres");
        assert_eq!(options.remote.base_url, "https://metrics.example.com");
        assert_eq!(options.remote.token.as_deref(), Some("from-flag"));
        assert_eq!(options.remote.timeout, Duration::from_secs(5));
        assert_eq!(options.local.database, "stats");
        assert_eq!(options.local.table, "events");
        assert_eq!(options.local.granularities, vec!["1h"]);
        assert_eq!(options.local.buffer_drivers, vec!["sqlite", "mysql"]);
        assert_eq!(options.local.buffer_size, 10);
        assert!(!options.local.buffer_aggregate);
    }

    #[test]
    fn test_defaults_without_source() {
        let options = ConnectionArgs::default()
            .resolve(&SourceConfig::default())
            .unwrap();
        assert_eq!(options.driver, "");
        assert_eq!(options.remote.token, None);
        assert_eq!(options.local, DriverOptions::default());

        let err = ConnectionArgs {
            timeout: Some("later".to_string()),
            ..ConnectionArgs::default()
        }
        .resolve(&SourceConfig::default())
        .unwrap_err();
        assert!(err.to_string().starts_with("invalid timeout"));
    }

    #[tokio::test]
    async fn test_push_and_keys_against_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("stats.db");
        let db = db.to_str().unwrap();
        let config = Config::default();

        let setup = Cli::try_parse_from(["tally", "metrics", "setup", "--driver", "sqlite", "--db", db])
            .unwrap();
        run(setup, &config).await.unwrap();

        let push = Cli::try_parse_from([
            "tally",
            "metrics",
            "push",
            "--driver",
            "sqlite",
            "--db",
            db,
            "--key",
            "signup",
            "--values",
            r#"{"count": 1}"#,
            "--at",
            "2024-01-02T15:00:00Z",
        ])
        .unwrap();
        run(push, &config).await.unwrap();

        let options = ConnectionArgs {
            driver: Some("sqlite".to_string()),
            db: Some(db.to_string()),
            ..ConnectionArgs::default()
        }
        .resolve(&SourceConfig::default())
        .unwrap();
        let orchestrator = Orchestrator::new(Backend::connect(&options).await.unwrap());
        let listing = orchestrator
            .list_metrics(&SeriesRequest {
                key: None,
                range: RangeArgs {
                    from: Some("2024-01-02T00:00:00Z".to_string()),
                    to: Some("2024-01-03T00:00:00Z".to_string()),
                    granularity: Some("1d".to_string()),
                },
                skip_blanks: false,
            })
            .await
            .unwrap();
        assert_eq!(listing.total_paths, 1);
        assert_eq!(listing.paths[0].metric_key, "signup");
        assert_eq!(listing.paths[0].observations, 1);
    }

    #[tokio::test]
    async fn test_push_requires_values() {
        let cli = Cli::try_parse_from([
            "tally", "metrics", "push", "--driver", "sqlite", "--db", ":memory:", "--key", "k",
        ])
        .unwrap();
        let err = run(cli, &Config::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "--values or --values-file is required");
    }
}
