//! Configuration System
//!
//! Loads named connection sources from a TOML file. Command-line flags and
//! `TALLY_*` environment variables take precedence over the selected source;
//! built-in defaults fill whatever is left.

use crate::backend::REMOTE_DRIVER;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Source used when none is named on the command line
    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

/// One named connection
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SourceConfig {
    pub driver: Option<String>,
    pub url: Option<String>,
    pub token: Option<String>,
    /// HTTP timeout, e.g. `30s`
    pub timeout: Option<String>,
    pub db: Option<String>,
    pub dsn: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub table: Option<String>,
    pub collection: Option<String>,
    pub prefix: Option<String>,
    pub joined: Option<String>,
    pub separator: Option<String>,
    pub timezone: Option<String>,
    pub week_start: Option<String>,
    pub granularities: Option<StringList>,
    pub buffer_mode: Option<String>,
    pub buffer_drivers: Option<StringList>,
    pub buffer_size: Option<usize>,
    pub buffer_duration: Option<String>,
    pub buffer_aggregate: Option<bool>,
    pub buffer_async: Option<bool>,
}

/// A list given either as an array or a comma-separated string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StringList {
    Joined(String),
    Items(Vec<String>),
}

impl StringList {
    /// Trimmed, non-empty entries
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StringList::Joined(raw) => split_list(raw),
            StringList::Items(items) => items
                .iter()
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect(),
        }
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        for (name, source) in &config.sources {
            source.timeout().map_err(|error| ConfigError::InvalidValue {
                source_name: name.clone(),
                error,
            })?;
        }

        Ok(config)
    }

    /// Load the explicit file, or the default location when it exists.
    ///
    /// A missing default file yields an empty configuration; a missing
    /// explicit one is an error.
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            let path = expand_path(path);
            return Ok((Self::load(&path)?, Some(path)));
        }

        match default_config_path() {
            Some(path) if path.exists() => {
                tracing::debug!("Loading config from {:?}", path);
                Ok((Self::load(&path)?, Some(path)))
            }
            path => Ok((Self::default(), path)),
        }
    }

    /// Name and settings of the active source.
    ///
    /// `requested` (flag or environment) wins over the file's `source`; the
    /// remote API is the fallback. An empty `sources` table means every
    /// setting comes from flags and defaults.
    pub fn select_source(&self, requested: Option<&str>) -> Result<(String, SourceConfig), ConfigError> {
        let name = requested
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .or_else(|| self.source.as_deref().map(str::trim).filter(|n| !n.is_empty()))
            .unwrap_or(REMOTE_DRIVER)
            .to_string();

        if self.sources.is_empty() {
            return Ok((name, SourceConfig::default()));
        }

        match self.sources.get(&name) {
            Some(source) => Ok((name, source.clone())),
            None => Err(ConfigError::UnknownSource(name)),
        }
    }
}

impl SourceConfig {
    /// Parsed `timeout`, if set
    pub fn timeout(&self) -> Result<Option<Duration>, String> {
        match self.timeout.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(raw) => parse_duration(raw)
                .map(Some)
                .map_err(|e| format!("invalid timeout: {}", e)),
            None => Ok(None),
        }
    }

    /// `database`, falling back to `db`
    pub fn database_name(&self) -> Option<String> {
        self.database
            .clone()
            .filter(|d| !d.trim().is_empty())
            .or_else(|| self.db.clone())
    }
}

/// Default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("tally").join("config.toml"))
}

/// Expand a leading `~` to the home directory.
pub fn expand_path(path: &Path) -> PathBuf {
    let Some(text) = path.to_str() else {
        return path.to_path_buf();
    };
    match (text, dirs::home_dir()) {
        ("~", Some(home)) => home,
        (rest, Some(home)) if rest.starts_with("~/") => home.join(&rest[2..]),
        _ => path.to_path_buf(),
    }
}

/// Parse durations such as `30s`, `500ms`, `1m30s` or `2h`.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim().to_lowercase();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s.as_str();
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {:?}", input))?;
        if digits == 0 {
            return Err(format!("invalid duration {:?}", input));
        }
        let amount: f64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid duration {:?}", input))?;

        let unit_len = rest[digits..]
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len() - digits);
        let unit = &rest[digits..digits + unit_len];
        let seconds = match unit {
            "ms" => amount / 1000.0,
            "s" => amount,
            "m" => amount * 60.0,
            "h" => amount * 3600.0,
            _ => return Err(format!("unknown unit {:?} in duration {:?}", unit, input)),
        };
        total += Duration::from_secs_f64(seconds);
        rest = &rest[digits + unit_len..];
    }
    Ok(total)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("unknown source {0:?} in config")]
    UnknownSource(String),

    #[error("source {source_name}: {error}")]
    InvalidValue { source_name: String, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# tally configuration
#
# Flags override environment variables, which override the selected source.
# Environment variables: TALLY_SOURCE, TALLY_URL, TALLY_TOKEN, TALLY_DRIVER,
# TALLY_DB, TALLY_DSN, TALLY_HOST, TALLY_PORT, TALLY_TABLE, ...

# Source used when --source / TALLY_SOURCE is not given
source = "api"

[logging]
# RUST_LOG overrides this level
level = "warn"
# pretty or json
format = "pretty"

[sources.api]
driver = "api"
url = "http://localhost:8080"
token = ""
timeout = "30s"

[sources.local]
driver = "sqlite"
db = "./stats.db"
table = "tally_stats"
joined = "full"
separator = "::"
timezone = "GMT"
week_start = "monday"
granularities = ["1m", "1h", "1d", "1w", "1mo"]
buffer_mode = "auto"
buffer_size = 256
buffer_duration = "1s"

# [sources.warehouse]
# driver = "postgres"
# host = "127.0.0.1"
# port = 5432
# user = "postgres"
# password = "password"
# database = "tally_stats"
"#
    .to_string()
}
