//! Backend selection and dispatch
//!
//! A driver name picks one of two backends:
//! - `api` (or nothing): the remote metrics API
//! - `sqlite`, `postgres`, `mysql`, `redis`, `mongo`: a local store
//!
//! Both sit behind [`Backend`], which the orchestrator matches on.

pub mod guidance;
pub mod local;
pub mod remote;

pub use guidance::suggest_setup;
pub use local::{DriverOptions, LocalBackend, WriteMode};
pub use remote::{QueryBody, RemoteClient, RemoteConfig};

use crate::error::{MetricsError, MetricsResult};
use crate::timeframe::SourceInfo;
use tracing::info;

/// Driver name of the remote backend
pub const REMOTE_DRIVER: &str = "api";

/// Local storage kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverKind {
    Sqlite,
    Postgres,
    Mysql,
    Redis,
    Mongo,
}

impl DriverKind {
    pub const ALL: [DriverKind; 5] = [
        Self::Sqlite,
        Self::Postgres,
        Self::Mysql,
        Self::Redis,
        Self::Mongo,
    ];

    /// Parse a driver name; `mongodb` is accepted for `mongo`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "sqlite" => Some(Self::Sqlite),
            "postgres" => Some(Self::Postgres),
            "mysql" => Some(Self::Mysql),
            "redis" => Some(Self::Redis),
            "mongo" | "mongodb" => Some(Self::Mongo),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Redis => "redis",
            Self::Mongo => "mongo",
        }
    }

    /// Name for user-facing messages
    pub fn title(&self) -> &'static str {
        match self {
            Self::Sqlite => "Sqlite",
            Self::Postgres => "Postgres",
            Self::Mysql => "Mysql",
            Self::Redis => "Redis",
            Self::Mongo => "Mongo",
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of looking up a driver name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSelection {
    Remote,
    Local(DriverKind),
    /// Not a known driver; rejected only when a command connects
    Unrecognized(String),
}

impl BackendSelection {
    /// True only for the remote API
    pub fn is_remote(&self) -> bool {
        matches!(self, BackendSelection::Remote)
    }
}

/// Map a driver name to a backend; blank means the remote API.
pub fn select_backend(name: &str) -> BackendSelection {
    let normalized = name.trim().to_lowercase();
    if normalized.is_empty() || normalized == REMOTE_DRIVER {
        return BackendSelection::Remote;
    }
    match DriverKind::parse(&normalized) {
        Some(kind) => BackendSelection::Local(kind),
        None => BackendSelection::Unrecognized(name.trim().to_string()),
    }
}

/// Everything needed to open either backend
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub driver: String,
    pub remote: RemoteConfig,
    pub local: DriverOptions,
}

/// The backend serving a command or a server session
pub enum Backend {
    Remote(RemoteClient),
    Local(LocalBackend),
}

impl Backend {
    /// Open the backend named by `options.driver`.
    pub async fn connect(options: &ConnectOptions) -> MetricsResult<Self> {
        match select_backend(&options.driver) {
            BackendSelection::Remote => {
                let client = RemoteClient::new(options.remote.clone())?;
                info!(base_url = client.base_url(), "using remote metrics API");
                Ok(Backend::Remote(client))
            }
            BackendSelection::Local(kind) => {
                let backend = LocalBackend::connect(kind, &options.local).await?;
                info!(driver = kind.as_str(), target = %backend.target(), "using local driver");
                Ok(Backend::Local(backend))
            }
            BackendSelection::Unrecognized(name) => Err(MetricsError::Config(format!(
                "unsupported driver: {} (expected api, sqlite, postgres, mysql, redis, mongo)",
                name
            ))),
        }
    }

    pub fn driver_name(&self) -> &'static str {
        match self {
            Backend::Remote(_) => REMOTE_DRIVER,
            Backend::Local(local) => local.driver_name(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Backend::Remote(_))
    }

    /// Granularity defaults of the active source
    pub async fn source_info(&self) -> MetricsResult<SourceInfo> {
        match self {
            Backend::Remote(client) => client.get_source().await,
            Backend::Local(local) => Ok(local.source_info()),
        }
    }

    /// Write out anything a local driver still buffers.
    pub async fn flush(&self) -> MetricsResult<()> {
        match self {
            Backend::Remote(_) => Ok(()),
            Backend::Local(local) => local.flush().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::driver::MEMORY_PATH;

    #[test]
    fn test_select_backend() {
        assert_eq!(select_backend(""), BackendSelection::Remote);
        assert_eq!(select_backend(" API "), BackendSelection::Remote);
        assert_eq!(select_backend("SQLite"), BackendSelection::Local(DriverKind::Sqlite));
        assert_eq!(select_backend("mongodb"), BackendSelection::Local(DriverKind::Mongo));
        assert_eq!(
            select_backend("cassandra"),
            BackendSelection::Unrecognized("cassandra".to_string())
        );
    }

    #[test]
    fn test_driver_kind_names() {
        for kind in DriverKind::ALL {
            assert_eq!(DriverKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(DriverKind::Postgres.title(), "Postgres");
        assert_eq!(DriverKind::parse("api"), None);
    }

    #[tokio::test]
    async fn test_unrecognized_driver_fails_on_connect() {
        let options = ConnectOptions {
            driver: "cassandra".to_string(),
            ..ConnectOptions::default()
        };
        let err = Backend::connect(&options).await.err().unwrap();
        assert!(matches!(err, MetricsError::Config(_)));
        assert!(err.to_string().starts_with("unsupported driver: cassandra"));
    }

    #[tokio::test]
    async fn test_connect_local_and_remote() {
        let options = ConnectOptions {
            driver: "sqlite".to_string(),
            local: DriverOptions {
                db_path: MEMORY_PATH.to_string(),
                ..DriverOptions::default()
            },
            ..ConnectOptions::default()
        };
        let backend = Backend::connect(&options).await.unwrap();
        assert_eq!(backend.driver_name(), "sqlite");
        assert!(!backend.is_remote());
        let source = backend.source_info().await.unwrap();
        assert_eq!(source.available_granularities.len(), 7);

        let backend = Backend::connect(&ConnectOptions::default()).await.unwrap();
        assert!(backend.is_remote());
        assert_eq!(backend.driver_name(), "api");
    }
}
