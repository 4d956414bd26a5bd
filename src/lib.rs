//! # tally
//!
//! Query and write path-structured time-series metrics against either a
//! remote metrics API or a local store (SQLite, PostgreSQL, MySQL, Redis,
//! MongoDB), from the command line or through a JSON-RPC agent server.
//!
//! ## Modules
//!
//! - [`timeframe`]: time range and granularity resolution
//! - [`stats`]: local time-series library and storage drivers
//! - [`series`]: series view (aggregation, timeline, category, tables)
//! - [`backend`]: backend selection, remote client and local backend
//! - [`orchestrator`]: uniform query/write operations over either backend
//! - [`protocol`]: agent protocol front-end
//! - [`cli`], [`config`], [`output`]: command-line shell
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tally::backend::{Backend, ConnectOptions, DriverOptions};
//! use tally::orchestrator::{Args, Orchestrator, QueryMode, QueryRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = ConnectOptions {
//!         driver: "sqlite".to_string(),
//!         local: DriverOptions {
//!             db_path: "./stats.db".to_string(),
//!             ..DriverOptions::default()
//!         },
//!         ..ConnectOptions::default()
//!     };
//!     let orchestrator = Orchestrator::new(Backend::connect(&options).await?);
//!
//!     let args = Args::default()
//!         .with("key", "signup")
//!         .with("value_path", "count")
//!         .with("aggregator", "sum");
//!     let result = orchestrator
//!         .run_query(&QueryRequest::from_args(QueryMode::Aggregate, &args))
//!         .await?;
//!     println!("{}", serde_json::to_string_pretty(&result)?);
//!
//!     orchestrator.flush().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod protocol;
pub mod series;
pub mod stats;
pub mod timeframe;

pub use backend::{Backend, BackendSelection, ConnectOptions, DriverKind};
pub use error::{MetricsError, MetricsResult};
pub use orchestrator::Orchestrator;
pub use protocol::AgentServer;
