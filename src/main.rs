//! tally CLI
//!
//! Command-line entry point. Logs go to stderr; stdout carries command
//! output and agent protocol traffic.

use clap::Parser;
use tally::cli::{self, Cli};
use tally::config::{Config, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let (config, _path) = Config::resolve(cli.config.as_deref())?;
    init_logging(&config.logging);
    tracing::debug!("tally v{}", env!("CARGO_PKG_VERSION"));
    cli::run(cli, &config).await
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
