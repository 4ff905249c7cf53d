use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, Level};

mod cli;
mod config;
mod core;
mod error;
mod server;

use cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    debug!("roma-debug v{}", env!("CARGO_PKG_VERSION"));

    cli.execute().await
}
