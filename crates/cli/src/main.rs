//! Dedalus command-line client.

mod cli;
mod client;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Mode};
use crate::client::MasterApiClient;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let args = Cli::parse();
    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let client = MasterApiClient::new(&args.server, args.port, args.use_ssl, &args.api_version);
    match args.mode {
        Mode::Graph { action } => commands::graph::run(&client, action).await?,
        Mode::Instance { action } => commands::instance::run(&client, action).await?,
    }
    Ok(())
}
