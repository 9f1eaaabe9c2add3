//! Dedalus master daemon.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dedalus_master::worker_client::HttpWorkerConnector;
use dedalus_master::{Engine, MasterConfig, MasterStore, Scheduler, api};
use dedalus_store::Store;
use miette::{IntoDiagnostic, WrapErr};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Dedalus master: orchestrates task graphs across workers.
#[derive(Debug, Parser)]
#[command(name = "dedalus-master", version)]
struct Args {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log chattily (overridden by RUST_LOG).
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = match &args.config {
        Some(path) => MasterConfig::load(path)
            .into_diagnostic()
            .wrap_err("loading master config")?,
        None => MasterConfig::default(),
    };
    info!(?config, "master starting");

    let store = Store::open(&config.store_path)
        .into_diagnostic()
        .wrap_err("opening master store")?;
    let master_store = MasterStore::new(&store)
        .into_diagnostic()
        .wrap_err("opening master collections")?;
    let workers = Arc::new(HttpWorkerConnector::new(
        config.worker_port,
        config.rpc_timeout(),
    ));

    let engine = Engine::new(master_store.clone(), workers, config.tick_interval())
        .await
        .into_diagnostic()
        .wrap_err("starting engine")?;
    let scheduler = Scheduler::spawn(
        master_store,
        engine.clone(),
        config.scheduler_interval(),
    );

    let app = api::router(engine.clone());
    let addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("binding {addr}"))?;
    info!(%addr, "master listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("got SIGINT, shutting down");
        })
        .await
        .into_diagnostic()
        .wrap_err("serving master api")?;

    // Running instances stay `running` in the store and resume at next boot.
    scheduler.shutdown().await;
    engine.shutdown().await;
    Ok(())
}
