//! Dedalus worker daemon.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dedalus_store::Store;
use dedalus_worker::{WorkerConfig, WorkerEngine, api};
use miette::{IntoDiagnostic, WrapErr};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Dedalus worker: executes tasks dispatched by the master.
#[derive(Debug, Parser)]
#[command(name = "dedalus-worker", version)]
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
        Some(path) => WorkerConfig::load(path)
            .into_diagnostic()
            .wrap_err("loading worker config")?,
        None => WorkerConfig::default(),
    };
    info!(?config, "worker starting");

    let store = Store::open(&config.store_path)
        .into_diagnostic()
        .wrap_err("opening task store")?;
    let engine = Arc::new(
        WorkerEngine::new(&config, &store)
            .into_diagnostic()
            .wrap_err("building worker engine")?,
    );

    let app = api::router(engine);
    let addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("binding {addr}"))?;
    info!(%addr, "worker listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("got SIGINT, shutting down");
        })
        .await
        .into_diagnostic()
        .wrap_err("serving worker api")?;
    Ok(())
}
