//! Trainsync RPC Server - webhook receiver and JSON-RPC backend.
//!
//! Serves the provider completion webhook, a JSON-RPC interface over the
//! training registry, and runs the periodic status poll and storage sync
//! workers.

mod background;
mod handlers;
mod server;
mod wrapper;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use trainsync_core::{CancellationToken, ServiceConfig, TrainsyncApi};

#[derive(Parser, Debug)]
#[command(name = "trainsync-rpc")]
#[command(about = "Training version registry server")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "8484")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Directory holding the style and actor registries
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// Seconds between status poll passes (0 = disabled)
    #[arg(long, default_value = "60")]
    poll_interval_secs: u64,

    /// Seconds between storage sync passes (0 = disabled)
    #[arg(long, default_value = "900")]
    sync_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --debug
    let log_level = if args.debug { "debug" } else { "info" };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting Trainsync RPC Server");

    let data_root = args
        .data_root
        .unwrap_or_else(trainsync_core::config::default_data_root);
    info!("Data root: {}", data_root.display());

    let config = ServiceConfig::load(&data_root)?;
    let api = TrainsyncApi::builder(&data_root)
        .auto_create_dirs(true)
        .with_service_config(&config)?
        .build()
        .await?;

    let shutdown = CancellationToken::new();
    let workers: Vec<_> = [
        background::spawn_poll_loop(
            api.clone(),
            Duration::from_secs(args.poll_interval_secs),
            shutdown.clone(),
        ),
        background::spawn_sync_loop(
            api.clone(),
            Duration::from_secs(args.sync_interval_secs),
            shutdown.clone(),
        ),
    ]
    .into_iter()
    .flatten()
    .collect();

    let server = server::start_server(api, shutdown.clone(), &args.host, args.port).await?;

    // Read by supervisors and the integration tests (intentional stdout)
    println!("RPC_PORT={}", server.addr.port());

    info!("RPC server running on {}", server.addr);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, finishing in-flight passes");
    shutdown.cancel();
    for worker in workers {
        if let Err(e) = worker.await {
            warn!("Background worker ended abnormally: {}", e);
        }
    }
    if let Err(e) = server.task.await {
        warn!("Server task ended abnormally: {}", e);
    }
    info!("Shutdown complete");

    Ok(())
}
