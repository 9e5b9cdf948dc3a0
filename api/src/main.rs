//! vCenter VM gateway server
//!
//! Configuration is loaded from a TOML file (default `config.toml`), then
//! overridden by `VCENTER_*` environment variables and command-line flags.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use gateway::{create_router, init_tracing, AppState, Config};
use vcenter::InventoryClient;

#[derive(Parser, Debug)]
#[command(name = "vm-gateway", version, about = "REST gateway for vCenter VM operations")]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Address to bind, overrides [server].host
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on, overrides [server].port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = Config::load(&args.config).unwrap_or_else(|e| {
        eprintln!("{}", e);
        std::process::exit(1);
    });
    config.apply_env();
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config.logging.level);

    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let client = InventoryClient::from_config(&config.vcenter)?;
    let state = Arc::new(AppState::new(client));
    let shutdown = state.shutdown.clone();
    let app = create_router(state);

    let addr: std::net::SocketAddr = config.socket_addr().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("VM gateway listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("VM gateway stopped");
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested, cancelling in-flight power tasks");
    token.cancel();
}
