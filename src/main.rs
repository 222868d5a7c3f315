//! Edge proxy binary.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ http (axum, request id, trace)
//!                 │
//!                 ▼
//!              routing ──▶ LoadBalancer (policy + retry + deadline)
//!                                │            ▲
//!                                ▼            │ online/offline
//!                          ServersManager ◀── HealthChecker
//!                                │
//!                                ▼
//!                           HttpBackend ──▶ Backend server
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use edge_proxy::admin::setup_admin_router;
use edge_proxy::config::{load_config, ConfigWatcher};
use edge_proxy::http::{AppState, HttpServer};
use edge_proxy::lifecycle::{shutdown_signal, Gateway};
use edge_proxy::load_balancer::BalancerRegistry;
use edge_proxy::observability::{logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "edge-proxy", version, about = "HTTP edge proxy with pluggable load balancing")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "edge.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };
    if cli.check {
        println!("{}: configuration OK", cli.config.display());
        return Ok(());
    }

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-proxy starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = BalancerRegistry::global();
    let gateway = Arc::new(Gateway::from_config(&config, registry)?);
    gateway.start();

    if config.admin.enabled {
        let admin = setup_admin_router(gateway.clone(), &config.admin.api_key);
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, admin).await {
                tracing::error!(error = %e, "Admin server failed");
            }
        });
    }

    let (watcher, mut updates) = ConfigWatcher::new(&cli.config);
    // Dropping the handle stops watching.
    let _watch_handle = match watcher.run() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Config hot reload disabled");
            None
        }
    };
    let reload_gateway = gateway.clone();
    tokio::spawn(async move {
        while let Some(next) = updates.recv().await {
            if let Err(e) = reload_gateway.apply(&next, registry) {
                tracing::error!(error = %e, "Failed to apply reloaded config");
            }
        }
    });

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        upstreams = config.upstreams.len(),
        routes = config.routes.len(),
        "Listening for connections"
    );

    let server = HttpServer::new(AppState::new(gateway.clone(), &config));
    server.run(listener, shutdown_signal()).await?;

    gateway.stop();
    tracing::info!("Shutdown complete");
    Ok(())
}
