//! API gateway dispatch core.
//!
//! # Architecture Overview
//!
//! ```text
//!   Store (meta.toml) ──events──▶ EventConsumer ──publish──▶ RoutingTable
//!                                      ▲                          │ snapshot
//!   HealthMonitor ──StatusChanged──────┘                          ▼
//!
//!   Client ─▶ http server ─▶ Dispatcher ─▶ FilterChain ─▶ Upstream ─▶ Server
//!                             (API, split,    Pre / Post / PostErr
//!                              balancer)
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;

use gateway_dispatch::config::load_config;
use gateway_dispatch::lifecycle::{wait_for_signal, Gateway, Shutdown};
use gateway_dispatch::observability::{init_logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "gateway-dispatch", version, about = "API gateway dispatch core")]
struct Cli {
    /// Gateway configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Validate the configuration and the store document, then exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gateway-dispatch starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        meta_file = %config.store.meta_file,
        filters = config.filters.len(),
        "Configuration loaded"
    );

    let gateway = match Gateway::build(config.clone()) {
        Ok(gateway) => gateway,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    if cli.check {
        tracing::info!("Configuration and store document are valid");
        return ExitCode::SUCCESS;
    }

    let listener = match TcpListener::bind(&config.listener.bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %config.listener.bind_address, error = %e, "Failed to bind listener");
            return ExitCode::FAILURE;
        }
    };

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.trigger();
    });

    if let Err(e) = gateway.run(listener, &shutdown).await {
        tracing::error!(error = %e, "Server error");
        return ExitCode::FAILURE;
    }

    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
