//! Cascading circuit breaker service.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────────┐
//!                     │                   CASCADE BREAKER                        │
//!                     │                                                          │
//!   Client Request    │  ┌─────────┐    ┌──────────────┐    ┌──────────────┐     │
//!   ──────────────────┼─▶│  http   │───▶│ orchestrator │───▶│  breaker     │─────┼──▶ Downstream
//!                     │  │ server  │    │  + fallback  │    │  registry    │     │
//!                     │  └─────────┘    └──────┬───────┘    └──────┬───────┘     │
//!                     │                        │ gate              │ Open        │
//!                     │                        ▼                   ▼             │
//!                     │                 ┌──────────────┐    ┌──────────────┐     │
//!                     │                 │ state store  │◀───│  propagator  │     │
//!                     │                 │ status:<e>   │    └──────┬───────┘     │
//!                     │                 │ requirings:  │           │ publish     │
//!                     │                 └──────▲───────┘           ▼             │
//!                     │                        │            ┌──────────────┐     │
//!                     │                        └────────────│  status bus  │◀────┼──▶ other
//!                     │                      consumers      │ topic(<e>)   │     │    instances
//!                     │                                     └──────────────┘     │
//!                     └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use cascade_breaker::config::load_config;
use cascade_breaker::lifecycle::{signals, startup};
use cascade_breaker::observability::{logging, metrics};
use cascade_breaker::{HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "cascade-breaker", version, about = "Cascading circuit breaker service")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "cascade-breaker starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        failure_threshold = config.breaker.failure_threshold,
        open_timeout_secs = config.breaker.open_timeout_secs,
        store = ?config.store.backend,
        broker = ?config.broker.backend,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Arc::new(Shutdown::new());
    let orchestrator = startup::bootstrap(&config, &shutdown).await?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    let server = HttpServer::new(orchestrator.clone(), &config);
    server.run(listener, shutdown.signal()).await?;

    orchestrator.tasks().wait_idle().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
