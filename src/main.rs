//! minikv server entry point.
//!
//! Parses the command line, sets up logging, and runs the accept loop
//! until Ctrl+C.

use anyhow::Context;
use minikv::config::{help_text, CliAction, Config};
use minikv::connection::ConnectionStats;
use minikv::server::{bind_listener, serve};
use minikv::storage::{ExpirySweeper, Store};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match Config::from_args(std::env::args().skip(1)) {
        Ok(CliAction::Run(config)) => config,
        Ok(CliAction::Help) => {
            println!("{}", help_text());
            return Ok(());
        }
        Ok(CliAction::Version) => {
            println!("minikv version {}", minikv::VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("{}", help_text());
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(version = minikv::VERSION, "Starting minikv");

    let storage = Arc::new(Store::new());
    let _sweeper = ExpirySweeper::start(Arc::clone(&storage), config.expiry.clone());

    let stats = Arc::new(ConnectionStats::new());

    let listener = bind_listener(&config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!("Listening on {}", config.bind_address());

    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping server..."),
            Err(e) => {
                error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = serve(listener, Arc::clone(&storage), Arc::clone(&stats), config.dialect) => {}
        _ = shutdown => {}
    }

    let store_stats = storage.stats();
    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        keys = store_stats.keys,
        expired = store_stats.expired,
        "Server shutdown complete"
    );
    Ok(())
}
