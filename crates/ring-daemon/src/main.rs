//! ring-daemon: one member of a self-healing leader ring.
//!
//! Dials its successor over WebSocket, accepts its predecessor on `/ring`
//! and serves the control routes on the same address.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ring_daemon::server;
use ring_daemon::{Args, NodeSettings, RingHandle};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,ring_core=debug,ring_daemon=debug"
    } else {
        "info,ring_core=info,ring_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = NodeSettings::from_args(&args)?;
    info!("Starting ring node {}", settings.id);
    info!("Successor: {}", settings.successor);
    if settings.leader {
        info!("Starting as leader");
    }

    let addr: SocketAddr = format!("{}:{}", args.ip, args.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", args.ip, args.port))?;
    let listener = server::bind(addr).await?;
    let handle = RingHandle::spawn(listener, settings)?;

    info!("Node running. Press Ctrl+C to stop.");
    shutdown_signal().await;

    handle.shutdown().await?;
    info!("Shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
