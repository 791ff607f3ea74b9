//! gossip-peer daemon entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use tokio::signal;
use tokio::sync::oneshot;

use gossip_peer::control::run_control_server;
use gossip_peer::{Config, LogSink, Peer};

#[derive(Parser, Debug)]
#[command(name = "gossip-peer")]
#[command(about = "UDP peer with flood-propagated group membership")]
struct Args {
    /// Config file (TOML, or JSON with a `.json` extension)
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args = Args::parse();

    // Load configuration
    let cfg = Config::load(args.config.as_deref())?;
    info!("Starting gossip peer with config: {:?}", cfg);

    // Peer core
    let peer = Peer::bind(&cfg, Arc::new(LogSink)).await?;
    let receive_handle = peer.spawn();

    // Command server
    let (control_stop, control_stopped) = oneshot::channel::<()>();
    let control_handle = cfg.control_bind.map(|bind| {
        let peer = Arc::clone(&peer);
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = control_stopped.await;
            };
            if let Err(e) = run_control_server(bind, peer, shutdown).await {
                error!("HTTP command server failed: {}", e);
            }
        })
    });

    // Graceful Shutdown
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    peer.shutdown().await;
    let _ = control_stop.send(());

    if let Err(e) = receive_handle.await {
        error!("Receive loop panicked: {}", e);
    }
    if let Some(handle) = control_handle {
        if let Err(e) = handle.await {
            error!("HTTP command server panicked: {}", e);
        }
    }

    info!("Shutdown complete.");
    Ok(())
}
