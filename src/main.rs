//! Rover Link binary entry point.
//!
//! Composition root: builds the configuration, the downstream command sink,
//! and the server, then runs until ctrl-c. In the full application the sink
//! is the radio link to the robot; here it is a channel whose consumer logs
//! each command.

use rover_link::{ServerConfig, ServerEvent, WsServer};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => match ServerConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, path = %path, "failed to load config");
                std::process::exit(1);
            },
        },
        None => ServerConfig::default(),
    };

    // Stand-in for the radio transport
    let (sink_tx, mut sink_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(command) = sink_rx.recv().await {
            info!(command = %command, "forwarding command downstream");
        }
    });

    let (handle, mut events) = WsServer::new(config, Arc::new(sink_tx)).start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                handle.stop();
            },
            event = events.recv() => match event {
                Some(ServerEvent::Stopped) | None => break,
                Some(event) => info!(?event, "server event"),
            },
        }
    }
}
