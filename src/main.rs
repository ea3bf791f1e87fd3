//! Line-based TCP Chat Relay - Entry Point
//!
//! Loads the configuration, starts the listener and stops it on ctrl-c.

use std::env;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_relay::{Listener, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=info")),
        )
        .init();

    // Optional JSON config path on the command line
    let config = match env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from {}", path);
            ServerConfig::from_file(&path)?
        }
        None => ServerConfig::default(),
    };

    let listener = Listener::bind(&config).await?;
    let handle = listener.handle();
    let server = tokio::spawn(listener.run());

    // Notify sessions before exiting
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => handle.shutdown().await,
            Err(e) => error!("Cannot listen for ctrl-c: {}", e),
        }
    });

    server.await?;

    Ok(())
}
