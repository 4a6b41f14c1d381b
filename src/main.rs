//! socksd - SOCKS5 proxy server daemon
//!
//! This is the main entry point for the socksd binary.

use anyhow::Result;
use clap::Parser;
use socksd::config::{load_config, Config};
use socksd::Server;
use std::path::PathBuf;
use tracing::{info, Level};

/// socksd - SOCKS5 proxy server
#[derive(Parser, Debug)]
#[command(name = "socksd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration file
    #[arg(short, long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(&args.log_level, args.json_log)?;

    let mut config = match &args.config {
        Some(path) => {
            let config = load_config(path)?;
            info!("configuration loaded from {:?}", path);
            config
        }
        None => Config::default(),
    };
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }

    info!("socksd v{}", socksd::VERSION);

    let server = Server::from_config(&config.server)?;
    let listen_addr = config.server.listen_addr.clone();

    tokio::spawn({
        let server = server.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            server.shutdown();
        }
    });

    server.listen_and_serve(&listen_addr).await?;

    Ok(())
}

/// Resolves once the process is asked to stop: SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Install the global tracing subscriber.
fn init_tracing(level: &str, json: bool) -> Result<()> {
    let level: Level = level.parse().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true);

    if json {
        builder.json().try_init().map_err(|e| anyhow::anyhow!(e))?;
    } else {
        builder.try_init().map_err(|e| anyhow::anyhow!(e))?;
    }

    Ok(())
}
