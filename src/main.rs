// src/main.rs
use anyhow::Result;
use clap::Parser;
use fulcrum::config;
use fulcrum::server::ProxyServer;
use std::path::PathBuf;
use tokio::signal;
use tracing::info;

/// HTTP reverse-proxy load balancer with a runtime-mutable backend pool.
#[derive(Parser, Debug)]
#[command(name = "fulcrum", version, about)]
struct Args {
    /// Path to the configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fulcrum=info".parse()?)
                .add_directive("hyper=warn".parse()?),
        )
        .init();

    let args = Args::parse();

    info!("loading configuration from {}", args.config.display());
    let config = config::load_config(&args.config).await?;

    let server = ProxyServer::new(config).await?;
    server.run(shutdown_signal()).await
}

/// Resolves on the first interrupt or terminate signal, logging which one
/// triggered the shutdown.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");

        tokio::select! {
            result = signal::ctrl_c() => {
                result.expect("failed to listen for interrupt");
                info!("interrupt received, shutting down");
            }
            _ = terminate.recv() => {
                info!("SIGTERM received, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .expect("failed to listen for interrupt");
        info!("interrupt received, shutting down");
    }
}
