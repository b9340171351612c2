//! pulsed: multicast peer discovery and TCP heartbeat daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use pulse_core::PulseConfig;
use pulsed::{App, Identity};

#[derive(Parser, Debug)]
#[command(name = "pulsed", version, about = "Multicast peer discovery with TCP heartbeats")]
struct Cli {
    /// TCP port for the inbound heartbeat listener
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file (default: $PULSE_CONFIG or ~/.config/pulse/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Instance id sent in heartbeats (default: random UUID)
    #[arg(long)]
    id: Option<String>,

    /// Local IP address (default: outbound interface address)
    #[arg(long)]
    ip: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PulseConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => {
            if let Err(e) = PulseConfig::write_default_if_missing() {
                tracing::warn!(error = %e, "failed to write default config");
            }
            PulseConfig::load().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to load config, using defaults");
                PulseConfig::default()
            })
        }
    };

    if let Some(port) = cli.port {
        config.network.listen_port = port;
    }
    if let Some(id) = cli.id {
        config.identity.id = id;
    }
    if let Some(ip) = cli.ip {
        config.identity.ip = ip;
    }

    let identity = Identity::resolve(&config.identity)?;
    tracing::info!(id = %identity.id, ip = %identity.ip, "identity resolved");

    let app = Arc::new(App::new(identity, config));

    {
        let app = app.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("shutdown signal received");
            app.stop();
        });
    }

    app.run().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
