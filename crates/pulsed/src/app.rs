//! Application lifecycle.
//!
//! Owns the peer registry and the shutdown signal, binds the inbound
//! listener and runs the discovery and heartbeat tasks beside it.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinSet;

use pulse_core::PulseConfig;
use pulse_services::PeerRegistry;

use crate::discovery::{self, Announcer, DiscoveryListener};
use crate::heartbeat::HeartbeatLoop;
use crate::identity::Identity;
use crate::inbound::InboundListener;

pub struct App {
    identity: Arc<Identity>,
    config: PulseConfig,
    registry: PeerRegistry,
    shutdown_tx: watch::Sender<bool>,
}

impl App {
    pub fn new(identity: Identity, config: PulseConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            identity: Arc::new(identity),
            config,
            registry: PeerRegistry::new(),
            shutdown_tx,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Handle to the live registry. Clones share state with the running tasks.
    pub fn registry(&self) -> PeerRegistry {
        self.registry.clone()
    }

    /// Address the inbound listener binds.
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.identity.ip, self.config.network.listen_port)
    }

    /// Ask a running (or future) `run()` to return. Idempotent.
    pub fn stop(&self) {
        if !self.shutdown_tx.send_replace(true) {
            tracing::info!(id = %self.identity.id, "stop requested");
        }
    }

    /// Run until [`stop`](Self::stop) is called.
    ///
    /// Only a bad config or a failure to bind the inbound listener is
    /// returned as an error. Discovery or heartbeat failures are logged and
    /// leave the rest of the application running.
    pub async fn run(&self) -> Result<()> {
        self.config.validate()?;

        tracing::info!(
            id = %self.identity.id,
            ip = %self.identity.ip,
            port = self.config.network.listen_port,
            "pulsed starting"
        );

        let inbound = InboundListener::bind(
            self.address(),
            self.identity.clone(),
            self.config.network.inbound_read_timeout(),
            self.shutdown_tx.subscribe(),
        )
        .await?;

        let group = self.config.discovery.group()?;
        let interface = discovery::interface_addr(&self.config.discovery)?;

        let mut background = JoinSet::new();
        background.spawn(logged(
            "discovery listener",
            DiscoveryListener::new(self.registry.clone(), self.identity.clone(), &self.config)
                .run(group, interface),
        ));
        background.spawn(logged(
            "discovery announcer",
            Announcer::new(self.identity.clone(), &self.config).run(group, interface),
        ));
        background.spawn(logged(
            "heartbeat loop",
            HeartbeatLoop::new(
                self.registry.clone(),
                self.identity.clone(),
                &self.config.heartbeat,
                self.shutdown_tx.subscribe(),
            )
            .run(),
        ));

        let result = inbound.run().await;

        // Discovery tasks only end by cancellation.
        background.shutdown().await;
        tracing::info!(id = %self.identity.id, "application stopped");
        result
    }
}

async fn logged(task: &'static str, fut: impl Future<Output = Result<()>>) {
    if let Err(e) = fut.await {
        tracing::error!(task, error = %format!("{e:#}"), "task failed");
    }
}
