//! Heartbeat loop.
//!
//! Every period, snapshots the peer registry and checks each peer with a TCP
//! round trip: connect, send our identity line, read one line back. Peers
//! that fail any step are removed. A removed peer comes back only through a
//! fresh beacon.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{self, timeout, Instant, MissedTickBehavior};

use pulse_core::config::HeartbeatConfig;
use pulse_core::wire::{identity_line, parse_greeting};
use pulse_services::{PeerAddress, PeerRegistry};

use crate::identity::Identity;
use crate::line::read_line;
use crate::{shutdown_signalled, Shutdown};

/// Why a peer failed its heartbeat.
#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),
    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
}

/// Outcome counts for one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub alive: usize,
    pub removed: usize,
}

pub struct HeartbeatLoop {
    registry: PeerRegistry,
    identity: Arc<Identity>,
    period: Duration,
    timeout: Duration,
    in_flight: Arc<Semaphore>,
    shutdown: Shutdown,
}

impl HeartbeatLoop {
    pub fn new(
        registry: PeerRegistry,
        identity: Arc<Identity>,
        config: &HeartbeatConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            registry,
            identity,
            period: config.period(),
            timeout: config.timeout(),
            in_flight: Arc::new(Semaphore::new(config.max_concurrent_checks.max(1))),
            shutdown,
        }
    }

    /// Tick until shutdown. The first tick fires one period after start.
    ///
    /// A tick in progress is abandoned when shutdown fires; dropping it
    /// aborts its outstanding checks.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut shutdown = self.shutdown.clone();
        let mut interval = time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            period_ms = self.period.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            "heartbeat loop starting"
        );

        loop {
            tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => break,

                _ = interval.tick() => {
                    tokio::select! {
                        _ = shutdown_signalled(&mut shutdown) => break,

                        report = self.tick() => {
                            tracing::debug!(
                                alive = report.alive,
                                removed = report.removed,
                                peers = self.registry.len(),
                                "heartbeat tick"
                            );
                        }
                    }
                }
            }
        }

        tracing::info!("heartbeat loop shutting down");
        Ok(())
    }

    /// Check every peer in a snapshot of the registry.
    ///
    /// Checks run concurrently, at most `max_concurrent_checks` at a time, and
    /// are all joined before this returns. Peers registered after the snapshot
    /// wait for the next tick.
    pub async fn tick(&self) -> TickReport {
        let mut checks = JoinSet::new();

        for peer in self.registry.iterate() {
            let permit = self
                .in_flight
                .clone()
                .acquire_owned()
                .await
                .expect("heartbeat semaphore is never closed");
            let id = self.identity.id.clone();
            let limit = self.timeout;

            checks.spawn(async move {
                let _permit = permit;
                (peer, check_peer(peer, &id, limit).await)
            });
        }

        let mut report = TickReport::default();
        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok((peer, Ok(response))) => {
                    report.alive += 1;
                    match parse_greeting(&response) {
                        Some(remote_id) => tracing::info!(peer = %peer, remote_id, "heartbeat ok"),
                        None => tracing::info!(peer = %peer, response = %response.trim_end(), "heartbeat ok"),
                    }
                }
                Ok((peer, Err(e))) => {
                    self.registry.remove(&peer);
                    report.removed += 1;
                    tracing::info!(peer = %peer, error = %e, "peer unreachable, removed");
                }
                Err(e) => tracing::warn!(error = %e, "heartbeat check task failed"),
            }
        }
        report
    }
}

/// One heartbeat round trip. Each step gets its own `limit`.
///
/// Returns the peer's reply line. The connection is closed on return,
/// whichever way that happens.
pub async fn check_peer(peer: PeerAddress, id: &str, limit: Duration) -> Result<String, HeartbeatError> {
    let stream = timeout(limit, TcpStream::connect(peer.socket_addr()))
        .await
        .map_err(|_| HeartbeatError::Timeout("connect", limit))?
        .map_err(HeartbeatError::Connect)?;
    let mut stream = BufReader::new(stream);

    timeout(limit, stream.get_mut().write_all(identity_line(id).as_bytes()))
        .await
        .map_err(|_| HeartbeatError::Timeout("write", limit))?
        .map_err(HeartbeatError::Write)?;

    timeout(limit, read_line(&mut stream))
        .await
        .map_err(|_| HeartbeatError::Timeout("read", limit))?
        .map_err(HeartbeatError::Read)
}
