//! Inbound handshake listener.
//!
//! Answers other instances' heartbeats: read one identity line, reply with
//! `Hello from <our id>`, close. Each connection is handled on its own task;
//! errors stay inside that task.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use pulse_core::wire::greeting;

use crate::identity::Identity;
use crate::line::read_line;
use crate::{shutdown_signalled, Shutdown};

/// Pause after a failed accept so a persistent error (fd exhaustion) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

pub struct InboundListener {
    listener: TcpListener,
    identity: Arc<Identity>,
    read_timeout: Duration,
    shutdown: Shutdown,
}

impl InboundListener {
    /// Bind the listening socket. Failure here is fatal to the daemon.
    pub async fn bind(
        addr: SocketAddr,
        identity: Arc<Identity>,
        read_timeout: Duration,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind inbound listener on {addr}"))?;
        Ok(Self {
            listener,
            identity,
            read_timeout,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until shutdown. Accept errors are logged and skipped.
    pub async fn run(mut self) -> Result<()> {
        let address = self.local_addr()?;
        tracing::info!(address = %address, "inbound listener started");

        loop {
            tokio::select! {
                _ = shutdown_signalled(&mut self.shutdown) => {
                    tracing::info!(address = %address, "inbound listener stopped");
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };

                    let identity = self.identity.clone();
                    let read_timeout = self.read_timeout;
                    tokio::spawn(async move {
                        tracing::debug!(peer = %peer, "connection accepted");
                        match handle_connection(stream, &identity.id, read_timeout).await {
                            Ok(remote_id) => {
                                tracing::debug!(peer = %peer, remote_id = %remote_id, "greeted peer");
                            }
                            Err(e) => tracing::warn!(peer = %peer, error = %e, "handshake failed"),
                        }
                    });
                }
            }
        }
    }
}

/// Serve one connection: `Accepted → ReadingLine → Responding → Closed`.
///
/// Returns the identity the peer sent. The stream is owned here and dropped
/// on every return path, which closes the connection.
pub async fn handle_connection(stream: TcpStream, id: &str, read_timeout: Duration) -> io::Result<String> {
    let mut stream = BufReader::new(stream);

    let line = timeout(read_timeout, read_line(&mut stream))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "timed out waiting for identity line"))??;

    let writer = stream.get_mut();
    writer.write_all(greeting(id).as_bytes()).await?;
    writer.shutdown().await?;

    Ok(line.trim_end().to_string())
}
