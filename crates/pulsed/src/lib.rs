//! pulsed: multicast peer discovery and TCP liveness checking.
//!
//! The daemon is split into independent tasks that share nothing but the
//! [`PeerRegistry`](pulse_services::PeerRegistry):
//!
//! - `discovery::listener`: receives beacons and registers new peers
//! - `discovery::announcer`: sends our beacon once per interval
//! - `heartbeat`: checks every registered peer over TCP, prunes failures
//! - `inbound`: answers other instances' heartbeats
//!
//! [`App`] wires them together and owns the shutdown signal.

pub mod app;
pub mod discovery;
pub mod heartbeat;
pub mod identity;
pub mod inbound;
pub mod line;

pub use app::App;
pub use identity::Identity;

/// Shutdown signal shared by the long-running loops. Flips to `true` once.
pub type Shutdown = tokio::sync::watch::Receiver<bool>;

/// Resolve once the shutdown signal has fired (or its sender is gone).
pub async fn shutdown_signalled(shutdown: &mut Shutdown) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}
