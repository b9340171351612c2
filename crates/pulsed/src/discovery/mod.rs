//! Multicast discovery: beacon announcer and beacon listener.
//!
//! Every instance sends the fixed signature to the IPv4 multicast group once
//! per interval and listens on the same group. A valid beacon from another
//! host registers `source IP : peer port` in the peer registry; the heartbeat
//! loop takes it from there.

use std::net::Ipv4Addr;

use anyhow::{Context, Result};

use pulse_core::config::DiscoveryConfig;

pub mod announcer;
pub mod listener;

pub use announcer::Announcer;
pub use listener::{Datagram, DiscoveryListener};

/// Local interface address to use for multicast membership and sending.
/// Unspecified lets the kernel pick the default route's interface.
pub fn interface_addr(config: &DiscoveryConfig) -> Result<Ipv4Addr> {
    if config.interface.is_empty() {
        return Ok(Ipv4Addr::UNSPECIFIED);
    }
    config
        .interface
        .parse()
        .with_context(|| format!("invalid discovery interface {:?}", config.interface))
}
