//! Process identity: the token we greet with and the address we live at.

use std::net::{IpAddr, UdpSocket};

use anyhow::{Context, Result};

use pulse_core::config::IdentityConfig;

/// Identity of this instance. Immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Opaque unique token, sent in every heartbeat and greeting.
    pub id: String,
    /// Local address: source of our beacons, host of our inbound listener.
    pub ip: IpAddr,
}

impl Identity {
    pub fn new(id: impl Into<String>, ip: IpAddr) -> Self {
        Self { id: id.into(), ip }
    }

    /// Build from config, generating whatever is left empty.
    ///
    /// An empty id becomes a random UUID; an empty ip becomes the address of
    /// the interface that routes to the outside world.
    pub fn resolve(config: &IdentityConfig) -> Result<Self> {
        let id = if config.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            config.id.clone()
        };

        let ip = if config.ip.is_empty() {
            outbound_ip().context("failed to detect outbound IP address")?
        } else {
            config
                .ip
                .parse()
                .with_context(|| format!("invalid identity ip {:?}", config.ip))?
        };

        Ok(Self { id, ip })
    }
}

/// Local address the OS would use to reach a public host.
///
/// Connecting a UDP socket sends nothing; it only makes the kernel pick a
/// route and a source address.
pub fn outbound_ip() -> Result<IpAddr> {
    let probe = UdpSocket::bind("0.0.0.0:0").context("bind probe socket")?;
    probe.connect("8.8.8.8:80").context("connect probe socket")?;
    Ok(probe.local_addr().context("probe local_addr")?.ip())
}
