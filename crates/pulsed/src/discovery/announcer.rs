//! Beacon announcer.
//!
//! Periodically sends our beacon to the discovery multicast group so nearby
//! instances can find us.

use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time;

use pulse_core::config::PulseConfig;
use pulse_core::wire::Beacon;

use crate::identity::Identity;

pub struct Announcer {
    identity: Arc<Identity>,
    beacon: Beacon,
    interval: Duration,
    ttl: u32,
}

impl Announcer {
    pub fn new(identity: Arc<Identity>, config: &PulseConfig) -> Self {
        let beacon = if config.discovery.advertise_port {
            Beacon::with_port(config.network.listen_port)
        } else {
            Beacon::plain()
        };
        Self {
            identity,
            beacon,
            interval: config.discovery.announce_interval(),
            ttl: config.discovery.multicast_ttl,
        }
    }

    /// Send the beacon every interval.
    ///
    /// Runs until the task is dropped. Send failures are
    /// logged and retried on the next tick; only socket setup is fatal.
    pub async fn run(self, group: SocketAddrV4, interface: Ipv4Addr) -> Result<()> {
        let local = match self.identity.ip {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        };
        let socket = make_announce_socket(local, interface, self.ttl)
            .context("failed to create multicast announce socket")?;
        let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;

        let payload = self.beacon.encode();
        let mut interval = time::interval(self.interval);

        tracing::info!(
            group = %group,
            source = %local,
            interval_ms = self.interval.as_millis() as u64,
            "discovery announcer starting"
        );

        loop {
            interval.tick().await;

            match socket.send_to(&payload, group).await {
                Ok(n) => tracing::trace!(bytes = n, "beacon sent"),
                Err(e) => tracing::warn!(error = %e, "beacon send failed"),
            }
        }
    }
}

/// Create a UDP socket for sending IPv4 multicast.
///
/// Bound to our own address so receivers see it as the datagram source.
/// Loopback stays on so instances sharing this host hear each other.
fn make_announce_socket(local: Ipv4Addr, interface: Ipv4Addr, ttl: u32) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket
        .bind(&SocketAddrV4::new(local, 0).into())
        .context("bind()")?;

    let outgoing_if = if interface.is_unspecified() { local } else { interface };
    if !outgoing_if.is_unspecified() {
        socket.set_multicast_if_v4(&outgoing_if).context("IP_MULTICAST_IF")?;
    }
    socket.set_multicast_loop_v4(true).context("IP_MULTICAST_LOOP")?;
    socket.set_multicast_ttl_v4(ttl).context("IP_MULTICAST_TTL")?;

    Ok(socket.into())
}
