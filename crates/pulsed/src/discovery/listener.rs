//! Beacon listener.
//!
//! Joins the discovery multicast group and registers the sender of every
//! valid beacon in the peer registry.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use pulse_core::config::PulseConfig;
use pulse_core::wire::{Beacon, MAX_DATAGRAM_SIZE};
use pulse_services::{PeerAddress, PeerRegistry};

use crate::identity::Identity;

/// What the listener made of one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datagram {
    /// Our own beacon looped back.
    SelfBeacon,
    /// Payload is not a beacon.
    BadSignature,
    /// Valid beacon from a peer already registered.
    Known(PeerAddress),
    /// Valid beacon from a peer we had not seen; now registered.
    Discovered(PeerAddress),
}

pub struct DiscoveryListener {
    registry: PeerRegistry,
    identity: Arc<Identity>,
    /// Our own listen port, used for self-detection when ports are advertised.
    listen_port: u16,
    /// Port assumed for peers whose beacon carries none.
    peer_port: u16,
    advertise_port: bool,
}

impl DiscoveryListener {
    pub fn new(registry: PeerRegistry, identity: Arc<Identity>, config: &PulseConfig) -> Self {
        Self {
            registry,
            identity,
            listen_port: config.network.listen_port,
            peer_port: config.discovery.peer_port,
            advertise_port: config.discovery.advertise_port,
        }
    }

    /// Validate one datagram and register its sender if it is a new peer.
    ///
    /// Self-detection compares the source IP only, unless ports are
    /// advertised, in which case IP and advertised port must both match. Two
    /// instances sharing one IP are therefore invisible to each other unless
    /// port advertisement is on.
    pub fn handle_datagram(&self, payload: &[u8], src: SocketAddr) -> Datagram {
        let src_ip = canonical_ip(src.ip());

        if !self.advertise_port && src_ip == self.identity.ip {
            return Datagram::SelfBeacon;
        }

        let beacon = match Beacon::decode(payload, self.advertise_port) {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!(src = %src, error = %e, "invalid signature, skipping datagram");
                return Datagram::BadSignature;
            }
        };

        let port = beacon.port.unwrap_or(self.peer_port);
        if src_ip == self.identity.ip && port == self.listen_port {
            return Datagram::SelfBeacon;
        }

        let peer = PeerAddress::new(src_ip, port);
        if self.registry.add(peer) {
            tracing::info!(peer = %peer, "new peer discovered");
            Datagram::Discovered(peer)
        } else {
            tracing::trace!(peer = %peer, "beacon from known peer");
            Datagram::Known(peer)
        }
    }

    /// Receive beacons forever.
    ///
    /// Socket setup and receive errors end the loop with an error: without
    /// discovery there is nothing new to check. The caller isolates that
    /// failure from the other tasks. Cancel by dropping the task handle.
    pub async fn run(self, group: SocketAddrV4, interface: Ipv4Addr) -> Result<()> {
        let socket = make_listener_socket(group, interface)
            .context("failed to create multicast listener socket")?;
        let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        tracing::info!(group = %group, interface = %interface, "discovery listener starting");

        loop {
            let (len, src) = socket
                .recv_from(&mut buf)
                .await
                .context("discovery recv_from failed")?;

            if self.handle_datagram(&buf[..len], src) == Datagram::SelfBeacon {
                tracing::trace!("ignoring own beacon");
            }
        }
    }
}

/// Unwrap IPv4-mapped IPv6 sources so they compare equal to our IPv4 identity.
fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

/// Create a UDP socket bound to the group port and joined to the group.
///
/// SO_REUSEPORT lets several instances on one host share the port; every
/// joined socket receives its own copy of each multicast datagram.
pub fn make_listener_socket(group: SocketAddrV4, interface: Ipv4Addr) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    #[cfg(unix)]
    socket.set_reuse_port(true).context("SO_REUSEPORT")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port());
    socket.bind(&bind_addr.into()).context("bind()")?;

    socket
        .join_multicast_v4(group.ip(), &interface)
        .context("IP_ADD_MEMBERSHIP")?;

    Ok(socket.into())
}
