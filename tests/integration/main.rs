//! Pulse integration test harness.
//!
//! Tests here run several full instances inside one process against real
//! sockets on the loopback interface:
//!
//!   cargo test --test integration
//!
//! Instances live on distinct loopback addresses (127.0.0.1, 127.0.0.2) so
//! that IP-based self-detection tells them apart. Every test picks its own
//! TCP port and multicast port, so tests do not hear each other.
//!
//! Environments without loopback multicast (some containers) skip.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::task::JoinHandle;

use pulse_core::wire::SIGNATURE;
use pulse_core::PulseConfig;
use pulsed::discovery::listener::make_listener_socket;
use pulsed::{App, Identity};

mod discovery;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const IP_A: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);
pub const IP_B: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 2);

/// Timings short enough that a whole scenario runs in a few seconds.
pub const ANNOUNCE_MS: u64 = 100;
pub const HEARTBEAT_MS: u64 = 300;
pub const HEARTBEAT_TIMEOUT_MS: u64 = 200;

/// A TCP port currently free on both test addresses.
pub fn free_tcp_port() -> u16 {
    for _ in 0..32 {
        let probe = std::net::TcpListener::bind((IP_A, 0)).expect("bind probe listener");
        let port = probe.local_addr().expect("probe local_addr").port();
        if std::net::TcpListener::bind((IP_B, port)).is_ok() {
            return port;
        }
    }
    panic!("no TCP port free on both {IP_A} and {IP_B}");
}

/// A UDP port to use as this test's multicast group port.
pub fn free_udp_port() -> u16 {
    UdpSocket::bind((IP_A, 0))
        .and_then(|s| s.local_addr())
        .map(|a| a.port())
        .expect("bind probe udp socket")
}

pub fn group(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::new(239, 0, 0, 0), port)
}

/// Config for one loopback instance. `port` is both the listen port and the
/// port assumed for every discovered peer.
pub fn node_config(port: u16, group_port: u16) -> PulseConfig {
    let mut config = PulseConfig::default();
    config.network.listen_port = port;
    config.network.inbound_read_timeout_ms = 1000;
    config.discovery.multicast_addr = group(group_port).to_string();
    config.discovery.interface = IP_A.to_string();
    config.discovery.peer_port = port;
    config.discovery.announce_interval_ms = ANNOUNCE_MS;
    config.heartbeat.period_ms = HEARTBEAT_MS;
    config.heartbeat.timeout_ms = HEARTBEAT_TIMEOUT_MS;
    config
}

/// A running instance. Stops (and waits for `run()` to return) on `stop()`.
pub struct Node {
    pub app: Arc<App>,
    task: Option<JoinHandle<Result<()>>>,
}

impl Node {
    pub fn spawn(id: &str, ip: Ipv4Addr, config: PulseConfig) -> Self {
        let app = Arc::new(App::new(Identity::new(id, ip.into()), config));
        let task = {
            let app = app.clone();
            tokio::spawn(async move { app.run().await })
        };
        Self { app, task: Some(task) }
    }

    pub fn address(&self) -> pulse_services::PeerAddress {
        self.app.address().into()
    }

    pub fn knows(&self, peer: &Node) -> bool {
        self.app.registry().contains(&peer.address())
    }

    pub async fn stop(mut self) -> Result<()> {
        self.app.stop();
        let task = self.task.take().context("node already stopped")?;
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .context("node did not stop in time")??
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.app.stop();
    }
}

/// Poll `cond` every 20ms until it holds or `within` elapses.
pub async fn wait_until(within: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + within;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Whether a beacon sent from 127.0.0.2 reaches a group member on 127.0.0.1.
/// Tests call this and skip gracefully when it does not.
pub fn loopback_multicast_available() -> bool {
    probe_loopback_multicast().is_ok()
}

fn probe_loopback_multicast() -> Result<()> {
    let group = group(free_udp_port());

    let receiver: UdpSocket = make_listener_socket(group, IP_A)?;
    receiver.set_nonblocking(false)?;
    receiver.set_read_timeout(Some(Duration::from_millis(300)))?;

    let sender = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    sender.bind(&SocketAddrV4::new(IP_B, 0).into())?;
    sender.set_multicast_if_v4(&IP_A)?;
    sender.set_multicast_loop_v4(true)?;
    let sender: UdpSocket = sender.into();

    let mut buf = [0u8; 64];
    for _ in 0..3 {
        sender.send_to(SIGNATURE, SocketAddr::V4(group))?;
        if let Ok((len, _)) = receiver.recv_from(&mut buf) {
            if &buf[..len] == SIGNATURE {
                return Ok(());
            }
        }
    }
    anyhow::bail!("no multicast delivery on loopback")
}

/// Returns false (after printing why) if the environment cannot run
/// multi-instance tests.
pub fn skip_unless_ready() -> bool {
    if !loopback_multicast_available() {
        eprintln!("SKIP: loopback multicast not available in this environment");
        return false;
    }
    true
}
