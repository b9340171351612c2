use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use pulse_core::wire::SIGNATURE;
use pulse_services::PeerAddress;
use socket2::{Domain, Protocol, Socket, Type};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Discovery and liveness across two instances
// ══════════════════════════════════════════════════════════════════════════════

/// Two instances discover each other, B leaves and is pruned by A, B comes
/// back and is rediscovered.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_discover_prune_rediscover() {
    if !skip_unless_ready() {
        return;
    }

    let port = free_tcp_port();
    let group_port = free_udp_port();

    let a = Node::spawn("node-a", IP_A, node_config(port, group_port));
    let b = Node::spawn("node-b", IP_B, node_config(port, group_port));

    assert!(
        wait_until(Duration::from_secs(5), || a.knows(&b) && b.knows(&a)).await,
        "instances did not discover each other"
    );

    // Registries hold exactly the other side, never themselves.
    assert_eq!(a.app.registry().len(), 1);
    assert_eq!(b.app.registry().len(), 1);
    assert!(!a.app.registry().contains(&a.address()));

    // Both stay registered across several heartbeat periods.
    tokio::time::sleep(Duration::from_millis(HEARTBEAT_MS * 3)).await;
    assert!(a.knows(&b), "live peer B was pruned");
    assert!(b.knows(&a), "live peer A was pruned");

    let b_addr = b.address();
    b.stop().await.expect("B stops cleanly");

    // One period to notice plus one timeout, with slack for scheduling.
    let prune_window = Duration::from_millis(HEARTBEAT_MS * 2 + HEARTBEAT_TIMEOUT_MS + 500);
    assert!(
        wait_until(prune_window, || !a.app.registry().contains(&b_addr)).await,
        "stopped peer was not pruned"
    );

    let b = Node::spawn("node-b-restarted", IP_B, node_config(port, group_port));
    assert!(
        wait_until(Duration::from_secs(5), || a.knows(&b) && b.knows(&a)).await,
        "restarted instance was not rediscovered"
    );

    b.stop().await.expect("B stops cleanly");
    a.stop().await.expect("A stops cleanly");
}

/// Datagrams that are not exactly the signature never register anyone.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_foreign_datagrams_are_ignored() {
    if !skip_unless_ready() {
        return;
    }

    let port = free_tcp_port();
    let group_port = free_udp_port();
    let a = Node::spawn("node-a", IP_A, node_config(port, group_port));

    // Let A join the group before sending.
    tokio::time::sleep(Duration::from_millis(ANNOUNCE_MS * 3)).await;

    let sender = multicast_sender(IP_B);
    let target = SocketAddr::V4(group(group_port));
    let payloads: [&[u8]; 4] = [
        b"hello\n",
        b"INSEcosystem_TestTask",
        b"INSEcosystem_TestTask\nextra",
        b"insecosystem_testtask\n",
    ];
    for _ in 0..3 {
        for payload in payloads {
            sender.send_to(payload, target).expect("send foreign datagram");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    tokio::time::sleep(Duration::from_millis(ANNOUNCE_MS * 3)).await;
    assert!(a.app.registry().is_empty(), "foreign datagram registered a peer");

    // The exact signature from the same source does register. Nothing
    // listens on that address, so the heartbeat keeps pruning it; keep
    // announcing until a poll sees it.
    let expected = PeerAddress::new(IP_B.into(), port);
    let registered = wait_until(Duration::from_secs(2), || {
        let _ = sender.send_to(SIGNATURE, target);
        a.app.registry().contains(&expected)
    })
    .await;
    assert!(registered, "valid beacon was not registered");

    a.stop().await.expect("A stops cleanly");
}

/// With port advertisement on, two instances sharing one IP find each other.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_advertised_ports_share_one_host() {
    if !skip_unless_ready() {
        return;
    }

    let group_port = free_udp_port();
    let port_a = free_tcp_port();
    let port_b = std::iter::repeat_with(free_tcp_port)
        .find(|p| *p != port_a)
        .expect("second free port");

    let node = |id: &str, port: u16| {
        let mut config = node_config(port, group_port);
        config.discovery.advertise_port = true;
        Node::spawn(id, IP_A, config)
    };
    let a = node("node-a", port_a);
    let b = node("node-b", port_b);

    assert!(
        wait_until(Duration::from_secs(5), || a.knows(&b) && b.knows(&a)).await,
        "same-host instances did not discover each other"
    );
    assert_eq!(a.app.registry().len(), 1);
    assert_eq!(b.app.registry().len(), 1);

    b.stop().await.expect("B stops cleanly");
    a.stop().await.expect("A stops cleanly");
}

fn multicast_sender(source: std::net::Ipv4Addr) -> UdpSocket {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
    socket.bind(&SocketAddrV4::new(source, 0).into()).unwrap();
    socket.set_multicast_if_v4(&IP_A).unwrap();
    socket.set_multicast_loop_v4(true).unwrap();
    socket.into()
}
