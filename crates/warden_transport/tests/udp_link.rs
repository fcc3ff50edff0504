//! Loopback tests for the UDP transport. The host runs on its own thread
//! because `join` blocks until the host answers.

use std::net::{Ipv4Addr, UdpSocket};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use warden_transport::{
    DropReason, HostOptions, JoinFailure, JoinOptions, NetUserId, Transport, TransportConfig,
    TransportError, TransportEvents, UdpTransport,
};

#[derive(Default)]
struct Recorder {
    accept: bool,
    joined: Vec<NetUserId>,
    dropped: Vec<(NetUserId, DropReason)>,
}

impl TransportEvents for Recorder {
    fn on_new_user(&mut self, user: NetUserId) -> Option<u8> {
        if !self.accept {
            return None;
        }
        self.joined.push(user);
        Some(self.joined.len() as u8)
    }

    fn on_drop(&mut self, user: NetUserId, reason: DropReason) {
        self.dropped.push((user, reason));
    }
}

fn localhost() -> HostOptions {
    HostOptions {
        bind_ip: Ipv4Addr::LOCALHOST.into(),
        ..HostOptions::default()
    }
}

/// Hosts on an ephemeral port and echoes every message until the first
/// peer leaves. Returns what the host observed.
fn spawn_echo_host(accept: bool) -> (u16, thread::JoinHandle<Recorder>) {
    let (port_tx, port_rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let mut host = UdpTransport::init(TransportConfig::default()).unwrap();
        port_tx.send(host.host("0", localhost()).unwrap()).unwrap();

        let mut events = Recorder { accept, ..Recorder::default() };
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut buffer = [0u8; 1200];
        while Instant::now() < deadline && events.dropped.is_empty() {
            host.update(&mut events).unwrap();
            for user in events.joined.clone() {
                while host.message_ready(user, Duration::ZERO).unwrap().is_some() {
                    let len = host.read_message(user, &mut buffer).unwrap();
                    host.send_single(user, &buffer[..len], true).unwrap();
                }
            }
            if !accept && Instant::now() + Duration::from_secs(4) > deadline {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        events
    });
    (port_rx.recv().unwrap(), handle)
}

#[test]
fn test_reliable_echo_and_telemetry() {
    let (port, host) = spawn_echo_host(true);

    let mut client = UdpTransport::init(TransportConfig::default()).unwrap();
    let user = client
        .join(&format!("127.0.0.1:{port}"), JoinOptions::default())
        .unwrap();
    assert_eq!(user, NetUserId(1));

    let mut events = Recorder { accept: true, ..Recorder::default() };
    client.update(&mut events).unwrap();
    assert_eq!(events.joined, vec![NetUserId::HOST]);

    client.send_single(NetUserId::HOST, b"tick-0", true).unwrap();
    let size = client
        .message_ready(NetUserId::HOST, Duration::from_secs(3))
        .unwrap();
    assert_eq!(size, Some(6));

    // Asking again neither consumes nor duplicates.
    for _ in 0..3 {
        assert_eq!(
            client.message_ready(NetUserId::HOST, Duration::ZERO).unwrap(),
            Some(6)
        );
    }

    let mut buffer = [0u8; 64];
    assert_eq!(client.read_message(NetUserId::HOST, &mut buffer).unwrap(), 6);
    assert_eq!(&buffer[..6], b"tick-0");

    let link = client.peer_link(NetUserId::HOST).unwrap();
    assert!(link.bytes_out > 0);
    assert!(link.bytes_in > 0);
    // The client's own link is the upstream link.
    assert_eq!(client.link_state(user), link);
    assert_eq!(client.ping(NetUserId(42)), 0);

    client.exit();
    let observed = host.join().unwrap();
    assert_eq!(observed.joined, vec![NetUserId(1)]);
    assert_eq!(observed.dropped, vec![(NetUserId(1), DropReason::Disconnected)]);
}

#[test]
fn test_join_silent_endpoint_times_out() {
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = silent.local_addr().unwrap().port();

    let mut client = UdpTransport::init(TransportConfig::default()).unwrap();
    let started = Instant::now();
    let err = client
        .join(
            &format!("127.0.0.1:{port}"),
            JoinOptions { timeout: Some(Duration::from_millis(300)) },
        )
        .unwrap_err();

    assert!(matches!(
        err,
        TransportError::Join { failure: JoinFailure::TimedOut, .. }
    ));
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(client.role().is_none());
}

#[test]
fn test_refused_peer_is_disconnected() {
    let (port, host) = spawn_echo_host(false);

    let mut client = UdpTransport::init(TransportConfig::default()).unwrap();
    client
        .join(&format!("127.0.0.1:{port}"), JoinOptions::default())
        .unwrap();

    let mut events = Recorder { accept: true, ..Recorder::default() };
    let deadline = Instant::now() + Duration::from_secs(3);
    while events.dropped.is_empty() && Instant::now() < deadline {
        client.update(&mut events).unwrap();
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(events.dropped, vec![(NetUserId::HOST, DropReason::Disconnected)]);
    assert!(client.peers().is_empty());

    let observed = host.join().unwrap();
    assert!(observed.joined.is_empty());
}
