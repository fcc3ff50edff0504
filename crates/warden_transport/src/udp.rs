//! # UDP Transport
//!
//! Connection-oriented datagrams over a single non-blocking `UdpSocket`.
//!
//! ## Handshake
//!
//! ```text
//! client                                   host
//!   │ ── Connect(token) ──────────────────▶ │  allocate NetUserId, queue Connected
//!   │ ◀───────────────── ConnectAck(id) ── │
//!   │ ── Reliable(seq) / Unreliable(seq) ─▶ │
//!   │ ◀─────────────────────── Ack(seq) ── │
//!   │ ◀──── Ping(stamp) / Pong(stamp) ───▶ │
//!   │ ── Disconnect ──────────────────────▶ │  queue Disconnected
//! ```
//!
//! The client retransmits `Connect` until acknowledged; the host answers every
//! retransmission with the same `ConnectAck`. Nothing runs in the background:
//! the socket is only read inside `update`, `message_ready` and
//! `read_message`.

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, warn};

use crate::config::TransportConfig;
use crate::error::{JoinFailure, TransportError, TransportResult};
use crate::nat::PortMapper;
use crate::packet::{self, sequence_greater_than, DatagramHeader, PacketKind};
use crate::peer::{NetUserId, Peer, PeerLinkState};
use crate::poll::retry_until;
use crate::queue::{DropReason, EventQueue, IncomingMessage, TransportEvent};
use crate::transport::{
    parse_bind_spec, parse_session_spec, HostOptions, JoinOptions, Role, Transport, TransportEvents,
};
use crate::{MAX_PACKET_SIZE, MAX_PAYLOAD_SIZE};

/// Datagrams read per pump at most.
const MAX_DATAGRAMS_PER_PUMP: usize = 4096;

/// Socket-level statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransportStats {
    /// Datagrams sent.
    pub packets_sent: u64,
    /// Datagrams received.
    pub packets_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Send errors.
    pub send_errors: u64,
    /// Receive errors.
    pub recv_errors: u64,
    /// Datagrams that failed to decode.
    pub malformed: u64,
}

/// UDP implementation of [`Transport`].
///
/// One value is one transport context: created by [`UdpTransport::init`],
/// activated by `host` or `join`, released by `exit` (or drop).
pub struct UdpTransport {
    config: TransportConfig,
    socket: Option<UdpSocket>,
    role: Option<Role>,
    local_user: Option<NetUserId>,
    peers: HashMap<NetUserId, Peer>,
    by_addr: HashMap<SocketAddr, NetUserId>,
    next_user: u32,
    events: EventQueue,
    port_mapper: Option<Box<dyn PortMapper>>,
    recv_buffer: [u8; MAX_PACKET_SIZE],
    epoch: Instant,
    stats: TransportStats,
}

impl UdpTransport {
    /// Creates an inactive transport.
    ///
    /// # Errors
    ///
    /// [`TransportError::Init`] for an unusable configuration.
    pub fn init(config: TransportConfig) -> TransportResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            socket: None,
            role: None,
            local_user: None,
            peers: HashMap::new(),
            by_addr: HashMap::new(),
            next_user: 1,
            events: EventQueue::default(),
            port_mapper: None,
            recv_buffer: [0u8; MAX_PACKET_SIZE],
            epoch: Instant::now(),
            stats: TransportStats::default(),
        })
    }

    /// Local socket address while active.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Socket statistics.
    #[must_use]
    pub const fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn now_ms(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }

    fn ensure_active(&self) -> TransportResult<()> {
        if self.socket.is_some() {
            Ok(())
        } else {
            Err(TransportError::NotActive)
        }
    }

    /// Reads every waiting datagram, then runs retransmission, keepalive and
    /// timeout checks.
    fn pump(&mut self) -> TransportResult<()> {
        for _ in 0..MAX_DATAGRAMS_PER_PUMP {
            let received = match self.socket.as_ref() {
                Some(socket) => socket.recv_from(&mut self.recv_buffer),
                None => return Err(TransportError::NotActive),
            };
            match received {
                Ok((len, from)) => {
                    self.stats.packets_received += 1;
                    self.stats.bytes_received += len as u64;
                    let datagram = self.recv_buffer[..len].to_vec();
                    self.handle_datagram(&datagram, from)?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP unreachable from a departed peer; its timeout handles it.
                Err(e) if is_transient(&e) => self.stats.recv_errors += 1,
                Err(e) => {
                    self.stats.recv_errors += 1;
                    error!("poll on {:?} failed: {}", self.local_addr(), e);
                    return Err(TransportError::io("poll", e));
                }
            }
        }
        self.service_timers(Instant::now())
    }

    fn handle_datagram(&mut self, datagram: &[u8], from: SocketAddr) -> TransportResult<()> {
        let Some((header, payload)) = packet::decode(datagram) else {
            self.stats.malformed += 1;
            return Ok(());
        };
        let Some(kind) = header.packet_kind() else {
            return Ok(());
        };
        if kind == PacketKind::Connect {
            return self.handle_connect(header, from);
        }

        let Some(&user) = self.by_addr.get(&from) else {
            debug!("stray {:?} datagram from {}", kind, from);
            return Ok(());
        };
        let now = Instant::now();
        let now_ms = self.now_ms();
        let Some(peer) = self.peers.get_mut(&user) else {
            return Ok(());
        };
        if header.token != peer.token {
            return Ok(());
        }
        peer.last_recv = now;
        peer.link.bytes_in += datagram.len() as u64;

        match kind {
            PacketKind::Connect | PacketKind::ConnectAck => {}
            PacketKind::Disconnect => {
                info!("{} disconnected", user);
                self.remove_peer(user);
                self.events
                    .push(TransportEvent::Disconnected(user, DropReason::Disconnected));
            }
            PacketKind::Reliable => {
                let ack = packet::encode(
                    &DatagramHeader::new(PacketKind::Ack, header.sequence, peer.token, 0),
                    &[],
                );
                peer.link.bytes_out += ack.len() as u64;
                send_datagram(self.socket.as_ref(), &mut self.stats, &ack, peer.addr)?;
                for payload in peer.reliable.receive(header.sequence, payload) {
                    self.events
                        .push(TransportEvent::Data(IncomingMessage { src: user, payload }));
                }
            }
            PacketKind::Unreliable => {
                let newer = peer
                    .unreliable_recv
                    .map_or(true, |last| sequence_greater_than(header.sequence, last));
                if newer {
                    peer.unreliable_recv = Some(header.sequence);
                    self.events.push(TransportEvent::Data(IncomingMessage {
                        src: user,
                        payload: payload.to_vec(),
                    }));
                }
            }
            PacketKind::Ack => {
                if let Some(sample) = peer.reliable.acknowledge(header.sequence, now) {
                    peer.link.record_rtt(sample);
                }
            }
            PacketKind::Ping => {
                let pong = packet::encode(
                    &DatagramHeader::new(PacketKind::Pong, 0, peer.token, header.stamp),
                    &[],
                );
                peer.link.bytes_out += pong.len() as u64;
                send_datagram(self.socket.as_ref(), &mut self.stats, &pong, peer.addr)?;
            }
            PacketKind::Pong => {
                let rtt = now_ms.wrapping_sub(header.stamp);
                peer.link.record_rtt(Duration::from_millis(u64::from(rtt)));
            }
        }
        Ok(())
    }

    fn handle_connect(&mut self, header: DatagramHeader, from: SocketAddr) -> TransportResult<()> {
        if self.role != Some(Role::Host) {
            debug!("ignoring connect from {} while not hosting", from);
            return Ok(());
        }

        if let Some(&user) = self.by_addr.get(&from) {
            let same_connection = self.peers.get(&user).is_some_and(|p| p.token == header.token);
            if same_connection {
                // Our ack was lost; answer the retransmission.
                return self.send_connect_ack(user);
            }
            info!("{} reconnected from {}, replacing old link", user, from);
            self.remove_peer(user);
            self.events
                .push(TransportEvent::Disconnected(user, DropReason::TimedOut));
        }

        if self.peers.len() >= self.config.max_peers {
            warn!("refusing {}: {} peers already connected", from, self.peers.len());
            let refusal = packet::encode(
                &DatagramHeader::new(PacketKind::Disconnect, 0, header.token, 0),
                &[],
            );
            return send_datagram(self.socket.as_ref(), &mut self.stats, &refusal, from);
        }

        let user = NetUserId(self.next_user);
        self.next_user += 1;
        self.peers
            .insert(user, Peer::new(user, from, header.token, Instant::now()));
        self.by_addr.insert(from, user);
        info!("{} connecting from {}", user, from);
        self.events.push(TransportEvent::Connected(user));
        self.send_connect_ack(user)
    }

    fn send_connect_ack(&mut self, user: NetUserId) -> TransportResult<()> {
        let Some(peer) = self.peers.get_mut(&user) else {
            return Ok(());
        };
        let ack = packet::encode(
            &DatagramHeader::new(PacketKind::ConnectAck, 0, peer.token, 0),
            &user.0.to_le_bytes(),
        );
        peer.link.bytes_out += ack.len() as u64;
        send_datagram(self.socket.as_ref(), &mut self.stats, &ack, peer.addr)
    }

    fn service_timers(&mut self, now: Instant) -> TransportResult<()> {
        let now_ms = self.now_ms();
        let mut gone = Vec::new();

        for (&user, peer) in &mut self.peers {
            if peer.is_silent(now, self.config.peer_timeout())
                || peer.reliable.exhausted(self.config.max_resends)
            {
                gone.push(user);
                continue;
            }
            peer.link.roll_window(now, self.config.loss_window());

            let timeout = peer.link.retransmit_timeout(self.config.resend_timeout());
            for datagram in peer.reliable.due_resends(now, timeout) {
                peer.link.record_lost();
                peer.link.bytes_out += datagram.len() as u64;
                send_datagram(self.socket.as_ref(), &mut self.stats, &datagram, peer.addr)?;
            }

            if now.duration_since(peer.last_ping) >= self.config.ping_interval() {
                let ping = packet::encode(
                    &DatagramHeader::new(PacketKind::Ping, 0, peer.token, now_ms),
                    &[],
                );
                peer.last_ping = now;
                peer.link.bytes_out += ping.len() as u64;
                send_datagram(self.socket.as_ref(), &mut self.stats, &ping, peer.addr)?;
            }
        }

        for user in gone {
            warn!("{} timed out", user);
            self.remove_peer(user);
            self.events
                .push(TransportEvent::Disconnected(user, DropReason::TimedOut));
        }
        Ok(())
    }

    fn send_to_peer(&mut self, user: NetUserId, bytes: &[u8], reliable: bool) -> TransportResult<()> {
        if bytes.len() > MAX_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge {
                len: bytes.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        self.ensure_active()?;
        let peer = self
            .peers
            .get_mut(&user)
            .ok_or(TransportError::UnknownPeer(user))?;

        let token = peer.token;
        let datagram = if reliable {
            peer.link.record_sent();
            peer.reliable.send(Instant::now(), |sequence| {
                packet::encode(&DatagramHeader::new(PacketKind::Reliable, sequence, token, 0), bytes)
            })
        } else {
            let sequence = peer.unreliable_send;
            peer.unreliable_send = sequence.wrapping_add(1);
            packet::encode(&DatagramHeader::new(PacketKind::Unreliable, sequence, token, 0), bytes)
        };
        peer.link.bytes_out += datagram.len() as u64;

        send_datagram(self.socket.as_ref(), &mut self.stats, &datagram, peer.addr).map_err(|e| {
            error!("send to {} failed: {}", user, e);
            e
        })
    }

    /// Removes a peer and tells it so, best effort.
    fn disconnect_peer(&mut self, user: NetUserId) {
        if let Some(peer) = self.peers.get(&user) {
            let bye = packet::encode(
                &DatagramHeader::new(PacketKind::Disconnect, 0, peer.token, 0),
                &[],
            );
            if let Err(e) = send_datagram(self.socket.as_ref(), &mut self.stats, &bye, peer.addr) {
                debug!("disconnect notice to {} failed: {}", user, e);
            }
        }
        self.remove_peer(user);
    }

    fn remove_peer(&mut self, user: NetUserId) {
        if let Some(peer) = self.peers.remove(&user) {
            self.by_addr.remove(&peer.addr);
        }
    }
}

impl Transport for UdpTransport {
    fn host(&mut self, bind_spec: &str, options: HostOptions) -> TransportResult<u16> {
        if self.role.is_some() {
            self.exit();
        }
        let addr = SocketAddr::new(options.bind_ip, parse_bind_spec(bind_spec));
        let host_error = |source: io::Error| TransportError::Host {
            bind: addr.to_string(),
            source,
        };

        let socket = UdpSocket::bind(addr).map_err(host_error)?;
        socket.set_nonblocking(true).map_err(host_error)?;
        let port = socket.local_addr().map_err(host_error)?.port();

        self.socket = Some(socket);
        self.role = Some(Role::Host);
        self.local_user = Some(NetUserId::HOST);
        self.next_user = 1;
        info!("hosting on {}:{}", addr.ip(), port);

        if let Some(mut mapper) = options.port_mapper {
            if !mapper.add_port_mapping(port) {
                warn!("no external mapping for port {} via {}; hosting continues", port, mapper.name());
            }
            self.port_mapper = Some(mapper);
        }
        Ok(port)
    }

    fn join(&mut self, session_spec: &str, options: JoinOptions) -> TransportResult<NetUserId> {
        if self.role.is_some() {
            self.exit();
        }
        let fail = |failure| TransportError::Join {
            spec: session_spec.to_string(),
            failure,
        };

        let (host, port) = parse_session_spec(session_spec).ok_or_else(|| fail(JoinFailure::Resolve))?;
        let remote = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|_| fail(JoinFailure::Resolve))?
            .next()
            .ok_or_else(|| fail(JoinFailure::Resolve))?;

        let local: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).map_err(|_| fail(JoinFailure::Bind))?;
        socket
            .set_nonblocking(true)
            .map_err(|_| fail(JoinFailure::Bind))?;

        let token = connection_token();
        let connect = packet::encode(&DatagramHeader::new(PacketKind::Connect, 0, token, 0), &[]);
        let retry = self.config.connect_retry();
        let timeout = options.timeout.unwrap_or_else(|| self.config.join_timeout());
        let mut buffer = [0u8; MAX_PACKET_SIZE];
        let mut last_sent: Option<Instant> = None;

        debug!("joining {} (token {:#010x})", remote, token);
        let answer = retry_until(timeout, self.config.poll_interval(), || {
            if last_sent.map_or(true, |sent| sent.elapsed() >= retry) {
                // Send failures (unreachable network) are retried until timeout.
                if let Err(e) = socket.send_to(&connect, remote) {
                    debug!("connect to {} not sent: {}", remote, e);
                }
                last_sent = Some(Instant::now());
            }
            Ok::<_, TransportError>(read_connect_answer(&socket, &mut buffer, remote, token))
        })?;

        match answer {
            Some(Ok(user)) => {
                let now = Instant::now();
                self.peers
                    .insert(NetUserId::HOST, Peer::new(NetUserId::HOST, remote, token, now));
                self.by_addr.insert(remote, NetUserId::HOST);
                self.socket = Some(socket);
                self.role = Some(Role::Client);
                self.local_user = Some(user);
                self.events.push(TransportEvent::Connected(NetUserId::HOST));
                info!("joined {} as {}", remote, user);
                Ok(user)
            }
            Some(Err(failure)) => Err(fail(failure)),
            None => {
                warn!("no answer from {} within {:?}", remote, timeout);
                Err(fail(JoinFailure::TimedOut))
            }
        }
    }

    fn update(&mut self, events: &mut dyn TransportEvents) -> TransportResult<usize> {
        self.pump()?;
        let dispatch = self
            .events
            .dispatch(events, self.config.max_events_per_update);
        for user in dispatch.rejected {
            self.disconnect_peer(user);
            self.events.forget(user);
        }
        Ok(dispatch.processed)
    }

    fn send_single(&mut self, dest: NetUserId, bytes: &[u8], reliable: bool) -> TransportResult<()> {
        self.send_to_peer(dest, bytes, reliable)?;
        self.service_timers(Instant::now())
    }

    fn send_all(&mut self, bytes: &[u8]) -> TransportResult<()> {
        self.ensure_active()?;
        let mut users: Vec<NetUserId> = self.peers.keys().copied().collect();
        users.sort_unstable();
        for user in users {
            self.send_to_peer(user, bytes, true)?;
        }
        self.service_timers(Instant::now())
    }

    fn message_ready(&mut self, src: NetUserId, timeout: Duration) -> TransportResult<Option<usize>> {
        self.ensure_active()?;
        if let Some(size) = self.events.inbox().peek_size(src) {
            return Ok(Some(size));
        }
        let ready = retry_until(timeout, self.config.poll_interval(), || {
            self.pump()?;
            self.events.promote_data();
            Ok::<_, TransportError>(match self.events.inbox().peek_size(src) {
                Some(size) => Some(Some(size)),
                None if !self.peers.contains_key(&src) => Some(None),
                None => None,
            })
        })?;
        Ok(ready.flatten())
    }

    fn read_message(&mut self, src: NetUserId, buffer: &mut [u8]) -> TransportResult<usize> {
        if self.message_ready(src, self.config.read_timeout())?.is_none() {
            return Ok(0);
        }
        let Some(message) = self.events.inbox_mut().take(src) else {
            return Ok(0);
        };
        let copied = message.payload.len().min(buffer.len());
        buffer[..copied].copy_from_slice(&message.payload[..copied]);
        if copied < message.payload.len() {
            debug!(
                "message from {} truncated from {} to {} bytes",
                src,
                message.payload.len(),
                copied
            );
        }
        Ok(copied)
    }

    fn drop_user(&mut self, user: NetUserId) -> TransportResult<()> {
        if !self.peers.contains_key(&user) {
            return Err(TransportError::UnknownPeer(user));
        }
        info!("dropping {}", user);
        self.disconnect_peer(user);
        self.events
            .push(TransportEvent::Disconnected(user, DropReason::Kicked));
        Ok(())
    }

    fn exit(&mut self) {
        if self.socket.is_none() {
            return;
        }
        let users: Vec<NetUserId> = self.peers.keys().copied().collect();
        for user in users {
            self.disconnect_peer(user);
        }
        if let Some(mut mapper) = self.port_mapper.take() {
            mapper.remove_port_mapping();
        }
        self.events.clear();
        self.by_addr.clear();
        self.socket = None;
        self.role = None;
        self.local_user = None;
        info!("transport closed");
    }

    fn role(&self) -> Option<Role> {
        self.role
    }

    fn local_user(&self) -> Option<NetUserId> {
        self.local_user
    }

    fn peers(&self) -> Vec<NetUserId> {
        let mut users: Vec<NetUserId> = self.peers.keys().copied().collect();
        users.sort_unstable();
        users
    }

    fn peer_link(&self, user: NetUserId) -> Option<PeerLinkState> {
        self.peers.get(&user).map(Peer::link_state)
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.exit();
    }
}

/// Sends one datagram. A full socket buffer counts as loss, not failure.
fn send_datagram(
    socket: Option<&UdpSocket>,
    stats: &mut TransportStats,
    datagram: &[u8],
    addr: SocketAddr,
) -> TransportResult<()> {
    let socket = socket.ok_or(TransportError::NotActive)?;
    match socket.send_to(datagram, addr) {
        Ok(sent) => {
            stats.packets_sent += 1;
            stats.bytes_sent += sent as u64;
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock || is_transient(&e) => {
            stats.send_errors += 1;
            Ok(())
        }
        Err(e) => {
            stats.send_errors += 1;
            Err(TransportError::io("send", e))
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused | io::ErrorKind::Interrupted
    )
}

/// Drains the joining socket looking for the host's answer to our token.
fn read_connect_answer(
    socket: &UdpSocket,
    buffer: &mut [u8],
    remote: SocketAddr,
    token: u32,
) -> Option<Result<NetUserId, JoinFailure>> {
    loop {
        let (len, from) = socket.recv_from(buffer).ok()?;
        if from != remote {
            continue;
        }
        let Some((header, payload)) = packet::decode(&buffer[..len]) else {
            continue;
        };
        if header.token != token {
            continue;
        }
        match header.packet_kind() {
            Some(PacketKind::ConnectAck) if payload.len() >= 4 => {
                let id = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
                return Some(Ok(NetUserId(id)));
            }
            Some(PacketKind::Disconnect) => return Some(Err(JoinFailure::Refused)),
            _ => {}
        }
    }
}

/// Token identifying one connection attempt; never zero.
fn connection_token() -> u32 {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.subsec_nanos());
    let salt = COUNTER.fetch_add(1, Ordering::Relaxed).wrapping_mul(0x9E37_79B9);
    (nanos ^ std::process::id().rotate_left(16) ^ salt).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_rejects_bad_config() {
        let config = TransportConfig {
            peer_timeout_ms: 0,
            ..TransportConfig::default()
        };
        assert!(matches!(
            UdpTransport::init(config),
            Err(TransportError::Init { .. })
        ));
    }

    #[test]
    fn test_inactive_transport_refuses_io() {
        let mut transport = UdpTransport::init(TransportConfig::default()).unwrap();
        assert!(matches!(
            transport.send_all(b"x"),
            Err(TransportError::NotActive)
        ));
        assert!(matches!(
            transport.message_ready(NetUserId(1), Duration::ZERO),
            Err(TransportError::NotActive)
        ));
        assert_eq!(transport.ping(NetUserId(1)), 0);
    }

    #[test]
    fn test_host_on_ephemeral_port() {
        let mut transport = UdpTransport::init(TransportConfig::default()).unwrap();
        let options = HostOptions {
            bind_ip: Ipv4Addr::LOCALHOST.into(),
            ..HostOptions::default()
        };
        let port = transport.host("0", options).unwrap();
        assert_ne!(port, 0);
        assert_eq!(transport.role(), Some(Role::Host));
        assert_eq!(transport.local_user(), Some(NetUserId::HOST));

        // No peers: host link reports zeros.
        assert_eq!(transport.ping(NetUserId::HOST), 0);
        assert_eq!(transport.reliable_commands_pending(NetUserId(9)), 0);

        transport.exit();
        assert_eq!(transport.role(), None);
        assert!(matches!(
            transport.send_all(b"after exit"),
            Err(TransportError::NotActive)
        ));
    }

    #[test]
    fn test_host_bind_conflict() {
        let taken = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let mut transport = UdpTransport::init(TransportConfig::default()).unwrap();
        let options = HostOptions {
            bind_ip: Ipv4Addr::LOCALHOST.into(),
            ..HostOptions::default()
        };
        let err = transport.host(&port.to_string(), options).unwrap_err();
        assert!(matches!(err, TransportError::Host { .. }));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut transport = UdpTransport::init(TransportConfig::default()).unwrap();
        let err = transport
            .send_single(NetUserId(1), &[0u8; MAX_PAYLOAD_SIZE + 1], true)
            .unwrap_err();
        assert!(matches!(err, TransportError::PayloadTooLarge { .. }));
    }

    #[test]
    fn test_unresolvable_join() {
        let mut transport = UdpTransport::init(TransportConfig::default()).unwrap();
        let err = transport.join("host:notaport", JoinOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Join { failure: JoinFailure::Resolve, .. }
        ));
    }

    #[test]
    fn test_tokens_are_nonzero_and_vary() {
        let a = connection_token();
        let b = connection_token();
        assert_ne!(a, 0);
        assert_ne!(a, b);
    }
}
