//! # Transport Capability
//!
//! The session drives every transport through [`Transport`]. Two
//! implementations ship with the crate: [`crate::UdpTransport`] for real
//! networks and [`crate::MemoryTransport`] for in-process tests.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::error::TransportResult;
use crate::nat::PortMapper;
use crate::peer::{NetUserId, PeerLinkState};
use crate::queue::DropReason;
use crate::DEFAULT_PORT;

/// Which end of the star topology this endpoint is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Listening authority.
    Host,
    /// Connected to a host.
    Client,
}

/// Receives connection lifecycle events during [`Transport::update`].
pub trait TransportEvents {
    /// A peer connected. Returns the participant slot it maps to, or `None`
    /// to refuse it (the transport logs and disconnects refused peers).
    fn on_new_user(&mut self, user: NetUserId) -> Option<u8>;

    /// A peer is gone, for whatever reason.
    fn on_drop(&mut self, user: NetUserId, reason: DropReason);
}

/// Options for [`Transport::host`].
pub struct HostOptions {
    /// Local interface to bind.
    pub bind_ip: IpAddr,
    /// Best-effort external port mapping.
    pub port_mapper: Option<Box<dyn PortMapper>>,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port_mapper: None,
        }
    }
}

impl std::fmt::Debug for HostOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostOptions")
            .field("bind_ip", &self.bind_ip)
            .field("port_mapper", &self.port_mapper.as_ref().map(|m| m.name()))
            .finish()
    }
}

/// Options for [`Transport::join`].
#[derive(Clone, Copy, Debug, Default)]
pub struct JoinOptions {
    /// Overrides the configured join timeout.
    pub timeout: Option<Duration>,
}

/// Capability set every transport provides.
pub trait Transport {
    /// Opens a listening endpoint and returns the bound port.
    ///
    /// # Errors
    ///
    /// [`crate::TransportError::Host`] when the endpoint cannot be bound.
    fn host(&mut self, bind_spec: &str, options: HostOptions) -> TransportResult<u16>;

    /// Connects to `host[:port]`, blocking until acknowledged or timed out.
    /// Returns the user id assigned by the host.
    ///
    /// # Errors
    ///
    /// [`crate::TransportError::Join`] on resolution, bind or timeout failure.
    fn join(&mut self, session_spec: &str, options: JoinOptions) -> TransportResult<NetUserId>;

    /// Pumps the network and dispatches a bounded number of events.
    /// Returns the number of events dispatched.
    ///
    /// # Errors
    ///
    /// Socket failures while polling.
    fn update(&mut self, events: &mut dyn TransportEvents) -> TransportResult<usize>;

    /// Sends to one peer on the reliable or unreliable channel.
    ///
    /// # Errors
    ///
    /// Unknown peer, oversized payload, or socket failure.
    fn send_single(&mut self, dest: NetUserId, bytes: &[u8], reliable: bool) -> TransportResult<()>;

    /// Sends to every connected peer on the reliable channel.
    ///
    /// # Errors
    ///
    /// Oversized payload or socket failure.
    fn send_all(&mut self, bytes: &[u8]) -> TransportResult<()>;

    /// Size of the next queued message from `src`, waiting up to `timeout`
    /// when none is queued. Never consumes the message.
    ///
    /// # Errors
    ///
    /// Socket failures while polling.
    fn message_ready(&mut self, src: NetUserId, timeout: Duration) -> TransportResult<Option<usize>>;

    /// Copies the next message from `src` into `buffer` (truncating) and
    /// releases it. Waits up to the configured read timeout; returns 0 when
    /// nothing arrived.
    ///
    /// # Errors
    ///
    /// Socket failures while polling.
    fn read_message(&mut self, src: NetUserId, buffer: &mut [u8]) -> TransportResult<usize>;

    /// Disconnects a peer. The drop is reported by the next `update`.
    ///
    /// # Errors
    ///
    /// [`crate::TransportError::UnknownPeer`] when not connected.
    fn drop_user(&mut self, user: NetUserId) -> TransportResult<()>;

    /// Leaves the session and releases every resource.
    fn exit(&mut self);

    /// Current role, `None` before `host`/`join` and after `exit`.
    fn role(&self) -> Option<Role>;

    /// Our own user id while active.
    fn local_user(&self) -> Option<NetUserId>;

    /// Connected peers.
    fn peers(&self) -> Vec<NetUserId>;

    /// Link state of one connected peer.
    fn peer_link(&self, user: NetUserId) -> Option<PeerLinkState>;

    /// Link state used by the telemetry accessors.
    ///
    /// For the local user a client reports its upstream link and a host
    /// reports the per-metric maximum over all peers. Unknown users report
    /// all zeros.
    fn link_state(&self, user: NetUserId) -> PeerLinkState {
        if self.local_user() != Some(user) {
            return self.peer_link(user).unwrap_or_default();
        }
        match self.role() {
            Some(Role::Client) => self.peer_link(NetUserId::HOST).unwrap_or_default(),
            Some(Role::Host) => self
                .peers()
                .into_iter()
                .filter_map(|peer| self.peer_link(peer))
                .fold(PeerLinkState::default(), PeerLinkState::worst),
            None => PeerLinkState::default(),
        }
    }

    /// Round-trip time in milliseconds.
    fn ping(&self, user: NetUserId) -> u32 {
        self.link_state(user).rtt_ms
    }

    /// Round-trip variance in milliseconds.
    fn ping_variance(&self, user: NetUserId) -> u32 {
        self.link_state(user).rtt_variance_ms
    }

    /// Packet loss in percent.
    fn packet_loss(&self, user: NetUserId) -> u32 {
        self.link_state(user).packet_loss_percent
    }

    /// Unacknowledged reliable bytes.
    fn bytes_in_flight(&self, user: NetUserId) -> u32 {
        self.link_state(user).bytes_in_flight
    }

    /// Unacknowledged reliable datagrams.
    fn reliable_commands_pending(&self, user: NetUserId) -> u32 {
        self.link_state(user).reliable_pending
    }
}

/// Port named by a bind spec: all digits parse as a port, anything else
/// (empty included) means [`DEFAULT_PORT`].
#[must_use]
pub fn parse_bind_spec(spec: &str) -> u16 {
    let spec = spec.trim();
    if !spec.is_empty() && spec.bytes().all(|b| b.is_ascii_digit()) {
        spec.parse().unwrap_or(DEFAULT_PORT)
    } else {
        DEFAULT_PORT
    }
}

/// Splits `host[:port]` (or `[v6]:port`) into host and port.
///
/// Returns `None` for an empty host or an unparsable port.
#[must_use]
pub fn parse_session_spec(spec: &str) -> Option<(String, u16)> {
    let spec = spec.trim();
    if let Some(bracketed) = spec.strip_prefix('[') {
        let (host, rest) = bracketed.split_once(']')?;
        let port = match rest {
            "" => DEFAULT_PORT,
            _ => parse_port(rest.strip_prefix(':')?)?,
        };
        return (!host.is_empty()).then(|| (host.to_string(), port));
    }

    let (host, port) = match spec.matches(':').count() {
        1 => {
            let (host, port) = spec.split_once(':')?;
            (host, parse_port(port)?)
        }
        // Bare IPv6 address or plain host name.
        _ => (spec, DEFAULT_PORT),
    };
    (!host.is_empty()).then(|| (host.to_string(), port))
}

fn parse_port(text: &str) -> Option<u16> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}
