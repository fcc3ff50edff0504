//! # In-Memory Transport
//!
//! Lossless, ordered delivery between endpoints sharing one [`MemoryHub`].
//! Joining completes as soon as a host listens on the named port, so a
//! single-threaded test can host, join and exchange messages without sockets.
//! The hub sits behind `Arc<Mutex<_>>`, so endpoints may also live on
//! different threads.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::error::{JoinFailure, TransportError, TransportResult};
use crate::nat::PortMapper;
use crate::peer::{NetUserId, PeerLinkState};
use crate::poll::retry_until;
use crate::queue::{DropReason, EventQueue, IncomingMessage, TransportEvent};
use crate::transport::{
    parse_bind_spec, parse_session_spec, HostOptions, JoinOptions, Role, Transport, TransportEvents,
};
use crate::MAX_PAYLOAD_SIZE;

type EndpointId = u64;

/// First port handed out for a `"0"` bind spec.
const EPHEMERAL_BASE: u16 = 49_152;

#[derive(Debug)]
enum Frame {
    Connected { user: NetUserId, from: EndpointId },
    Data { from: EndpointId, payload: Vec<u8> },
    Disconnected { from: EndpointId },
}

#[derive(Debug, Default)]
struct HubState {
    listeners: HashMap<u16, EndpointId>,
    next_user: HashMap<EndpointId, u32>,
    mailboxes: HashMap<EndpointId, VecDeque<Frame>>,
    next_endpoint: EndpointId,
}

impl HubState {
    fn open_endpoint(&mut self) -> EndpointId {
        self.next_endpoint += 1;
        self.mailboxes.insert(self.next_endpoint, VecDeque::new());
        self.next_endpoint
    }

    fn deliver(&mut self, to: EndpointId, frame: Frame) -> bool {
        match self.mailboxes.get_mut(&to) {
            Some(mailbox) => {
                mailbox.push_back(frame);
                true
            }
            None => false,
        }
    }
}

/// Shared medium connecting [`MemoryTransport`] endpoints.
#[derive(Clone, Debug, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while a host listens on `port`.
    #[must_use]
    pub fn is_listening(&self, port: u16) -> bool {
        self.inner.lock().listeners.contains_key(&port)
    }
}

#[derive(Clone, Copy, Debug)]
struct MemoryLink {
    endpoint: EndpointId,
    bytes_in: u64,
    bytes_out: u64,
}

/// In-process implementation of [`Transport`].
pub struct MemoryTransport {
    hub: MemoryHub,
    config: TransportConfig,
    endpoint: Option<EndpointId>,
    port: Option<u16>,
    role: Option<Role>,
    local_user: Option<NetUserId>,
    links: HashMap<NetUserId, MemoryLink>,
    by_endpoint: HashMap<EndpointId, NetUserId>,
    events: EventQueue,
    port_mapper: Option<Box<dyn PortMapper>>,
}

impl MemoryTransport {
    /// Creates an inactive endpoint on `hub`.
    ///
    /// # Errors
    ///
    /// [`TransportError::Init`] for an unusable configuration.
    pub fn init(hub: MemoryHub, config: TransportConfig) -> TransportResult<Self> {
        config.validate()?;
        Ok(Self {
            hub,
            config,
            endpoint: None,
            port: None,
            role: None,
            local_user: None,
            links: HashMap::new(),
            by_endpoint: HashMap::new(),
            events: EventQueue::default(),
            port_mapper: None,
        })
    }

    fn ensure_active(&self) -> TransportResult<EndpointId> {
        self.endpoint.ok_or(TransportError::NotActive)
    }

    fn pump(&mut self) -> TransportResult<()> {
        let me = self.ensure_active()?;
        let frames: Vec<Frame> = {
            let mut hub = self.hub.inner.lock();
            hub.mailboxes
                .get_mut(&me)
                .map(|mailbox| mailbox.drain(..).collect())
                .unwrap_or_default()
        };

        for frame in frames {
            match frame {
                Frame::Connected { user, from } => {
                    self.links.insert(
                        user,
                        MemoryLink { endpoint: from, bytes_in: 0, bytes_out: 0 },
                    );
                    self.by_endpoint.insert(from, user);
                    info!("{} connected", user);
                    self.events.push(TransportEvent::Connected(user));
                }
                Frame::Data { from, payload } => {
                    let Some(&user) = self.by_endpoint.get(&from) else {
                        continue;
                    };
                    if let Some(link) = self.links.get_mut(&user) {
                        link.bytes_in += payload.len() as u64;
                    }
                    self.events
                        .push(TransportEvent::Data(IncomingMessage { src: user, payload }));
                }
                Frame::Disconnected { from } => {
                    if let Some(user) = self.by_endpoint.remove(&from) {
                        self.links.remove(&user);
                        info!("{} disconnected", user);
                        self.events
                            .push(TransportEvent::Disconnected(user, DropReason::Disconnected));
                    }
                }
            }
        }
        Ok(())
    }

    fn deliver(&mut self, user: NetUserId, payload: &[u8]) -> TransportResult<()> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let me = self.ensure_active()?;
        let link = self
            .links
            .get_mut(&user)
            .ok_or(TransportError::UnknownPeer(user))?;
        link.bytes_out += payload.len() as u64;
        let frame = Frame::Data { from: me, payload: payload.to_vec() };
        if !self.hub.inner.lock().deliver(link.endpoint, frame) {
            debug!("{} is gone; message dropped", user);
        }
        Ok(())
    }

    fn disconnect_link(&mut self, user: NetUserId) {
        let Some(link) = self.links.remove(&user) else {
            return;
        };
        self.by_endpoint.remove(&link.endpoint);
        if let Some(me) = self.endpoint {
            self.hub
                .inner
                .lock()
                .deliver(link.endpoint, Frame::Disconnected { from: me });
        }
    }
}

impl Transport for MemoryTransport {
    fn host(&mut self, bind_spec: &str, options: HostOptions) -> TransportResult<u16> {
        if self.role.is_some() {
            self.exit();
        }
        let requested = parse_bind_spec(bind_spec);
        let (endpoint, port) = {
            let mut hub = self.hub.inner.lock();
            let port = if requested == 0 {
                (EPHEMERAL_BASE..=u16::MAX)
                    .find(|p| !hub.listeners.contains_key(p))
                    .unwrap_or(u16::MAX)
            } else {
                requested
            };
            if hub.listeners.contains_key(&port) {
                return Err(TransportError::Host {
                    bind: format!("memory:{port}"),
                    source: io::Error::from(io::ErrorKind::AddrInUse),
                });
            }
            let endpoint = hub.open_endpoint();
            hub.listeners.insert(port, endpoint);
            hub.next_user.insert(endpoint, 1);
            (endpoint, port)
        };

        self.endpoint = Some(endpoint);
        self.port = Some(port);
        self.role = Some(Role::Host);
        self.local_user = Some(NetUserId::HOST);
        info!("hosting on memory:{}", port);

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
        let (_, port) = parse_session_spec(session_spec).ok_or_else(|| fail(JoinFailure::Resolve))?;
        let timeout = options.timeout.unwrap_or_else(|| self.config.join_timeout());

        let hub = self.hub.clone();
        let joined = retry_until(timeout, self.config.poll_interval(), || {
            let mut state = hub.inner.lock();
            let Some(&host) = state.listeners.get(&port) else {
                return Ok::<_, TransportError>(None);
            };
            let me = state.open_endpoint();
            let user = state.next_user.get(&host).copied().unwrap_or(1);
            state.next_user.insert(host, user + 1);
            state.deliver(host, Frame::Connected { user: NetUserId(user), from: me });
            Ok(Some((me, host, NetUserId(user))))
        })?;

        let Some((me, host, user)) = joined else {
            warn!("nobody listens on memory:{}", port);
            return Err(fail(JoinFailure::TimedOut));
        };
        self.endpoint = Some(me);
        self.role = Some(Role::Client);
        self.local_user = Some(user);
        self.links.insert(
            NetUserId::HOST,
            MemoryLink { endpoint: host, bytes_in: 0, bytes_out: 0 },
        );
        self.by_endpoint.insert(host, NetUserId::HOST);
        self.events.push(TransportEvent::Connected(NetUserId::HOST));
        info!("joined memory:{} as {}", port, user);
        Ok(user)
    }

    fn update(&mut self, events: &mut dyn TransportEvents) -> TransportResult<usize> {
        self.pump()?;
        let dispatch = self
            .events
            .dispatch(events, self.config.max_events_per_update);
        for user in dispatch.rejected {
            self.disconnect_link(user);
            self.events.forget(user);
        }
        Ok(dispatch.processed)
    }

    fn send_single(&mut self, dest: NetUserId, bytes: &[u8], _reliable: bool) -> TransportResult<()> {
        self.deliver(dest, bytes)
    }

    fn send_all(&mut self, bytes: &[u8]) -> TransportResult<()> {
        self.ensure_active()?;
        let mut users: Vec<NetUserId> = self.links.keys().copied().collect();
        users.sort_unstable();
        users.into_iter().try_for_each(|user| self.deliver(user, bytes))
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
                None if !self.links.contains_key(&src) => Some(None),
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
        Ok(copied)
    }

    fn drop_user(&mut self, user: NetUserId) -> TransportResult<()> {
        if !self.links.contains_key(&user) {
            return Err(TransportError::UnknownPeer(user));
        }
        info!("dropping {}", user);
        self.disconnect_link(user);
        self.events
            .push(TransportEvent::Disconnected(user, DropReason::Kicked));
        Ok(())
    }

    fn exit(&mut self) {
        let Some(me) = self.endpoint else {
            return;
        };
        let users: Vec<NetUserId> = self.links.keys().copied().collect();
        for user in users {
            self.disconnect_link(user);
        }
        if let Some(mut mapper) = self.port_mapper.take() {
            mapper.remove_port_mapping();
        }
        {
            let mut hub = self.hub.inner.lock();
            hub.mailboxes.remove(&me);
            hub.next_user.remove(&me);
            if let Some(port) = self.port {
                hub.listeners.remove(&port);
            }
        }
        self.events.clear();
        self.endpoint = None;
        self.port = None;
        self.role = None;
        self.local_user = None;
        debug!("memory endpoint closed");
    }

    fn role(&self) -> Option<Role> {
        self.role
    }

    fn local_user(&self) -> Option<NetUserId> {
        self.local_user
    }

    fn peers(&self) -> Vec<NetUserId> {
        let mut users: Vec<NetUserId> = self.links.keys().copied().collect();
        users.sort_unstable();
        users
    }

    fn peer_link(&self, user: NetUserId) -> Option<PeerLinkState> {
        self.links.get(&user).map(|link| PeerLinkState {
            bytes_in: link.bytes_in,
            bytes_out: link.bytes_out,
            ..PeerLinkState::default()
        })
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.exit();
    }
}
