//! # Session
//!
//! The one object the simulation holds. It owns the transport, the turn
//! exchange, the desync detector and at most one turn file.
//!
//! ```text
//!   new ─▶ begin_session ─▶ exchange(0) ─▶ exchange(1) ─▶ ... ─▶ end_session
//!              │                 │
//!              │                 ├─ DesyncDetector::check
//!              │                 └─ TurnWriter::append   (recording)
//!              │
//!   new ─▶ load_turn_file ─▶ exchange(n) reads turn n     (replaying)
//! ```
//!
//! Recording and replaying are mutually exclusive for one session. A failed
//! exchange, or a tick that was exchanged but could not be recorded, ends the
//! session before the error is returned.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info, warn};
use warden_lockstep::{
    DesyncDetector, DesyncReport, Exchange, ExchangeState, ParticipantSlot, Record, RecordSet,
    ScreenPacket, SlotMask,
};
use warden_replay::{TurnFileHeader, TurnReader, TurnWriter};
use warden_transport::{
    HostOptions, JoinOptions, NatPmpMapper, PeerLinkState, PortMapper, Role, Transport,
};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};

/// Per-session options for [`Session::begin_session`].
#[derive(Default)]
pub struct SessionOptions {
    /// Local interface to bind when hosting; all interfaces when `None`.
    pub bind_ip: Option<IpAddr>,
    /// Port mapper used when hosting. Falls back to the configured NAT-PMP
    /// gateway, then to no mapping.
    pub port_mapper: Option<Box<dyn PortMapper>>,
    /// Overrides the configured join timeout.
    pub join_timeout: Option<Duration>,
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("bind_ip", &self.bind_ip)
            .field("port_mapper", &self.port_mapper.as_ref().map(|m| m.name()))
            .field("join_timeout", &self.join_timeout)
            .finish()
    }
}

/// Result of one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickOutcome {
    /// Tick this outcome belongs to.
    pub tick: u32,
    /// The agreed record set.
    pub set: RecordSet,
    /// Desync verdict for this tick.
    pub report: DesyncReport,
    /// Human slots whose records are in the set.
    pub contributors: SlotMask,
    /// Slots run by the computer.
    pub computer: SlotMask,
    /// Slots whose participant left during this tick.
    pub relinquished: SlotMask,
    /// How the exchange ended.
    pub state: ExchangeState,
    /// Read back from a turn file instead of exchanged.
    pub replayed: bool,
}

#[derive(Debug)]
enum TurnLog {
    Off,
    /// Recording requested; the file is created on the first tick so the
    /// header can carry that tick's slot masks.
    Pending {
        path: PathBuf,
        verify_checksums: bool,
    },
    Recording(TurnWriter),
    Replaying(TurnReader),
}

/// A lockstep session over transport `T`.
pub struct Session<T: Transport> {
    transport: T,
    config: SessionConfig,
    exchange: Option<Exchange>,
    detector: DesyncDetector,
    log: TurnLog,
}

impl<T: Transport> Session<T> {
    /// Wraps an initialized transport. Nothing is opened until
    /// [`Session::begin_session`] or [`Session::load_turn_file`].
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let log = match &config.persistence.path {
            Some(path) => TurnLog::Pending {
                path: path.clone(),
                verify_checksums: config.persistence.verify_checksums,
            },
            None => TurnLog::Off,
        };
        Self {
            transport,
            config,
            exchange: None,
            detector: DesyncDetector::new(),
            log,
        }
    }

    /// Hosts on `spec` (a port) or joins `spec` (`host[:port]`). Returns the
    /// local participant slot.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyStarted`] when a session is running
    /// - [`SessionError::PersistenceConflict`] when a turn file is loaded
    /// - [`SessionError::Transport`] when hosting or joining fails
    /// - [`SessionError::Lockstep`] when the host never assigns a slot
    pub fn begin_session(
        &mut self,
        role: Role,
        spec: &str,
        options: SessionOptions,
    ) -> SessionResult<ParticipantSlot> {
        if self.exchange.is_some() {
            return Err(SessionError::AlreadyStarted);
        }
        if matches!(self.log, TurnLog::Replaying(_)) {
            return Err(SessionError::PersistenceConflict("a turn file is loaded for replay"));
        }

        match role {
            Role::Host => {
                let port_mapper = options.port_mapper.or_else(|| self.gateway_mapper());
                let mut host_options = HostOptions {
                    port_mapper,
                    ..HostOptions::default()
                };
                if let Some(ip) = options.bind_ip {
                    host_options.bind_ip = ip;
                }
                let port = self.transport.host(spec, host_options)?;
                self.exchange = Some(Exchange::host(
                    self.config.exchange.clone(),
                    self.config.session_level_id,
                ));
                info!("hosting level {} on port {}", self.config.session_level_id, port);
                Ok(ParticipantSlot::HOST)
            }
            Role::Client => {
                let user = self.transport.join(
                    spec,
                    JoinOptions {
                        timeout: options.join_timeout,
                    },
                )?;
                let mut exchange = Exchange::client(self.config.exchange.clone());
                let slot = match exchange.await_welcome(&mut self.transport) {
                    Ok(slot) => slot,
                    Err(e) => {
                        error!("no slot assignment from {}: {}", spec, e);
                        self.transport.exit();
                        return Err(e.into());
                    }
                };
                info!(
                    "joined {} as {} in {} (level {})",
                    spec,
                    user,
                    slot,
                    exchange.session_level_id()
                );
                self.exchange = Some(exchange);
                Ok(slot)
            }
        }
    }

    /// Host: waits until `count` human slots are taken or `timeout` passes.
    /// Returns how many are present.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotStarted`] or transport failures.
    pub fn wait_for_participants(&mut self, count: usize, timeout: Duration) -> SessionResult<usize> {
        let exchange = self.exchange.as_mut().ok_or(SessionError::NotStarted)?;
        Ok(exchange.wait_for_participants(&mut self.transport, count, timeout)?)
    }

    /// Services joins, drops and screen packets between ticks.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotStarted`] or transport failures.
    pub fn poll_lobby(&mut self) -> SessionResult<()> {
        let exchange = self.exchange.as_mut().ok_or(SessionError::NotStarted)?;
        Ok(exchange.poll_lobby(&mut self.transport)?)
    }

    /// Runs tick `tick` with the local `record`.
    ///
    /// Live: exchanges over the network, checks the agreed set for desync
    /// and appends it to the turn file when recording. Replaying: reads the
    /// recorded set for `tick` and holds `record.checksum` against it.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Lockstep`] when the exchange fails; the session has
    ///   been ended
    /// - [`SessionError::TurnFile`] when the turn cannot be read, or cannot
    ///   be written after every peer already has it; the session has been
    ///   ended
    /// - [`SessionError::ReplayFinished`] past the last recorded turn
    /// - [`SessionError::NotStarted`] with neither a session nor a replay
    pub fn exchange(&mut self, tick: u32, record: Record) -> SessionResult<TickOutcome> {
        if let TurnLog::Replaying(reader) = &mut self.log {
            return replay_turn(reader, &mut self.detector, tick, record);
        }

        let exchange = self.exchange.as_mut().ok_or(SessionError::NotStarted)?;
        let outcome = match exchange.exchange(&mut self.transport, tick, record) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("tick {} failed, ending session: {}", tick, e);
                self.teardown();
                return Err(e.into());
            }
        };
        let spectators = exchange.slots().spectators();
        let report = self.detector.check(tick, &outcome.set, outcome.contributors);

        if let Err(e) = self.record_turn(&outcome.set, outcome.contributors, spectators) {
            error!("cannot record tick {}, ending session: {}", tick, e);
            self.teardown();
            return Err(e);
        }

        Ok(TickOutcome {
            tick,
            set: outcome.set,
            report,
            contributors: outcome.contributors,
            computer: outcome.computer,
            relinquished: outcome.relinquished,
            state: outcome.state,
            replayed: false,
        })
    }

    fn record_turn(
        &mut self,
        set: &RecordSet,
        active: SlotMask,
        spectators: SlotMask,
    ) -> SessionResult<()> {
        if let TurnLog::Pending { path, verify_checksums } = &self.log {
            let header = TurnFileHeader::new(
                self.config.session_level_id,
                active,
                spectators,
                *verify_checksums,
            );
            let writer = TurnWriter::create(path, header, self.config.persistence.durable_sync)?;
            self.log = TurnLog::Recording(writer);
        }
        if let TurnLog::Recording(writer) = &mut self.log {
            writer.append(set)?;
        }
        Ok(())
    }

    /// Leaves the session, closing the transport and any turn file.
    ///
    /// # Errors
    ///
    /// [`SessionError::TurnFile`] when the recording cannot be synced.
    pub fn end_session(&mut self) -> SessionResult<()> {
        if self.exchange.take().is_some() {
            self.transport.exit();
            info!("session ended");
        }
        match std::mem::replace(&mut self.log, TurnLog::Off) {
            TurnLog::Recording(writer) => {
                writer.finish()?;
            }
            TurnLog::Replaying(reader) => {
                info!("replay of {} closed at tick {}", reader.path().display(), reader.cursor());
            }
            TurnLog::Off | TurnLog::Pending { .. } => {}
        }
        Ok(())
    }

    fn teardown(&mut self) {
        if let Err(e) = self.end_session() {
            warn!("turn file not closed cleanly: {}", e);
        }
    }

    fn gateway_mapper(&self) -> Option<Box<dyn PortMapper>> {
        let gateway = self.config.nat_pmp_gateway?;
        let mut mapper = NatPmpMapper::for_gateway(gateway);
        if let Some(lifetime) = self.config.nat_pmp_lifetime_secs {
            mapper = mapper.with_lifetime(lifetime);
        }
        Some(Box::new(mapper))
    }

    /// Marks `slot` as a spectator, or clears the mark. Spectators are
    /// written to the turn file header, so marks must be set before the
    /// first recorded tick.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotStarted`] without a live session
    /// - [`SessionError::PersistenceConflict`] once the turn file header
    ///   has been written
    pub fn set_spectator(&mut self, slot: ParticipantSlot, spectator: bool) -> SessionResult<()> {
        if matches!(self.log, TurnLog::Recording(_)) {
            return Err(SessionError::PersistenceConflict("the turn file header is already written"));
        }
        let exchange = self.exchange.as_mut().ok_or(SessionError::NotStarted)?;
        exchange.slots_mut().set_spectator(slot, spectator);
        info!("{} spectator: {}", slot, spectator);
        Ok(())
    }

    /// Records every turn of the next session to `path`.
    ///
    /// # Errors
    ///
    /// [`SessionError::PersistenceConflict`] when a turn file is loaded for
    /// replay, or the session has already exchanged a tick.
    pub fn enable_persistence(&mut self, path: impl AsRef<Path>, verify_checksums: bool) -> SessionResult<()> {
        match &self.log {
            TurnLog::Replaying(_) => {
                return Err(SessionError::PersistenceConflict("a turn file is loaded for replay"));
            }
            TurnLog::Recording(_) => {
                return Err(SessionError::PersistenceConflict("already recording"));
            }
            TurnLog::Off | TurnLog::Pending { .. } => {}
        }
        if self.exchange.as_ref().is_some_and(|e| e.next_tick() != 0) {
            return Err(SessionError::PersistenceConflict("the turn stream has already started"));
        }
        self.log = TurnLog::Pending {
            path: path.as_ref().to_path_buf(),
            verify_checksums,
        };
        Ok(())
    }

    /// Opens a turn file for replay. Later calls to [`Session::exchange`]
    /// read their tick from it instead of the network.
    ///
    /// # Errors
    ///
    /// - [`SessionError::PersistenceConflict`] while a live session runs or
    ///   recording is enabled
    /// - [`SessionError::TurnFile`] when the file is not a valid turn file
    pub fn load_turn_file(&mut self, path: impl AsRef<Path>) -> SessionResult<TurnFileHeader> {
        if self.exchange.is_some() {
            return Err(SessionError::PersistenceConflict("a live session is running"));
        }
        if matches!(self.log, TurnLog::Recording(_) | TurnLog::Pending { .. }) {
            return Err(SessionError::PersistenceConflict("recording is enabled"));
        }
        let reader = TurnReader::open(path)?;
        let header = *reader.header();
        self.log = TurnLog::Replaying(reader);
        Ok(header)
    }

    /// Skips idle turns of the loaded file up to the next turn with input.
    /// Returns that turn; the next tick to replay follows it.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotReplaying`] without a loaded file, or a corrupt
    /// turn file.
    pub fn fast_forward(&mut self) -> SessionResult<Option<(u32, RecordSet)>> {
        match &mut self.log {
            TurnLog::Replaying(reader) => Ok(reader.fast_forward()?),
            _ => Err(SessionError::NotReplaying),
        }
    }

    /// Sends a chat or alliance update to everyone.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotStarted`] or transport failures.
    pub fn send_screen(&mut self, alliance: SlotMask, chat: &str) -> SessionResult<()> {
        let exchange = self.exchange.as_mut().ok_or(SessionError::NotStarted)?;
        Ok(exchange.send_screen(&mut self.transport, alliance, chat)?)
    }

    /// Screen packets received since the last call.
    pub fn take_screens(&mut self) -> Vec<ScreenPacket> {
        self.exchange.as_mut().map(Exchange::take_screens).unwrap_or_default()
    }

    /// Link state behind the telemetry for `slot`. The local slot reports
    /// the upstream link on a client and the worst peer on the host; slots
    /// with no known link report zeros.
    #[must_use]
    pub fn link_state(&self, slot: ParticipantSlot) -> PeerLinkState {
        let Some(exchange) = &self.exchange else {
            return PeerLinkState::default();
        };
        let user = if exchange.slots().local_slot() == Some(slot) {
            self.transport.local_user()
        } else {
            exchange.slots().user_of(slot)
        };
        user.map(|user| self.transport.link_state(user)).unwrap_or_default()
    }

    /// Round-trip time to `slot` in milliseconds.
    #[must_use]
    pub fn ping(&self, slot: ParticipantSlot) -> u32 {
        self.link_state(slot).rtt_ms
    }

    /// Round-trip variance to `slot` in milliseconds.
    #[must_use]
    pub fn ping_variance(&self, slot: ParticipantSlot) -> u32 {
        self.link_state(slot).rtt_variance_ms
    }

    /// Packet loss towards `slot` in percent.
    #[must_use]
    pub fn packet_loss(&self, slot: ParticipantSlot) -> u32 {
        self.link_state(slot).packet_loss_percent
    }

    /// Unacknowledged reliable bytes towards `slot`.
    #[must_use]
    pub fn bytes_in_flight(&self, slot: ParticipantSlot) -> u32 {
        self.link_state(slot).bytes_in_flight
    }

    /// Unacknowledged reliable datagrams towards `slot`.
    #[must_use]
    pub fn reliable_commands_pending(&self, slot: ParticipantSlot) -> u32 {
        self.link_state(slot).reliable_pending
    }

    /// Our participant slot while a session runs.
    #[must_use]
    pub fn local_slot(&self) -> Option<ParticipantSlot> {
        self.exchange.as_ref().and_then(|e| e.slots().local_slot())
    }

    /// Whether a live session is running.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.exchange.is_some()
    }

    /// Whether turns are being written to a file.
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        matches!(self.log, TurnLog::Recording(_) | TurnLog::Pending { .. })
    }

    /// Whether turns are being read from a file.
    #[must_use]
    pub const fn is_replaying(&self) -> bool {
        matches!(self.log, TurnLog::Replaying(_))
    }

    /// The running exchange.
    #[must_use]
    pub const fn lockstep(&self) -> Option<&Exchange> {
        self.exchange.as_ref()
    }

    /// Desync counters and reports.
    #[must_use]
    pub const fn detector(&self) -> &DesyncDetector {
        &self.detector
    }

    /// Mutable desync detector, to take or reset reports.
    pub fn detector_mut(&mut self) -> &mut DesyncDetector {
        &mut self.detector
    }

    /// Configuration this session was built with.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn replay_turn(
    reader: &mut TurnReader,
    detector: &mut DesyncDetector,
    tick: u32,
    record: Record,
) -> SessionResult<TickOutcome> {
    let set = reader.read_turn(tick)?.ok_or(SessionError::ReplayFinished { tick })?;
    reader.seek_turn(tick.wrapping_add(1));

    let active = reader.header().active_slots();
    let relinquished: SlotMask = set
        .iter()
        .filter(|(_, r)| r.is_relinquish())
        .map(|(slot, _)| slot)
        .collect();
    let contributors: SlotMask = set
        .iter()
        .filter(|(slot, r)| active.contains(*slot) && r.tick == tick && !r.is_relinquish())
        .map(|(slot, _)| slot)
        .collect();
    let report = detector.check_replayed(tick, &set, contributors, record.checksum);

    Ok(TickOutcome {
        tick,
        set,
        report,
        contributors,
        computer: active.difference(contributors),
        relinquished,
        state: ExchangeState::Complete,
        replayed: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_transport::{MemoryHub, MemoryTransport, TransportConfig};

    fn temp_turn_path(name: &str) -> PathBuf {
        let id = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("test_{name}_{id}.wtrn"))
    }

    fn memory_session(hub: &MemoryHub) -> Session<MemoryTransport> {
        let transport = MemoryTransport::init(hub.clone(), TransportConfig::default()).unwrap();
        Session::new(transport, SessionConfig::default())
    }

    #[test]
    fn test_exchange_before_begin_is_rejected() {
        let hub = MemoryHub::new();
        let mut session = memory_session(&hub);
        assert!(matches!(
            session.exchange(0, Record::noop(0, 0)),
            Err(SessionError::NotStarted)
        ));
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let hub = MemoryHub::new();
        let mut session = memory_session(&hub);
        session.begin_session(Role::Host, "7001", SessionOptions::default()).unwrap();
        assert!(matches!(
            session.begin_session(Role::Host, "7002", SessionOptions::default()),
            Err(SessionError::AlreadyStarted)
        ));
    }

    #[test]
    fn test_solo_host_exchanges_and_records() {
        let hub = MemoryHub::new();
        let path = temp_turn_path("solo_host");
        let mut session = memory_session(&hub);
        session.enable_persistence(&path, true).unwrap();
        assert_eq!(
            session.begin_session(Role::Host, "7010", SessionOptions::default()).unwrap(),
            ParticipantSlot::HOST
        );

        for tick in 0..3 {
            let outcome = session.exchange(tick, Record::noop(tick, 0xAB)).unwrap();
            assert_eq!(outcome.contributors, SlotMask::from_bits(0b0001));
            assert!(outcome.report.is_clean());
            assert!(!outcome.replayed);
        }
        assert!(session.is_recording());
        session.end_session().unwrap();
        assert!(!session.is_active());

        let reader = TurnReader::open(&path).unwrap();
        assert_eq!(reader.turn_count().unwrap(), 3);
        assert_eq!(reader.header().active_slots(), SlotMask::from_bits(0b0001));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_persistence_modes_are_exclusive() {
        let hub = MemoryHub::new();
        let path = temp_turn_path("exclusive");
        let mut session = memory_session(&hub);
        session.enable_persistence(&path, true).unwrap();
        assert!(matches!(
            session.load_turn_file(&path),
            Err(SessionError::PersistenceConflict(_))
        ));
    }

    #[test]
    fn test_persistence_refused_after_first_tick() {
        let hub = MemoryHub::new();
        let mut session = memory_session(&hub);
        session.begin_session(Role::Host, "7020", SessionOptions::default()).unwrap();
        session.exchange(0, Record::noop(0, 1)).unwrap();
        assert!(matches!(
            session.enable_persistence(temp_turn_path("late"), true),
            Err(SessionError::PersistenceConflict(_))
        ));
    }

    #[test]
    fn test_unrecordable_tick_ends_session() {
        let hub = MemoryHub::new();
        let mut session = memory_session(&hub);
        session
            .enable_persistence("/nonexistent_warden_dir/unwritable.wtrn", true)
            .unwrap();
        session.begin_session(Role::Host, "7030", SessionOptions::default()).unwrap();

        assert!(matches!(
            session.exchange(0, Record::noop(0, 1)),
            Err(SessionError::TurnFile(_))
        ));
        assert!(!session.is_active());
        assert!(!session.is_recording());
        assert!(matches!(
            session.exchange(0, Record::noop(0, 1)),
            Err(SessionError::NotStarted)
        ));
    }

    #[test]
    fn test_spectators_written_to_header() {
        let hub = MemoryHub::new();
        let path = temp_turn_path("spectators");
        let mut session = memory_session(&hub);
        let third = ParticipantSlot::new(2).unwrap();
        assert!(matches!(session.set_spectator(third, true), Err(SessionError::NotStarted)));

        session.enable_persistence(&path, true).unwrap();
        session.begin_session(Role::Host, "7040", SessionOptions::default()).unwrap();
        session.set_spectator(third, true).unwrap();
        session.set_spectator(ParticipantSlot::new(3).unwrap(), true).unwrap();
        session.set_spectator(ParticipantSlot::new(3).unwrap(), false).unwrap();
        session.exchange(0, Record::noop(0, 1)).unwrap();
        assert!(matches!(
            session.set_spectator(third, false),
            Err(SessionError::PersistenceConflict(_))
        ));
        session.end_session().unwrap();

        let reader = TurnReader::open(&path).unwrap();
        assert_eq!(reader.header().spectator_slots(), SlotMask::from_bits(0b0100));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_gateway_mapper_follows_config() {
        let hub = MemoryHub::new();
        assert!(memory_session(&hub).gateway_mapper().is_none());

        let config = SessionConfig {
            nat_pmp_gateway: Some(std::net::Ipv4Addr::new(192, 168, 1, 1)),
            nat_pmp_lifetime_secs: Some(600),
            ..SessionConfig::default()
        };
        let transport = MemoryTransport::init(hub, TransportConfig::default()).unwrap();
        let session = Session::new(transport, config);
        assert_eq!(session.gateway_mapper().unwrap().name(), "NAT-PMP");
    }

    #[test]
    fn test_fast_forward_needs_a_loaded_file() {
        let hub = MemoryHub::new();
        let mut session = memory_session(&hub);
        assert!(matches!(session.fast_forward(), Err(SessionError::NotReplaying)));
    }

    #[test]
    fn test_telemetry_is_zero_without_session() {
        let hub = MemoryHub::new();
        let session = memory_session(&hub);
        assert_eq!(session.ping(ParticipantSlot::HOST), 0);
        assert_eq!(session.packet_loss(ParticipantSlot::HOST), 0);
        assert_eq!(session.link_state(ParticipantSlot::HOST), PeerLinkState::default());
    }
}
