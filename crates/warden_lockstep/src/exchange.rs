//! # Turn Exchange
//!
//! Produces exactly one [`RecordSet`] per tick, identical on every endpoint.
//!
//! ## Host, tick `n`
//!
//! ```text
//! update ─▶ welcome new users, release dropped slots
//!    │
//!    ▼
//! store local record in slot 0
//!    │
//!    ▼
//! ┌─ drain every peer ──────────────────────────────┐
//! │  Record(n)    -> set                            │
//! │  Record(>n)   -> held for its tick              │
//! │  Record(<n)   -> discarded                      │
//! │  Screen       -> collected, relayed             │
//! └─ until every human slot is in, or timeout ──────┘
//!    │                        │ timeout: drop the missing peers
//!    ▼                        ▼
//! relinquish records for slots released since the last tick
//!    │
//!    ▼
//! seal ─▶ send_all(RecordSet(n) + masks)
//! ```
//!
//! ## Client, tick `n`
//!
//! `update`, send the local record to the host, wait for `RecordSet(n)` and
//! adopt its masks. Losing the host or running out of time ends the session.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use warden_transport::poll::{retry_until, Deadline};
use warden_transport::{NetUserId, Role, Transport, TransportError};

use crate::config::ExchangeConfig;
use crate::error::{LockstepError, LockstepResult};
use crate::message::{
    Message, RecordBody, RecordSetBody, ScreenPacket, Welcome, PROTOCOL_VERSION,
};
use crate::record::{ParticipantSlot, Record, RecordSet, SlotMask};
use crate::slots::SlotTable;

/// Where the current tick's exchange stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeState {
    /// No exchange has run yet.
    Idle,
    /// Waiting for records.
    Collecting,
    /// Every human slot delivered.
    Complete,
    /// The host stopped waiting and substituted the missing slots.
    TimedOutSubstituted,
}

/// One completed tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExchangeOutcome {
    /// Tick exchanged.
    pub tick: u32,
    /// The sealed set.
    pub set: RecordSet,
    /// Slots whose human record is in the set.
    pub contributors: SlotMask,
    /// Computer-controlled slots.
    pub computer: SlotMask,
    /// Slots that received the relinquish record this tick.
    pub relinquished: SlotMask,
    /// How the tick ended.
    pub state: ExchangeState,
}

/// Lockstep endpoint, host or client.
#[derive(Debug)]
pub struct Exchange {
    config: ExchangeConfig,
    slots: SlotTable,
    state: ExchangeState,
    next_tick: u32,
    session_level_id: u32,
    /// Records that arrived ahead of their tick.
    held: BTreeMap<u32, Vec<(ParticipantSlot, Record)>>,
    /// Slots released since the last sealed set.
    released: SlotMask,
    screens: Vec<ScreenPacket>,
    buffer: Vec<u8>,
}

impl Exchange {
    /// Host endpoint running `session_level_id`.
    #[must_use]
    pub fn host(config: ExchangeConfig, session_level_id: u32) -> Self {
        Self::with_slots(config, SlotTable::for_host(), session_level_id)
    }

    /// Client endpoint; the level id arrives with the welcome.
    #[must_use]
    pub fn client(config: ExchangeConfig) -> Self {
        Self::with_slots(config, SlotTable::for_client(), 0)
    }

    fn with_slots(config: ExchangeConfig, slots: SlotTable, session_level_id: u32) -> Self {
        Self {
            config,
            slots,
            state: ExchangeState::Idle,
            next_tick: 0,
            session_level_id,
            held: BTreeMap::new(),
            released: SlotMask::EMPTY,
            screens: Vec::new(),
            buffer: vec![0; Message::MAX_SIZE],
        }
    }

    /// Exchanges tick `tick`, which must be the next tick in sequence.
    ///
    /// # Errors
    ///
    /// - [`LockstepError::OutOfOrder`] when `tick` is not the next tick
    /// - [`LockstepError::NotWelcomed`] on a client without a slot
    /// - [`LockstepError::Exchange`] when the transport fails
    /// - [`LockstepError::HostLost`] / [`LockstepError::Timeout`] on a client
    ///   whose host vanished or never answered
    pub fn exchange(
        &mut self,
        transport: &mut dyn Transport,
        tick: u32,
        local: Record,
    ) -> LockstepResult<ExchangeOutcome> {
        if tick != self.next_tick {
            return Err(LockstepError::OutOfOrder { expected: self.next_tick, got: tick });
        }
        self.state = ExchangeState::Collecting;
        let outcome = match self.slots.role() {
            Role::Host => self.exchange_as_host(transport, tick, local)?,
            Role::Client => self.exchange_as_client(transport, tick, local)?,
        };
        if tick == 0 && self.slots.role() == Role::Host {
            self.slots.set_accepting(self.config.allow_late_join);
        }
        self.state = outcome.state;
        self.next_tick = tick.wrapping_add(1);
        debug!(
            "tick {} sealed: contributors {:#06b}, computer {:#06b}",
            tick,
            outcome.contributors.bits(),
            outcome.computer.bits()
        );
        Ok(outcome)
    }

    fn exchange_as_host(
        &mut self,
        transport: &mut dyn Transport,
        tick: u32,
        local: Record,
    ) -> LockstepResult<ExchangeOutcome> {
        self.pump(transport, Some(tick))?;

        let mut set = RecordSet::default();
        let mut have = SlotMask::EMPTY;
        set.set(ParticipantSlot::HOST, local.at_tick(tick));
        have.insert(ParticipantSlot::HOST);

        let deadline = Deadline::after(self.config.exchange_timeout());
        let mut timed_out = false;
        loop {
            for user in transport.peers() {
                self.drain_peer(transport, user, Some(tick))?;
            }
            self.take_held(tick, &mut set, &mut have);
            self.pump(transport, Some(tick))?;

            let waiting = self.slots.remote_active().difference(have);
            let Some(first) = waiting.first() else {
                break;
            };
            if deadline.expired() {
                self.drop_stragglers(transport, tick, waiting);
                self.pump(transport, Some(tick))?;
                timed_out = true;
                break;
            }
            if let Some(user) = self.slots.user_of(first) {
                transport
                    .message_ready(user, self.config.poll_interval())
                    .map_err(|e| link_failure(Some(tick), "poll", Some(user), e))?;
            }
        }

        let relinquished = std::mem::take(&mut self.released);
        for slot in relinquished.iter() {
            set.set(slot, Record::relinquish(tick));
        }
        set.seal();

        let computer = self.slots.computer();
        let contributors = have.difference(computer);
        let body = RecordSetBody::new(tick, set, contributors, computer, relinquished, timed_out);
        transport
            .send_all(&Message::RecordSet(body).encode())
            .map_err(|e| link_failure(Some(tick), "broadcast", None, e))?;

        Ok(ExchangeOutcome {
            tick,
            set,
            contributors,
            computer,
            relinquished,
            state: if timed_out {
                ExchangeState::TimedOutSubstituted
            } else {
                ExchangeState::Complete
            },
        })
    }

    fn drop_stragglers(&mut self, transport: &mut dyn Transport, tick: u32, waiting: SlotMask) {
        for slot in waiting.iter() {
            let Some(user) = self.slots.user_of(slot) else {
                continue;
            };
            warn!("{} in {} sent nothing for tick {}; dropping", user, slot, tick);
            if let Err(e) = transport.drop_user(user) {
                debug!("{} already gone: {}", user, e);
            }
            if let Some(slot) = self.slots.release(user) {
                self.released.insert(slot);
            }
        }
    }

    fn exchange_as_client(
        &mut self,
        transport: &mut dyn Transport,
        tick: u32,
        local: Record,
    ) -> LockstepResult<ExchangeOutcome> {
        let slot = self.slots.local_slot().ok_or(LockstepError::NotWelcomed)?;
        self.pump(transport, Some(tick))?;
        if self.slots.host_lost() {
            return Err(LockstepError::HostLost { tick });
        }

        let record = Message::Record(RecordBody::new(tick, slot, local.at_tick(tick)));
        transport
            .send_single(NetUserId::HOST, &record.encode(), true)
            .map_err(|e| link_failure(Some(tick), "send record", Some(NetUserId::HOST), e))?;

        let timeout = self.config.exchange_timeout();
        let deadline = Deadline::after(timeout);
        loop {
            let received = self
                .receive(transport, NetUserId::HOST, self.config.poll_interval())
                .map_err(|e| link_failure(Some(tick), "read", Some(NetUserId::HOST), e))?;
            match received {
                Some(Message::RecordSet(body)) if body.tick == tick => {
                    self.slots.apply_masks(body.contributors(), body.computer());
                    return Ok(ExchangeOutcome {
                        tick,
                        set: body.set,
                        contributors: body.contributors(),
                        computer: body.computer(),
                        relinquished: body.relinquished(),
                        state: if body.timed_out() {
                            ExchangeState::TimedOutSubstituted
                        } else {
                            ExchangeState::Complete
                        },
                    });
                }
                Some(Message::RecordSet(body)) if body.tick < tick => {
                    debug!("stale RecordSet for tick {} ignored", body.tick);
                }
                Some(Message::RecordSet(body)) => {
                    return Err(LockstepError::OutOfOrder { expected: tick, got: body.tick });
                }
                Some(Message::Screen(packet)) => self.screens.push(packet),
                Some(other) => debug!("unexpected {:?} from the host ignored", other),
                None => {
                    self.pump(transport, Some(tick))?;
                    if self.slots.host_lost() {
                        return Err(LockstepError::HostLost { tick });
                    }
                    if deadline.expired() {
                        warn!("no RecordSet for tick {} after {:?}", tick, timeout);
                        return Err(LockstepError::Timeout { tick, waited: timeout });
                    }
                }
            }
        }
    }

    /// Runs one transport update. On the host, new users get their welcome
    /// and released slots are remembered for the next set.
    fn pump(&mut self, transport: &mut dyn Transport, tick: Option<u32>) -> LockstepResult<()> {
        transport
            .update(&mut self.slots)
            .map_err(|e| link_failure(tick, "update", None, e))?;

        for (user, slot) in self.slots.take_joined() {
            let welcome = Message::Welcome(Welcome::new(slot, self.session_level_id));
            transport
                .send_single(user, &welcome.encode(), true)
                .map_err(|e| link_failure(tick, "welcome", Some(user), e))?;
            info!("{} joined as {}", user, slot);
        }
        for (_, slot, _) in self.slots.take_dropped() {
            self.released.insert(slot);
        }
        Ok(())
    }

    /// Reads everything queued from `user` on the host.
    fn drain_peer(
        &mut self,
        transport: &mut dyn Transport,
        user: NetUserId,
        tick: Option<u32>,
    ) -> LockstepResult<()> {
        loop {
            let received = self
                .receive(transport, user, Duration::ZERO)
                .map_err(|e| link_failure(tick, "read", Some(user), e))?;
            match received {
                Some(Message::Record(body)) => self.hold(user, &body),
                Some(Message::Screen(packet)) => self.relay_screen(transport, user, packet, tick)?,
                Some(other) => warn!("unexpected {:?} from {} ignored", other, user),
                None => return Ok(()),
            }
        }
    }

    fn hold(&mut self, user: NetUserId, body: &RecordBody) {
        let Some(slot) = self.slots.slot_of(user) else {
            warn!("record from {} without a slot ignored", user);
            return;
        };
        if body.slot() != Some(slot) {
            warn!("{} in {} sent a record claiming another slot", user, slot);
            return;
        }
        if body.tick < self.next_tick {
            debug!("stale record for tick {} from {}", body.tick, slot);
            return;
        }
        self.held.entry(body.tick).or_default().push((slot, body.record));
    }

    fn take_held(&mut self, tick: u32, set: &mut RecordSet, have: &mut SlotMask) {
        while let Some(entry) = self.held.first_entry() {
            if *entry.key() > tick {
                break;
            }
            let stale = *entry.key() < tick;
            let records = entry.remove();
            if stale {
                continue;
            }
            for (slot, record) in records {
                if !self.slots.active().contains(slot) {
                    continue;
                }
                if have.contains(slot) {
                    warn!("duplicate record for tick {} from {}", tick, slot);
                    continue;
                }
                set.set(slot, record.at_tick(tick));
                have.insert(slot);
            }
        }
    }

    fn relay_screen(
        &mut self,
        transport: &mut dyn Transport,
        user: NetUserId,
        packet: ScreenPacket,
        tick: Option<u32>,
    ) -> LockstepResult<()> {
        if packet.slot().is_none() || packet.slot() != self.slots.slot_of(user) {
            warn!("screen packet from {} with a foreign slot dropped", user);
            return Ok(());
        }
        let bytes = Message::Screen(packet).encode();
        for peer in transport.peers().into_iter().filter(|peer| *peer != user) {
            transport
                .send_single(peer, &bytes, true)
                .map_err(|e| link_failure(tick, "relay screen", Some(peer), e))?;
        }
        self.screens.push(packet);
        Ok(())
    }

    /// Next decodable message from `src`; malformed payloads are logged and
    /// skipped.
    fn receive(
        &mut self,
        transport: &mut dyn Transport,
        src: NetUserId,
        wait: Duration,
    ) -> Result<Option<Message>, TransportError> {
        let mut wait = wait;
        while transport.message_ready(src, wait)?.is_some() {
            let len = transport.read_message(src, &mut self.buffer)?;
            match Message::decode(&self.buffer[..len]) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => warn!("discarding message from {}: {}", src, e),
            }
            wait = Duration::ZERO;
        }
        Ok(None)
    }

    /// Client: waits for the host's slot assignment.
    ///
    /// # Errors
    ///
    /// - [`LockstepError::ProtocolMismatch`] when the host speaks another version
    /// - [`LockstepError::WelcomeTimeout`] when no welcome arrives in time
    /// - [`LockstepError::HostLost`] when the host disconnects first
    pub fn await_welcome(&mut self, transport: &mut dyn Transport) -> LockstepResult<ParticipantSlot> {
        if let Some(slot) = self.slots.local_slot() {
            return Ok(slot);
        }
        let timeout = self.config.welcome_timeout();
        let welcomed = retry_until(timeout, self.config.poll_interval(), || {
            self.poll_lobby(transport)?;
            if self.slots.host_lost() {
                return Err(LockstepError::HostLost { tick: self.next_tick });
            }
            Ok(self.slots.local_slot())
        })?;
        welcomed.ok_or(LockstepError::WelcomeTimeout(timeout))
    }

    /// Host: waits until `count` human slots (host included) are taken.
    /// Returns how many are present when the wait ends.
    ///
    /// # Errors
    ///
    /// Transport failures.
    pub fn wait_for_participants(
        &mut self,
        transport: &mut dyn Transport,
        count: usize,
        timeout: Duration,
    ) -> LockstepResult<usize> {
        let reached = retry_until(timeout, self.config.poll_interval(), || {
            self.poll_lobby(transport)?;
            let present = self.slots.active().count();
            Ok::<_, LockstepError>((present >= count).then_some(present))
        })?;
        Ok(reached.unwrap_or_else(|| self.slots.active().count()))
    }

    /// Services the transport between ticks: joins, drops, welcomes and
    /// screen packets.
    ///
    /// # Errors
    ///
    /// Transport failures and [`LockstepError::ProtocolMismatch`].
    pub fn poll_lobby(&mut self, transport: &mut dyn Transport) -> LockstepResult<()> {
        self.pump(transport, None)?;
        match self.slots.role() {
            Role::Host => {
                for user in transport.peers() {
                    self.drain_peer(transport, user, None)?;
                }
            }
            Role::Client => {
                while let Some(message) = self
                    .receive(transport, NetUserId::HOST, Duration::ZERO)
                    .map_err(|e| link_failure(None, "read", Some(NetUserId::HOST), e))?
                {
                    match message {
                        Message::Welcome(welcome) => self.accept_welcome(transport, &welcome)?,
                        Message::Screen(packet) => self.screens.push(packet),
                        other => debug!("{:?} before the first tick ignored", other),
                    }
                }
            }
        }
        Ok(())
    }

    fn accept_welcome(&mut self, transport: &dyn Transport, welcome: &Welcome) -> LockstepResult<()> {
        if welcome.protocol_version != PROTOCOL_VERSION {
            error!(
                "host speaks protocol {}, we speak {}",
                welcome.protocol_version, PROTOCOL_VERSION
            );
            return Err(LockstepError::ProtocolMismatch {
                local: PROTOCOL_VERSION,
                remote: welcome.protocol_version,
            });
        }
        let slot = welcome
            .slot()
            .ok_or(LockstepError::Malformed { what: "welcome slot", len: 1 })?;
        let user = transport.local_user().ok_or(LockstepError::NotWelcomed)?;
        self.slots.set_local(slot, user);
        self.session_level_id = welcome.session_level_id;
        info!("assigned {} for level {}", slot, welcome.session_level_id);
        Ok(())
    }

    /// Sends a screen packet: to everyone from the host, to the host (which
    /// relays it) from a client.
    ///
    /// # Errors
    ///
    /// [`LockstepError::NotWelcomed`] before a slot is assigned; transport
    /// failures.
    pub fn send_screen(
        &mut self,
        transport: &mut dyn Transport,
        alliance: SlotMask,
        chat: &str,
    ) -> LockstepResult<()> {
        let slot = self.slots.local_slot().ok_or(LockstepError::NotWelcomed)?;
        let bytes = Message::Screen(ScreenPacket::new(slot, alliance, chat)).encode();
        match self.slots.role() {
            Role::Host => transport
                .send_all(&bytes)
                .map_err(|e| link_failure(None, "send screen", None, e)),
            Role::Client => transport
                .send_single(NetUserId::HOST, &bytes, true)
                .map_err(|e| link_failure(None, "send screen", Some(NetUserId::HOST), e)),
        }
    }

    /// Screen packets received since the last call.
    pub fn take_screens(&mut self) -> Vec<ScreenPacket> {
        std::mem::take(&mut self.screens)
    }

    /// Slot bookkeeping.
    #[must_use]
    pub const fn slots(&self) -> &SlotTable {
        &self.slots
    }

    /// Slot bookkeeping, mutably (spectator marks).
    pub fn slots_mut(&mut self) -> &mut SlotTable {
        &mut self.slots
    }

    /// State of the most recent exchange.
    #[must_use]
    pub const fn state(&self) -> ExchangeState {
        self.state
    }

    /// Tick the next exchange must use.
    #[must_use]
    pub const fn next_tick(&self) -> u32 {
        self.next_tick
    }

    /// Level id of the session.
    #[must_use]
    pub const fn session_level_id(&self) -> u32 {
        self.session_level_id
    }

    /// Exchange configuration.
    #[must_use]
    pub const fn config(&self) -> &ExchangeConfig {
        &self.config
    }
}

fn link_failure(
    tick: Option<u32>,
    operation: &'static str,
    peer: Option<NetUserId>,
    source: TransportError,
) -> LockstepError {
    let peer = peer.map_or_else(|| "all peers".to_string(), |user| user.to_string());
    match tick {
        Some(tick) => {
            error!("{} with {} failed at tick {}: {}", operation, peer, tick, source);
            LockstepError::Exchange { tick, source }
        }
        None => {
            error!("{} with {} failed: {}", operation, peer, source);
            LockstepError::Transport(source)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_transport::{HostOptions, JoinOptions, MemoryHub, MemoryTransport, TransportConfig};

    fn fast_config() -> ExchangeConfig {
        ExchangeConfig {
            exchange_timeout_ms: 60,
            poll_interval_ms: 1,
            welcome_timeout_ms: 60,
            allow_late_join: false,
        }
    }

    fn endpoint(hub: &MemoryHub) -> MemoryTransport {
        MemoryTransport::init(hub.clone(), TransportConfig::default()).unwrap()
    }

    fn slot(index: usize) -> ParticipantSlot {
        ParticipantSlot::new(index).unwrap()
    }

    /// Host exchange plus one raw client transport that speaks the wire
    /// format by hand.
    fn host_with_raw_client() -> (Exchange, MemoryTransport, MemoryTransport) {
        let hub = MemoryHub::new();
        let mut host_link = endpoint(&hub);
        host_link.host("5556", HostOptions::default()).unwrap();
        let mut client_link = endpoint(&hub);
        client_link.join("h:5556", JoinOptions::default()).unwrap();

        let mut host = Exchange::host(fast_config(), 3);
        host.poll_lobby(&mut host_link).unwrap();
        (host, host_link, client_link)
    }

    fn read_from_host(link: &mut MemoryTransport) -> Message {
        let mut buffer = [0u8; Message::MAX_SIZE];
        let len = link.read_message(NetUserId::HOST, &mut buffer).unwrap();
        Message::decode(&buffer[..len]).unwrap()
    }

    fn send_record(link: &mut MemoryTransport, tick: u32, slot: ParticipantSlot, action: u16) {
        let record = Record::new(tick, action, [0; 4], 0, 77);
        let bytes = Message::Record(RecordBody::new(tick, slot, record)).encode();
        link.send_single(NetUserId::HOST, &bytes, true).unwrap();
    }

    #[test]
    fn test_lone_host_completes_immediately() {
        let hub = MemoryHub::new();
        let mut link = endpoint(&hub);
        link.host("0", HostOptions::default()).unwrap();
        let mut host = Exchange::host(fast_config(), 1);

        let outcome = host.exchange(&mut link, 0, Record::noop(0, 5)).unwrap();
        assert_eq!(outcome.state, ExchangeState::Complete);
        assert_eq!(outcome.contributors.bits(), 0b0001);
        assert!(outcome.set.is_sealed());
        assert_eq!(host.next_tick(), 1);

        assert!(matches!(
            host.exchange(&mut link, 5, Record::default()),
            Err(LockstepError::OutOfOrder { expected: 1, got: 5 })
        ));
    }

    #[test]
    fn test_welcome_then_record_merged() {
        let (mut host, mut host_link, mut client_link) = host_with_raw_client();
        let Message::Welcome(welcome) = read_from_host(&mut client_link) else {
            panic!("expected a welcome");
        };
        assert_eq!(welcome.slot(), Some(slot(1)));
        assert_eq!(welcome.session_level_id, 3);

        send_record(&mut client_link, 0, slot(1), 9);
        send_record(&mut client_link, 1, slot(1), 10);

        let first = host.exchange(&mut host_link, 0, Record::noop(0, 77)).unwrap();
        assert_eq!(first.set.get(slot(1)).action, 9);
        assert_eq!(first.contributors.bits(), 0b0011);

        // Tick 1 was held back and needs no further input.
        let second = host.exchange(&mut host_link, 1, Record::noop(1, 77)).unwrap();
        assert_eq!(second.set.get(slot(1)).action, 10);
        assert_eq!(second.state, ExchangeState::Complete);

        let Message::RecordSet(body) = read_from_host(&mut client_link) else {
            panic!("expected a record set");
        };
        assert_eq!(body.tick, 0);
        assert_eq!(body.set, first.set);
    }

    #[test]
    fn test_silent_peer_dropped_and_substituted() {
        let (mut host, mut host_link, mut client_link) = host_with_raw_client();
        // A record claiming the host's slot must not count.
        send_record(&mut client_link, 0, ParticipantSlot::HOST, 4);

        let outcome = host.exchange(&mut host_link, 0, Record::noop(0, 1)).unwrap();
        assert_eq!(outcome.state, ExchangeState::TimedOutSubstituted);
        assert!(outcome.relinquished.contains(slot(1)));
        assert!(outcome.computer.contains(slot(1)));
        assert!(outcome.set.get(slot(1)).is_relinquish());
        assert_eq!(outcome.set.get(ParticipantSlot::HOST).action, 0);
        assert!(host_link.peers().is_empty());
    }

    #[test]
    fn test_disconnect_substitutes_relinquish() {
        let (mut host, mut host_link, mut client_link) = host_with_raw_client();
        client_link.exit();

        let outcome = host.exchange(&mut host_link, 0, Record::noop(0, 1)).unwrap();
        assert_eq!(outcome.state, ExchangeState::Complete);
        assert_eq!(outcome.relinquished.bits(), 0b0010);
        assert!(outcome.set.get(slot(1)).is_relinquish());

        // Relinquish is a one-off; afterwards the slot stays computer-controlled.
        let next = host.exchange(&mut host_link, 1, Record::noop(1, 1)).unwrap();
        assert!(next.relinquished.is_empty());
        assert_eq!(*next.set.get(slot(1)), Record::default());
        assert!(next.computer.contains(slot(1)));
    }

    #[test]
    fn test_late_join_refused() {
        let hub = MemoryHub::new();
        let mut host_link = endpoint(&hub);
        host_link.host("5556", HostOptions::default()).unwrap();
        let mut host = Exchange::host(fast_config(), 0);
        host.exchange(&mut host_link, 0, Record::default()).unwrap();

        let mut late = endpoint(&hub);
        late.join("h:5556", JoinOptions::default()).unwrap();
        host.poll_lobby(&mut host_link).unwrap();
        assert!(host_link.peers().is_empty());
        assert_eq!(host.slots().active().count(), 1);
    }

    /// Raw host transport plus a welcomed client exchange.
    fn client_with_raw_host() -> (Exchange, MemoryTransport, MemoryTransport) {
        let hub = MemoryHub::new();
        let mut host_link = endpoint(&hub);
        host_link.host("5556", HostOptions::default()).unwrap();
        let mut client_link = endpoint(&hub);
        client_link.join("h:5556", JoinOptions::default()).unwrap();

        host_link.update(&mut SlotTable::for_host()).unwrap();
        let welcome = Message::Welcome(Welcome::new(slot(1), 12)).encode();
        host_link.send_single(NetUserId(1), &welcome, true).unwrap();

        let mut client = Exchange::client(fast_config());
        assert_eq!(client.await_welcome(&mut client_link).unwrap(), slot(1));
        assert_eq!(client.session_level_id(), 12);
        (client, host_link, client_link)
    }

    #[test]
    fn test_client_adopts_host_set() {
        let (mut client, mut host_link, mut client_link) = client_with_raw_host();
        let mut set = RecordSet::default();
        set.set(ParticipantSlot::HOST, Record::noop(0, 8));
        set.set(slot(1), Record::noop(0, 8));
        set.seal();
        let body = RecordSetBody::new(0, set, SlotMask::from_bits(0b0011), SlotMask::EMPTY, SlotMask::EMPTY, false);
        host_link.send_all(&Message::RecordSet(body).encode()).unwrap();

        let outcome = client.exchange(&mut client_link, 0, Record::noop(0, 8)).unwrap();
        assert_eq!(outcome.set, set);
        assert_eq!(outcome.state, ExchangeState::Complete);
        assert_eq!(client.slots().active().bits(), 0b0011);

        // The host saw our record.
        let mut buffer = [0u8; Message::MAX_SIZE];
        let len = host_link.read_message(NetUserId(1), &mut buffer).unwrap();
        assert!(matches!(Message::decode(&buffer[..len]), Ok(Message::Record(r)) if r.tick == 0));

        let ahead = RecordSetBody::new(5, set, SlotMask::EMPTY, SlotMask::EMPTY, SlotMask::EMPTY, false);
        host_link.send_all(&Message::RecordSet(ahead).encode()).unwrap();
        assert!(matches!(
            client.exchange(&mut client_link, 1, Record::default()),
            Err(LockstepError::OutOfOrder { expected: 1, got: 5 })
        ));
    }

    #[test]
    fn test_client_times_out_without_set() {
        let (mut client, _host_link, mut client_link) = client_with_raw_host();
        assert!(matches!(
            client.exchange(&mut client_link, 0, Record::default()),
            Err(LockstepError::Timeout { tick: 0, .. })
        ));
    }

    #[test]
    fn test_client_reports_lost_host() {
        let (mut client, mut host_link, mut client_link) = client_with_raw_host();
        host_link.exit();
        assert!(matches!(
            client.exchange(&mut client_link, 0, Record::default()),
            Err(LockstepError::HostLost { tick: 0 })
        ));
    }

    #[test]
    fn test_protocol_mismatch_rejected() {
        let hub = MemoryHub::new();
        let mut host_link = endpoint(&hub);
        host_link.host("5556", HostOptions::default()).unwrap();
        let mut client_link = endpoint(&hub);
        client_link.join("h:5556", JoinOptions::default()).unwrap();
        host_link.update(&mut SlotTable::for_host()).unwrap();

        let mut welcome = Welcome::new(slot(1), 0);
        welcome.protocol_version = PROTOCOL_VERSION + 1;
        host_link
            .send_single(NetUserId(1), &Message::Welcome(welcome).encode(), true)
            .unwrap();

        let mut client = Exchange::client(fast_config());
        assert!(matches!(
            client.await_welcome(&mut client_link),
            Err(LockstepError::ProtocolMismatch { remote, .. }) if remote == PROTOCOL_VERSION + 1
        ));
    }

    #[test]
    fn test_welcome_timeout_and_unwelcomed_exchange() {
        let hub = MemoryHub::new();
        let mut host_link = endpoint(&hub);
        host_link.host("5556", HostOptions::default()).unwrap();
        let mut client_link = endpoint(&hub);
        client_link.join("h:5556", JoinOptions::default()).unwrap();

        let mut client = Exchange::client(fast_config());
        assert!(matches!(
            client.exchange(&mut client_link, 0, Record::default()),
            Err(LockstepError::NotWelcomed)
        ));
        assert!(matches!(
            client.await_welcome(&mut client_link),
            Err(LockstepError::WelcomeTimeout(_))
        ));
    }

    #[test]
    fn test_screen_packets_relayed() {
        let (mut host, mut host_link, mut client_link) = host_with_raw_client();
        let _welcome = read_from_host(&mut client_link);

        let packet = ScreenPacket::new(slot(1), SlotMask::from_bits(0b0011), "ready");
        client_link
            .send_single(NetUserId::HOST, &Message::Screen(packet).encode(), true)
            .unwrap();
        host.poll_lobby(&mut host_link).unwrap();
        let screens = host.take_screens();
        assert_eq!(screens.len(), 1);
        assert_eq!(screens[0].chat(), "ready");

        host.send_screen(&mut host_link, SlotMask::EMPTY, "go").unwrap();
        let Message::Screen(echo) = read_from_host(&mut client_link) else {
            panic!("expected a screen packet");
        };
        assert_eq!(echo.slot(), Some(ParticipantSlot::HOST));
        assert_eq!(echo.chat(), "go");
    }

    #[test]
    fn test_wait_for_participants() {
        let (mut host, mut host_link, _client_link) = host_with_raw_client();
        let present = host
            .wait_for_participants(&mut host_link, 2, Duration::from_millis(50))
            .unwrap();
        assert_eq!(present, 2);
        let present = host
            .wait_for_participants(&mut host_link, 3, Duration::from_millis(10))
            .unwrap();
        assert_eq!(present, 2);
    }
}
