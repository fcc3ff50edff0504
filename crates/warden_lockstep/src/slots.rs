//! # Slot Table
//!
//! Maps network identities to participant slots. A slot is handed out once
//! per session: when its participant leaves it turns computer-controlled and
//! is never given to anyone else.
//!
//! The table is also the [`TransportEvents`] handler passed to
//! `Transport::update`; joins and drops are queued here for the exchange to
//! act on afterwards.

use tracing::{error, info, warn};
use warden_transport::{DropReason, NetUserId, Role, TransportEvents};

use crate::error::{LockstepError, LockstepResult};
use crate::record::{ParticipantSlot, SlotMask, MAX_SLOTS};

/// Participant bookkeeping for one session.
#[derive(Debug)]
pub struct SlotTable {
    role: Role,
    local: Option<ParticipantSlot>,
    users: [Option<NetUserId>; MAX_SLOTS],
    /// Slots ever handed out this session.
    used: SlotMask,
    /// Slots whose human participant is present.
    active: SlotMask,
    computer: SlotMask,
    spectators: SlotMask,
    accepting: bool,
    host_lost: bool,
    joined: Vec<(NetUserId, ParticipantSlot)>,
    dropped: Vec<(NetUserId, ParticipantSlot, DropReason)>,
}

impl SlotTable {
    /// Table for the host, which owns slot 0.
    #[must_use]
    pub fn for_host() -> Self {
        let mut table = Self::empty(Role::Host);
        table.occupy(ParticipantSlot::HOST, NetUserId::HOST);
        table.local = Some(ParticipantSlot::HOST);
        table.accepting = true;
        table
    }

    /// Table for a client, which learns its slot from the host.
    #[must_use]
    pub fn for_client() -> Self {
        Self::empty(Role::Client)
    }

    fn empty(role: Role) -> Self {
        Self {
            role,
            local: None,
            users: [None; MAX_SLOTS],
            used: SlotMask::EMPTY,
            active: SlotMask::EMPTY,
            computer: SlotMask::EMPTY,
            spectators: SlotMask::EMPTY,
            accepting: false,
            host_lost: false,
            joined: Vec::new(),
            dropped: Vec::new(),
        }
    }

    fn occupy(&mut self, slot: ParticipantSlot, user: NetUserId) {
        self.users[slot.index()] = Some(user);
        self.used.insert(slot);
        self.active.insert(slot);
        self.computer.remove(slot);
    }

    /// Gives `user` the lowest slot never used this session.
    ///
    /// # Errors
    ///
    /// [`LockstepError::CapacityExceeded`] when every slot was handed out.
    pub fn assign(&mut self, user: NetUserId) -> LockstepResult<ParticipantSlot> {
        if let Some(slot) = self.slot_of(user) {
            return Ok(slot);
        }
        let slot = ParticipantSlot::all()
            .find(|slot| !self.used.contains(*slot))
            .ok_or(LockstepError::CapacityExceeded { max: MAX_SLOTS })?;
        self.occupy(slot, user);
        Ok(slot)
    }

    /// Frees `user`'s slot and marks it computer-controlled.
    pub fn release(&mut self, user: NetUserId) -> Option<ParticipantSlot> {
        let slot = self.slot_of(user)?;
        self.users[slot.index()] = None;
        self.active.remove(slot);
        self.computer.insert(slot);
        Some(slot)
    }

    /// Records the slot the host assigned to us.
    pub fn set_local(&mut self, slot: ParticipantSlot, user: NetUserId) {
        self.occupy(slot, user);
        self.local = Some(slot);
    }

    /// Adopts the host's view of which slots are human and which are
    /// computer-controlled.
    pub fn apply_masks(&mut self, active: SlotMask, computer: SlotMask) {
        self.active = active;
        self.computer = computer;
        self.used = self.used.union(active).union(computer);
    }

    /// Slot of `user`.
    #[must_use]
    pub fn slot_of(&self, user: NetUserId) -> Option<ParticipantSlot> {
        ParticipantSlot::all().find(|slot| self.users[slot.index()] == Some(user))
    }

    /// User in `slot`, when known to this endpoint.
    #[must_use]
    pub fn user_of(&self, slot: ParticipantSlot) -> Option<NetUserId> {
        self.users[slot.index()]
    }

    /// Our own slot.
    #[must_use]
    pub const fn local_slot(&self) -> Option<ParticipantSlot> {
        self.local
    }

    /// Endpoint role.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Slots with a human participant present.
    #[must_use]
    pub const fn active(&self) -> SlotMask {
        self.active
    }

    /// Human slots other than our own.
    #[must_use]
    pub fn remote_active(&self) -> SlotMask {
        match self.local {
            Some(local) => {
                let mut mask = self.active;
                mask.remove(local);
                mask
            }
            None => self.active,
        }
    }

    /// Slots taken over by the computer.
    #[must_use]
    pub const fn computer(&self) -> SlotMask {
        self.computer
    }

    /// Slots marked as spectators.
    #[must_use]
    pub const fn spectators(&self) -> SlotMask {
        self.spectators
    }

    /// Marks or unmarks `slot` as a spectator.
    pub fn set_spectator(&mut self, slot: ParticipantSlot, spectator: bool) {
        if spectator {
            self.spectators.insert(slot);
        } else {
            self.spectators.remove(slot);
        }
    }

    /// Whether new connections get a slot.
    pub fn set_accepting(&mut self, accepting: bool) {
        self.accepting = accepting;
    }

    /// Returns true once a client's host went away.
    #[must_use]
    pub const fn host_lost(&self) -> bool {
        self.host_lost
    }

    /// Joins since the last call.
    pub fn take_joined(&mut self) -> Vec<(NetUserId, ParticipantSlot)> {
        std::mem::take(&mut self.joined)
    }

    /// Drops since the last call.
    pub fn take_dropped(&mut self) -> Vec<(NetUserId, ParticipantSlot, DropReason)> {
        std::mem::take(&mut self.dropped)
    }
}

impl TransportEvents for SlotTable {
    fn on_new_user(&mut self, user: NetUserId) -> Option<u8> {
        match self.role {
            Role::Host if !self.accepting => {
                warn!("{} connected after the session started", user);
                None
            }
            Role::Host => match self.assign(user) {
                Ok(slot) => {
                    self.joined.push((user, slot));
                    Some(slot.index() as u8)
                }
                Err(e) => {
                    error!("{} refused: {}", user, e);
                    None
                }
            },
            Role::Client if user.is_host() => {
                self.users[ParticipantSlot::HOST.index()] = Some(user);
                self.used.insert(ParticipantSlot::HOST);
                self.active.insert(ParticipantSlot::HOST);
                Some(0)
            }
            Role::Client => None,
        }
    }

    fn on_drop(&mut self, user: NetUserId, reason: DropReason) {
        if self.role == Role::Client && user.is_host() {
            warn!("host {}", reason);
            self.host_lost = true;
        }
        if let Some(slot) = self.release(user) {
            info!("{} in {} {}; slot is now computer-controlled", user, slot, reason);
            self.dropped.push((user, slot, reason));
        }
    }
}
