//! # Records
//!
//! [`Record`] is one participant's input for one tick; [`RecordSet`] is every
//! slot's record for that tick plus the aggregate checksum. Both are plain
//! old data with a fixed `repr(C)` layout: the same bytes go on the wire and
//! into the turn file.

use std::fmt;

use bytemuck::{Pod, Zeroable};

/// Participant capacity of a session.
pub const MAX_SLOTS: usize = 4;

// Slot masks are a single byte.
const _: () = assert!(MAX_SLOTS <= 8);

/// Stable per-session participant index in `[0, MAX_SLOTS)`.
///
/// The host always owns slot 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantSlot(u8);

impl ParticipantSlot {
    /// The host's slot.
    pub const HOST: Self = Self(0);

    /// Slot for `index`, `None` when out of range.
    #[inline]
    #[must_use]
    pub const fn new(index: usize) -> Option<Self> {
        if index < MAX_SLOTS {
            Some(Self(index as u8))
        } else {
            None
        }
    }

    /// Slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Every slot in ascending order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..MAX_SLOTS as u8).map(Self)
    }
}

impl fmt::Display for ParticipantSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// Set of slots, one bit per slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SlotMask(u8);

impl SlotMask {
    /// No slots.
    pub const EMPTY: Self = Self(0);

    /// Mask from raw bits; bits beyond [`MAX_SLOTS`] are cleared.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::all_bits())
    }

    const fn all_bits() -> u8 {
        ((1u16 << MAX_SLOTS) - 1) as u8
    }

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Membership test.
    #[inline]
    #[must_use]
    pub const fn contains(self, slot: ParticipantSlot) -> bool {
        self.0 & (1 << slot.0) != 0
    }

    /// Adds a slot.
    #[inline]
    pub fn insert(&mut self, slot: ParticipantSlot) {
        self.0 |= 1 << slot.0;
    }

    /// Removes a slot.
    #[inline]
    pub fn remove(&mut self, slot: ParticipantSlot) {
        self.0 &= !(1 << slot.0);
    }

    /// Slots in `self` or `other`.
    #[inline]
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Slots in `self` but not in `other`.
    #[inline]
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Number of slots.
    #[inline]
    #[must_use]
    pub const fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Returns true when no slot is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Member slots in ascending order.
    pub fn iter(self) -> impl Iterator<Item = ParticipantSlot> {
        ParticipantSlot::all().filter(move |slot| self.contains(*slot))
    }

    /// Lowest member slot.
    #[must_use]
    pub fn first(self) -> Option<ParticipantSlot> {
        self.iter().next()
    }
}

impl FromIterator<ParticipantSlot> for SlotMask {
    fn from_iter<I: IntoIterator<Item = ParticipantSlot>>(iter: I) -> Self {
        let mut mask = Self::EMPTY;
        for slot in iter {
            mask.insert(slot);
        }
        mask
    }
}

/// One participant's input for one tick.
///
/// Size: 28 bytes. The all-zero value is the no-op record of an unoccupied
/// slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct Record {
    /// Tick this record belongs to.
    pub tick: u32,
    /// Simulation state checksum, opaque to this layer.
    pub checksum: u32,
    /// Action code, interpreted by the simulation.
    pub action: u16,
    /// Continuous control state (`CONTROL_*` bits).
    pub control: u16,
    /// Action parameters.
    pub params: [i32; 4],
}

impl Record {
    /// Record size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// No action.
    pub const ACTION_NONE: u16 = 0;
    /// Synthetic action: the participant left, its slot becomes
    /// computer-controlled.
    pub const ACTION_RELINQUISH: u16 = 0xFFFF;

    /// Left pointer button held.
    pub const CONTROL_LEFT_HELD: u16 = 1 << 0;
    /// Left pointer button clicked this tick.
    pub const CONTROL_LEFT_CLICKED: u16 = 1 << 1;
    /// Left pointer button released this tick.
    pub const CONTROL_LEFT_RELEASED: u16 = 1 << 2;
    /// Right pointer button held.
    pub const CONTROL_RIGHT_HELD: u16 = 1 << 3;
    /// Right pointer button clicked this tick.
    pub const CONTROL_RIGHT_CLICKED: u16 = 1 << 4;
    /// Right pointer button released this tick.
    pub const CONTROL_RIGHT_RELEASED: u16 = 1 << 5;
    /// Shift modifier.
    pub const CONTROL_SHIFT: u16 = 1 << 6;
    /// Control modifier.
    pub const CONTROL_CTRL: u16 = 1 << 7;
    /// Alt modifier.
    pub const CONTROL_ALT: u16 = 1 << 8;

    /// Record carrying an action.
    #[inline]
    #[must_use]
    pub const fn new(tick: u32, action: u16, params: [i32; 4], control: u16, checksum: u32) -> Self {
        Self {
            tick,
            checksum,
            action,
            control,
            params,
        }
    }

    /// No input, only the state checksum.
    #[inline]
    #[must_use]
    pub const fn noop(tick: u32, checksum: u32) -> Self {
        Self::new(tick, Self::ACTION_NONE, [0; 4], 0, checksum)
    }

    /// Substitute for a participant that left during `tick`.
    #[inline]
    #[must_use]
    pub const fn relinquish(tick: u32) -> Self {
        Self::new(tick, Self::ACTION_RELINQUISH, [0; 4], 0, 0)
    }

    /// Same record stamped with another tick.
    #[inline]
    #[must_use]
    pub const fn at_tick(mut self, tick: u32) -> Self {
        self.tick = tick;
        self
    }

    /// Returns true when neither an action nor any control state is set.
    #[inline]
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.action == Self::ACTION_NONE && self.control == 0
    }

    /// Returns true for the synthetic relinquish record.
    #[inline]
    #[must_use]
    pub const fn is_relinquish(&self) -> bool {
        self.action == Self::ACTION_RELINQUISH
    }
}

/// Every slot's record for one tick plus the aggregate checksum.
///
/// Size: `MAX_SLOTS * 28 + 8` bytes. Exchanged, persisted and consumed
/// whole.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct RecordSet {
    /// Records indexed by slot.
    pub records: [Record; MAX_SLOTS],
    /// Aggregate checksum, see [`RecordSet::compute_checksum`].
    pub checksum: u64,
}

const FNV_OFFSET: u64 = 0xCBF2_9CE4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

impl RecordSet {
    /// Serialized size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Record of `slot`.
    #[inline]
    #[must_use]
    pub fn get(&self, slot: ParticipantSlot) -> &Record {
        &self.records[slot.index()]
    }

    /// Replaces the record of `slot`.
    #[inline]
    pub fn set(&mut self, slot: ParticipantSlot, record: Record) {
        self.records[slot.index()] = record;
    }

    /// Records with their slots, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ParticipantSlot, &Record)> {
        ParticipantSlot::all().zip(self.records.iter())
    }

    /// FNV-1a over the bytes of all four records, in slot order.
    #[must_use]
    pub fn compute_checksum(&self) -> u64 {
        bytemuck::bytes_of(&self.records)
            .iter()
            .fold(FNV_OFFSET, |acc, &byte| (acc ^ u64::from(byte)).wrapping_mul(FNV_PRIME))
    }

    /// Stores the aggregate checksum.
    pub fn seal(&mut self) {
        self.checksum = self.compute_checksum();
    }

    /// Returns true when the stored aggregate matches the records.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// Returns true when any slot carries an action or control state.
    #[must_use]
    pub fn has_input(&self) -> bool {
        self.records.iter().any(|record| !record.is_idle())
    }

    /// Raw bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Reads a set from exactly [`RecordSet::SIZE`] bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        (bytes.len() == Self::SIZE).then(|| bytemuck::pod_read_unaligned(bytes))
    }
}

const _: () = assert!(Record::SIZE == 28);
const _: () = assert!(RecordSet::SIZE == MAX_SLOTS * Record::SIZE + 8);
