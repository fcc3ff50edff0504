//! # Wire Messages
//!
//! Every message is one kind byte followed by a fixed-size `repr(C)` body:
//!
//! ```text
//! ┌──────┬──────────────────────────────────────────────┐
//! │ kind │ body (little-endian, no per-field framing)   │
//! ├──────┼──────────────────────────────────────────────┤
//! │  1   │ Welcome        8 bytes   host -> client      │
//! │  2   │ RecordBody    36 bytes   client -> host      │
//! │  3   │ RecordSetBody 128 bytes  host -> all         │
//! │  4   │ ScreenPacket  70 bytes   any -> host -> all  │
//! └──────┴──────────────────────────────────────────────┘
//! ```
//!
//! The decoder checks the exact length for the kind, so a truncated or
//! padded datagram is rejected instead of half-read.

use bytemuck::{Pod, Zeroable};

use crate::error::{LockstepError, LockstepResult};
use crate::record::{ParticipantSlot, Record, RecordSet, SlotMask};

/// Version carried by [`Welcome`] and [`ScreenPacket`].
pub const PROTOCOL_VERSION: u16 = 1;

/// Longest chat line in a [`ScreenPacket`].
pub const MAX_CHAT_LEN: usize = 64;

const KIND_WELCOME: u8 = 1;
const KIND_RECORD: u8 = 2;
const KIND_RECORD_SET: u8 = 3;
const KIND_SCREEN: u8 = 4;

/// Slot assignment sent by the host once a connection is accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Welcome {
    /// Host's protocol version.
    pub protocol_version: u16,
    slot: u8,
    _pad: u8,
    /// Level the host is running.
    pub session_level_id: u32,
}

impl Welcome {
    /// Welcome for `slot`.
    #[must_use]
    pub fn new(slot: ParticipantSlot, session_level_id: u32) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            slot: slot.index() as u8,
            _pad: 0,
            session_level_id,
        }
    }

    /// Assigned slot, `None` when out of range.
    #[must_use]
    pub fn slot(&self) -> Option<ParticipantSlot> {
        ParticipantSlot::new(usize::from(self.slot))
    }
}

/// One participant's record for one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct RecordBody {
    /// Tick the record belongs to.
    pub tick: u32,
    slot: u8,
    _pad: [u8; 3],
    /// The record.
    pub record: Record,
}

impl RecordBody {
    /// Wraps `record` from `slot`.
    #[must_use]
    pub fn new(tick: u32, slot: ParticipantSlot, record: Record) -> Self {
        Self {
            tick,
            slot: slot.index() as u8,
            _pad: [0; 3],
            record,
        }
    }

    /// Sender's slot as claimed by the sender.
    #[must_use]
    pub fn slot(&self) -> Option<ParticipantSlot> {
        ParticipantSlot::new(usize::from(self.slot))
    }
}

/// The sealed set for one tick plus the slot masks behind it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct RecordSetBody {
    /// Tick of the set.
    pub tick: u32,
    contributors: u8,
    computer: u8,
    relinquished: u8,
    timed_out: u8,
    /// The set.
    pub set: RecordSet,
}

impl RecordSetBody {
    /// Wraps a sealed set.
    #[must_use]
    pub fn new(
        tick: u32,
        set: RecordSet,
        contributors: SlotMask,
        computer: SlotMask,
        relinquished: SlotMask,
        timed_out: bool,
    ) -> Self {
        Self {
            tick,
            contributors: contributors.bits(),
            computer: computer.bits(),
            relinquished: relinquished.bits(),
            timed_out: u8::from(timed_out),
            set,
        }
    }

    /// Slots whose human record is in the set.
    #[must_use]
    pub const fn contributors(&self) -> SlotMask {
        SlotMask::from_bits(self.contributors)
    }

    /// Computer-controlled slots.
    #[must_use]
    pub const fn computer(&self) -> SlotMask {
        SlotMask::from_bits(self.computer)
    }

    /// Slots whose record was substituted this tick.
    #[must_use]
    pub const fn relinquished(&self) -> SlotMask {
        SlotMask::from_bits(self.relinquished)
    }

    /// Returns true when the host gave up waiting on someone.
    #[must_use]
    pub const fn timed_out(&self) -> bool {
        self.timed_out != 0
    }
}

/// Lobby and chat state, relayed by the host outside the tick exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ScreenPacket {
    /// Sender's protocol version.
    pub protocol_version: u16,
    slot: u8,
    /// Bit per slot the sender is allied with.
    pub alliance_mask: u8,
    chat_len: u8,
    _pad: u8,
    chat: [u8; MAX_CHAT_LEN],
}

impl Default for ScreenPacket {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl ScreenPacket {
    /// Packet from `slot`. Chat longer than [`MAX_CHAT_LEN`] bytes is cut at
    /// the last character boundary that fits.
    #[must_use]
    pub fn new(slot: ParticipantSlot, alliance: SlotMask, chat: &str) -> Self {
        let mut end = chat.len().min(MAX_CHAT_LEN);
        while !chat.is_char_boundary(end) {
            end -= 1;
        }
        let mut packet = Self {
            protocol_version: PROTOCOL_VERSION,
            slot: slot.index() as u8,
            alliance_mask: alliance.bits(),
            chat_len: end as u8,
            ..Self::default()
        };
        packet.chat[..end].copy_from_slice(&chat.as_bytes()[..end]);
        packet
    }

    /// Sender's slot.
    #[must_use]
    pub fn slot(&self) -> Option<ParticipantSlot> {
        ParticipantSlot::new(usize::from(self.slot))
    }

    /// Chat line; empty when the bytes are not valid UTF-8.
    #[must_use]
    pub fn chat(&self) -> &str {
        let len = usize::from(self.chat_len).min(MAX_CHAT_LEN);
        std::str::from_utf8(&self.chat[..len]).unwrap_or_default()
    }
}

/// A decoded lockstep message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Message {
    /// Slot assignment.
    Welcome(Welcome),
    /// A participant's record.
    Record(RecordBody),
    /// The sealed set for a tick.
    RecordSet(RecordSetBody),
    /// Lobby or chat update.
    Screen(ScreenPacket),
}

impl Message {
    /// Largest encoded message.
    pub const MAX_SIZE: usize = 1 + std::mem::size_of::<RecordSetBody>();

    /// Kind byte plus body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let (kind, body) = match self {
            Self::Welcome(body) => (KIND_WELCOME, bytemuck::bytes_of(body)),
            Self::Record(body) => (KIND_RECORD, bytemuck::bytes_of(body)),
            Self::RecordSet(body) => (KIND_RECORD_SET, bytemuck::bytes_of(body)),
            Self::Screen(body) => (KIND_SCREEN, bytemuck::bytes_of(body)),
        };
        let mut bytes = Vec::with_capacity(1 + body.len());
        bytes.push(kind);
        bytes.extend_from_slice(body);
        bytes
    }

    /// Decodes one message.
    ///
    /// # Errors
    ///
    /// [`LockstepError::Malformed`] for an unknown kind or a body of the
    /// wrong length.
    pub fn decode(bytes: &[u8]) -> LockstepResult<Self> {
        let Some((&kind, body)) = bytes.split_first() else {
            return Err(LockstepError::Malformed { what: "message", len: 0 });
        };
        match kind {
            KIND_WELCOME => read_body(body, "welcome").map(Self::Welcome),
            KIND_RECORD => read_body(body, "record").map(Self::Record),
            KIND_RECORD_SET => read_body(body, "record set").map(Self::RecordSet),
            KIND_SCREEN => read_body(body, "screen packet").map(Self::Screen),
            _ => Err(LockstepError::Malformed { what: "message kind", len: bytes.len() }),
        }
    }
}

fn read_body<T: Pod>(body: &[u8], what: &'static str) -> LockstepResult<T> {
    if body.len() == std::mem::size_of::<T>() {
        Ok(bytemuck::pod_read_unaligned(body))
    } else {
        Err(LockstepError::Malformed { what, len: body.len() })
    }
}

const _: () = assert!(std::mem::size_of::<Welcome>() == 8);
const _: () = assert!(std::mem::size_of::<RecordBody>() == 36);
const _: () = assert!(std::mem::size_of::<RecordSetBody>() == 128);
const _: () = assert!(std::mem::size_of::<ScreenPacket>() == 70);
const _: () = assert!(Message::MAX_SIZE <= warden_transport::MAX_PAYLOAD_SIZE);

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(index: usize) -> ParticipantSlot {
        ParticipantSlot::new(index).unwrap()
    }

    #[test]
    fn test_record_message_layout() {
        let record = Record::new(12, 3, [4, 5, 6, 7], Record::CONTROL_RIGHT_HELD, 0xDEAD);
        let bytes = Message::Record(RecordBody::new(12, slot(2), record)).encode();
        assert_eq!(bytes.len(), 37);
        assert_eq!(bytes[0], KIND_RECORD);
        assert_eq!(&bytes[1..5], &12u32.to_le_bytes());
        assert_eq!(bytes[5], 2);

        let Message::Record(body) = Message::decode(&bytes).unwrap() else {
            panic!("expected a record");
        };
        assert_eq!(body.slot(), Some(slot(2)));
        assert_eq!(body.record, record);
    }

    #[test]
    fn test_record_set_masks() {
        let mut set = RecordSet::default();
        set.set(slot(1), Record::relinquish(3));
        set.seal();
        let computer = SlotMask::from_bits(0b0010);
        let body = RecordSetBody::new(3, set, SlotMask::from_bits(0b0001), computer, computer, true);

        let Message::RecordSet(decoded) = Message::decode(&Message::RecordSet(body).encode()).unwrap() else {
            panic!("expected a record set");
        };
        assert_eq!(decoded.contributors().bits(), 0b0001);
        assert_eq!(decoded.relinquished(), computer);
        assert!(decoded.timed_out());
        assert!(decoded.set.is_sealed());
    }

    #[test]
    fn test_wrong_length_rejected() {
        let mut bytes = Message::Welcome(Welcome::new(slot(1), 7)).encode();
        bytes.push(0);
        assert!(matches!(
            Message::decode(&bytes),
            Err(LockstepError::Malformed { what: "welcome", len: 9 })
        ));
        assert!(Message::decode(&[]).is_err());
        assert!(Message::decode(&[200, 1, 2]).is_err());
    }

    #[test]
    fn test_chat_truncated_on_char_boundary() {
        let long = "é".repeat(40);
        let packet = ScreenPacket::new(slot(0), SlotMask::EMPTY, &long);
        assert_eq!(packet.chat().len(), 64);
        assert!(packet.chat().chars().all(|c| c == 'é'));

        let short = ScreenPacket::new(slot(3), SlotMask::from_bits(0b1001), "gg");
        assert_eq!(short.chat(), "gg");
        assert_eq!(short.slot(), Some(slot(3)));
    }

    #[test]
    fn test_welcome_carries_version() {
        let welcome = Welcome::new(slot(3), 42);
        assert_eq!(welcome.protocol_version, PROTOCOL_VERSION);
        assert_eq!(welcome.slot(), Some(slot(3)));
        assert_eq!(welcome.session_level_id, 42);
    }
}
