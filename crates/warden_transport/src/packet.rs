//! # Datagram Format
//!
//! Every datagram starts with a fixed 12-byte header followed by the payload.
//!
//! ```text
//! ┌──────┬─────────┬──────────┬──────────────┬──────────────┬─────────────┐
//! │ kind │ channel │ sequence │ token (u32)  │ stamp (u32)  │ payload ... │
//! │  u8  │   u8    │   u16    │              │              │             │
//! └──────┴─────────┴──────────┴──────────────┴──────────────┴─────────────┘
//! ```
//!
//! The token identifies one connection; datagrams carrying a stale token are
//! ignored. Fields are laid out in host byte order.

use bytemuck::{Pod, Zeroable};

use crate::MAX_PACKET_SIZE;

/// Datagram kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// Client asks to connect.
    Connect = 1,
    /// Host accepts; payload is the assigned user id.
    ConnectAck = 2,
    /// Either side leaves, or the host refuses.
    Disconnect = 3,
    /// Reliable ordered application data.
    Reliable = 4,
    /// Unreliable sequenced application data.
    Unreliable = 5,
    /// Acknowledges one reliable sequence number.
    Ack = 6,
    /// Keepalive carrying the sender's clock.
    Ping = 7,
    /// Keepalive reply echoing the ping clock.
    Pong = 8,
}

impl PacketKind {
    /// Parses the header kind byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Connect,
            2 => Self::ConnectAck,
            3 => Self::Disconnect,
            4 => Self::Reliable,
            5 => Self::Unreliable,
            6 => Self::Ack,
            7 => Self::Ping,
            8 => Self::Pong,
            _ => return None,
        })
    }
}

/// Fixed datagram header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct DatagramHeader {
    /// [`PacketKind`] as a byte.
    pub kind: u8,
    /// Reserved channel index, always 0.
    pub channel: u8,
    /// Sequence number on the reliable or unreliable channel.
    pub sequence: u16,
    /// Connection token chosen by the client.
    pub token: u32,
    /// Millisecond clock of the sender (ping) or echoed clock (pong).
    pub stamp: u32,
}

impl DatagramHeader {
    /// Header size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Creates a header.
    #[inline]
    #[must_use]
    pub const fn new(kind: PacketKind, sequence: u16, token: u32, stamp: u32) -> Self {
        Self {
            kind: kind as u8,
            channel: 0,
            sequence,
            token,
            stamp,
        }
    }

    /// Decoded kind, `None` for unknown bytes.
    #[inline]
    #[must_use]
    pub const fn packet_kind(&self) -> Option<PacketKind> {
        PacketKind::from_u8(self.kind)
    }
}

const _: () = assert!(DatagramHeader::SIZE == 12);

/// Builds a datagram from a header and payload.
#[must_use]
pub fn encode(header: &DatagramHeader, payload: &[u8]) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(DatagramHeader::SIZE + payload.len());
    datagram.extend_from_slice(bytemuck::bytes_of(header));
    datagram.extend_from_slice(payload);
    datagram
}

/// Splits a datagram into header and payload.
///
/// Returns `None` for runts, oversized datagrams and unknown kinds.
#[must_use]
pub fn decode(datagram: &[u8]) -> Option<(DatagramHeader, &[u8])> {
    if datagram.len() < DatagramHeader::SIZE || datagram.len() > MAX_PACKET_SIZE {
        return None;
    }
    let (head, payload) = datagram.split_at(DatagramHeader::SIZE);
    let header: DatagramHeader = bytemuck::pod_read_unaligned(head);
    header.packet_kind()?;
    Some((header, payload))
}

/// Returns true when sequence `a` is more recent than `b`, accounting for
/// wraparound.
#[inline]
#[must_use]
pub const fn sequence_greater_than(a: u16, b: u16) -> bool {
    a != b && a.wrapping_sub(b) < 32_768
}
