//! Turn file header.

use bytemuck::{Pod, Zeroable};
use warden_lockstep::{RecordSet, SlotMask, MAX_SLOTS};

use crate::error::{TurnFileError, TurnFileResult};

/// Magic bytes identifying a turn file.
pub const TURN_FILE_MAGIC: [u8; 4] = *b"WTRN";

/// Current turn file format version.
pub const TURN_FILE_VERSION: u32 = 1;

/// Session metadata at the start of every turn file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct TurnFileHeader {
    magic: [u8; 4],
    version: u32,
    /// Level the session ran.
    pub session_level_id: u32,
    active_slot_mask: u8,
    spectator_slot_mask: u8,
    checksum_enabled: u8,
    max_slots: u8,
    record_size: u32,
    reserved: [u8; 8],
    header_crc: u32,
}

impl TurnFileHeader {
    /// Size of header in bytes.
    pub const SIZE: usize = 32;

    const CRC_RANGE: usize = Self::SIZE - 4;

    /// Header for a new recording.
    #[must_use]
    pub fn new(
        session_level_id: u32,
        active: SlotMask,
        spectators: SlotMask,
        checksum_enabled: bool,
    ) -> Self {
        let mut header = Self {
            magic: TURN_FILE_MAGIC,
            version: TURN_FILE_VERSION,
            session_level_id,
            active_slot_mask: active.bits(),
            spectator_slot_mask: spectators.bits(),
            checksum_enabled: u8::from(checksum_enabled),
            max_slots: MAX_SLOTS as u8,
            record_size: RecordSet::SIZE as u32,
            reserved: [0; 8],
            header_crc: 0,
        };
        header.header_crc = header.compute_crc();
        header
    }

    /// Slots present when recording started.
    #[must_use]
    pub const fn active_slots(&self) -> SlotMask {
        SlotMask::from_bits(self.active_slot_mask)
    }

    /// Slots that only watched.
    #[must_use]
    pub const fn spectator_slots(&self) -> SlotMask {
        SlotMask::from_bits(self.spectator_slot_mask)
    }

    /// Whether each turn's aggregate checksum is verified on read.
    #[must_use]
    pub const fn checksum_enabled(&self) -> bool {
        self.checksum_enabled != 0
    }

    /// CRC32 over every header byte before the CRC field.
    #[must_use]
    pub fn compute_crc(&self) -> u32 {
        crc32fast::hash(&bytemuck::bytes_of(self)[..Self::CRC_RANGE])
    }

    /// Serializes the header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        bytemuck::cast(*self)
    }

    /// Parses and validates a header.
    ///
    /// # Errors
    ///
    /// `BadMagic`, `UnsupportedVersion`, `HeaderChecksum` or
    /// `LayoutMismatch`, checked in that order.
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> TurnFileResult<Self> {
        let header: Self = bytemuck::pod_read_unaligned(bytes);
        if header.magic != TURN_FILE_MAGIC {
            return Err(TurnFileError::BadMagic(header.magic));
        }
        if header.version != TURN_FILE_VERSION {
            return Err(TurnFileError::UnsupportedVersion(header.version));
        }
        let computed = header.compute_crc();
        if header.header_crc != computed {
            return Err(TurnFileError::HeaderChecksum {
                stored: header.header_crc,
                computed,
            });
        }
        if usize::from(header.max_slots) != MAX_SLOTS || header.record_size as usize != RecordSet::SIZE {
            return Err(TurnFileError::LayoutMismatch {
                slots: header.max_slots,
                record_size: header.record_size,
            });
        }
        Ok(header)
    }
}

const _: () = assert!(std::mem::size_of::<TurnFileHeader>() == TurnFileHeader::SIZE);

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TurnFileHeader {
        TurnFileHeader::new(42, SlotMask::from_bits(0b0111), SlotMask::from_bits(0b0100), true)
    }

    #[test]
    fn test_header_round_trip() {
        let header = sample();
        let bytes = header.to_bytes();
        assert_eq!(&bytes[..4], b"WTRN");
        let parsed = TurnFileHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.active_slots().count(), 3);
        assert!(parsed.checksum_enabled());
    }

    #[test]
    fn test_header_rejections() {
        let mut bytes = sample().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(TurnFileHeader::from_bytes(&bytes), Err(TurnFileError::BadMagic(_))));

        let mut bytes = sample().to_bytes();
        bytes[4] = 9;
        assert!(matches!(
            TurnFileHeader::from_bytes(&bytes),
            Err(TurnFileError::UnsupportedVersion(9))
        ));

        let mut bytes = sample().to_bytes();
        bytes[8] ^= 0xFF;
        assert!(matches!(
            TurnFileHeader::from_bytes(&bytes),
            Err(TurnFileError::HeaderChecksum { .. })
        ));
    }

    #[test]
    fn test_layout_mismatch_detected() {
        let mut header = sample();
        header.record_size = 64;
        header.header_crc = header.compute_crc();
        assert!(matches!(
            TurnFileHeader::from_bytes(&header.to_bytes()),
            Err(TurnFileError::LayoutMismatch { record_size: 64, .. })
        ));
    }
}
