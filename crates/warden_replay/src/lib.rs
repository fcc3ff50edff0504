//! # WARDEN Replay
//!
//! Turn files: every sealed [`RecordSet`] of a session, one per tick, in a
//! layout where the position of any tick is arithmetic.
//!
//! ## File Format
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │ Header (32 bytes)                                  │
//! ├────────────────────────────────────────────────────┤
//! │ Magic "WTRN" │ Version │ Level │ Masks │ CRC32 ... │
//! ├────────────────────────────────────────────────────┤
//! │ Turn 0: RecordSet (120 bytes, big checksum last)   │
//! ├────────────────────────────────────────────────────┤
//! │ Turn 1: RecordSet (120 bytes)                      │
//! ├────────────────────────────────────────────────────┤
//! │ ...                                                │
//! └────────────────────────────────────────────────────┘
//!
//! offset(n) = 32 + n * 120
//! ```
//!
//! Used for save-for-replay, disconnect recovery and demo playback. A file is
//! written by a [`TurnWriter`] or read by a [`TurnReader`], never both at once.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod header;
pub mod reader;
pub mod writer;

pub use error::{TurnFileError, TurnFileResult};
pub use header::{TurnFileHeader, TURN_FILE_MAGIC, TURN_FILE_VERSION};
pub use reader::TurnReader;
pub use writer::TurnWriter;

use warden_lockstep::RecordSet;

/// Size of one turn entry on disk.
pub const TURN_RECORD_SIZE: usize = RecordSet::SIZE;

/// Byte offset of turn `tick`.
#[inline]
#[must_use]
pub const fn turn_offset(tick: u32) -> u64 {
    TurnFileHeader::SIZE as u64 + tick as u64 * TURN_RECORD_SIZE as u64
}
