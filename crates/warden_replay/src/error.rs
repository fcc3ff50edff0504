//! # Turn File Errors
//!
//! Any of these ends replay or recovery of that file. The rest of the
//! session is unaffected.

use std::io;

use thiserror::Error;

/// Turn file errors.
#[derive(Error, Debug)]
pub enum TurnFileError {
    /// Underlying file operation failed.
    #[error("turn file I/O failed: {0}")]
    Io(#[from] io::Error),

    /// Not a turn file.
    #[error("not a turn file (magic {0:02x?})")]
    BadMagic([u8; 4]),

    /// Written by a newer or older format.
    #[error("unsupported turn file version {0}")]
    UnsupportedVersion(u32),

    /// Header bytes do not match their CRC.
    #[error("turn file header CRC mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    HeaderChecksum {
        /// CRC stored in the header.
        stored: u32,
        /// CRC of the header bytes as read.
        computed: u32,
    },

    /// Written with a different slot count or record size.
    #[error("turn file layout mismatch: {slots} slots of {record_size} bytes")]
    LayoutMismatch {
        /// Slot count in the header.
        slots: u8,
        /// Record size in the header.
        record_size: u32,
    },

    /// The file is not where the layout says it should be.
    #[error("turn file corrupt at tick {tick}: expected offset {expected_offset}, found {actual}")]
    Corrupt {
        /// Tick being read.
        tick: u32,
        /// Offset the layout requires.
        expected_offset: u64,
        /// Offset or length actually found.
        actual: u64,
    },

    /// A turn's stored aggregate does not match its records.
    #[error("turn {tick} fails its checksum")]
    ChecksumMismatch {
        /// Tick of the bad turn.
        tick: u32,
    },

    /// Append landed somewhere other than the end of the last turn.
    #[error("append of tick {tick} at offset {actual}, expected {expected_offset}")]
    OutOfSequence {
        /// Tick being appended.
        tick: u32,
        /// Offset the layout requires.
        expected_offset: u64,
        /// Current write position.
        actual: u64,
    },
}

/// Result type for turn file operations.
pub type TurnFileResult<T> = Result<T, TurnFileError>;
