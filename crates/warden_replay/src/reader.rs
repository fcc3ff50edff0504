//! # Turn Reader
//!
//! Random access by tick: the offset of tick `n` is computed from the fixed
//! entry size, the reader seeks there and reads exactly one entry. If the
//! file is not where the layout says it should be, that is corruption. The
//! reader never scans for the next plausible entry.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use warden_lockstep::RecordSet;

use crate::error::{TurnFileError, TurnFileResult};
use crate::header::TurnFileHeader;
use crate::{turn_offset, TURN_RECORD_SIZE};

/// Turn file reader with a sequential cursor.
#[derive(Debug)]
pub struct TurnReader {
    path: PathBuf,
    file: File,
    header: TurnFileHeader,
    cursor: u32,
}

impl TurnReader {
    /// Opens `path` and validates its header.
    ///
    /// # Errors
    ///
    /// Header validation errors; [`TurnFileError::Corrupt`] when the file is
    /// shorter than a header.
    pub fn open(path: impl AsRef<Path>) -> TurnFileResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;

        let mut bytes = [0u8; TurnFileHeader::SIZE];
        if let Err(e) = file.read_exact(&mut bytes) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return Err(TurnFileError::Corrupt {
                    tick: 0,
                    expected_offset: TurnFileHeader::SIZE as u64,
                    actual: file.metadata()?.len(),
                });
            }
            return Err(e.into());
        }
        let header = TurnFileHeader::from_bytes(&bytes)?;

        let reader = Self {
            path,
            file,
            header,
            cursor: 0,
        };
        let turns = reader.turn_count()?;
        info!(
            "opened {}: level {}, {} turns",
            reader.path.display(),
            header.session_level_id,
            turns
        );
        Ok(reader)
    }

    /// Complete turns currently in the file.
    ///
    /// # Errors
    ///
    /// [`TurnFileError::Io`] when the file length cannot be read.
    pub fn turn_count(&self) -> TurnFileResult<u32> {
        let body = self.len()?.saturating_sub(TurnFileHeader::SIZE as u64);
        Ok(u32::try_from(body / TURN_RECORD_SIZE as u64).unwrap_or(u32::MAX))
    }

    fn len(&self) -> TurnFileResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Reads the set recorded for `tick`; `None` past the last turn.
    ///
    /// # Errors
    ///
    /// - [`TurnFileError::Corrupt`] for a partial entry or a position that
    ///   does not match the layout
    /// - [`TurnFileError::ChecksumMismatch`] when checksums are enabled and
    ///   the entry fails its aggregate
    pub fn read_turn(&mut self, tick: u32) -> TurnFileResult<Option<RecordSet>> {
        let expected_offset = turn_offset(tick);
        let end = expected_offset + TURN_RECORD_SIZE as u64;
        let len = self.len()?;

        let aligned = (len.saturating_sub(TurnFileHeader::SIZE as u64)) % TURN_RECORD_SIZE as u64 == 0;
        if expected_offset >= len && aligned {
            return Ok(None);
        }
        if end > len {
            warn!("{} ends inside turn {}", self.path.display(), tick);
            return Err(TurnFileError::Corrupt { tick, expected_offset: end, actual: len });
        }

        let position = self.file.seek(SeekFrom::Start(expected_offset))?;
        if position != expected_offset {
            return Err(TurnFileError::Corrupt { tick, expected_offset, actual: position });
        }

        let mut bytes = [0u8; TURN_RECORD_SIZE];
        if let Err(e) = self.file.read_exact(&mut bytes) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return Err(TurnFileError::Corrupt {
                    tick,
                    expected_offset: end,
                    actual: self.file.stream_position()?,
                });
            }
            return Err(e.into());
        }
        let position = self.file.stream_position()?;
        if position != end {
            return Err(TurnFileError::Corrupt { tick, expected_offset: end, actual: position });
        }

        let set: RecordSet = bytemuck::pod_read_unaligned(&bytes);
        if self.header.checksum_enabled() && !set.is_sealed() {
            warn!("turn {} of {} fails its checksum", tick, self.path.display());
            return Err(TurnFileError::ChecksumMismatch { tick });
        }
        Ok(Some(set))
    }

    /// Reads the turn at the cursor and advances it.
    ///
    /// # Errors
    ///
    /// As [`TurnReader::read_turn`].
    pub fn next_turn(&mut self) -> TurnFileResult<Option<(u32, RecordSet)>> {
        let tick = self.cursor;
        let Some(set) = self.read_turn(tick)? else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some((tick, set)))
    }

    /// Moves the cursor to `tick`.
    pub fn seek_turn(&mut self, tick: u32) {
        self.cursor = tick;
    }

    /// Skips turns without input until one carries an action or control
    /// state in any slot, and returns it. The cursor ends after that turn.
    ///
    /// # Errors
    ///
    /// As [`TurnReader::read_turn`].
    pub fn fast_forward(&mut self) -> TurnFileResult<Option<(u32, RecordSet)>> {
        let start = self.cursor;
        while let Some((tick, set)) = self.next_turn()? {
            if set.has_input() {
                debug!("fast-forwarded over {} idle turns to tick {}", tick - start, tick);
                return Ok(Some((tick, set)));
            }
        }
        debug!("fast-forward reached the end after tick {}", self.cursor);
        Ok(None)
    }

    /// Next tick [`TurnReader::next_turn`] will read.
    #[must_use]
    pub const fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Header read at open.
    #[must_use]
    pub const fn header(&self) -> &TurnFileHeader {
        &self.header
    }

    /// File being read.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
