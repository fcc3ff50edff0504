//! # Turn Writer
//!
//! Appends one sealed [`RecordSet`] per tick. Every append is flushed before
//! it returns, so a crash loses at most the turn being written; with
//! `durable` set the data is also synced to the device.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use warden_lockstep::RecordSet;

use crate::error::{TurnFileError, TurnFileResult};
use crate::header::TurnFileHeader;
use crate::{turn_offset, TURN_RECORD_SIZE};

/// Append-only turn file writer.
#[derive(Debug)]
pub struct TurnWriter {
    path: PathBuf,
    file: File,
    header: TurnFileHeader,
    turns: u32,
    durable: bool,
}

impl TurnWriter {
    /// Creates (or truncates) `path` and writes `header`.
    ///
    /// # Errors
    ///
    /// [`TurnFileError::Io`] when the file cannot be created or written.
    pub fn create(path: impl AsRef<Path>, header: TurnFileHeader, durable: bool) -> TurnFileResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::create(&path)?;
        file.write_all(&header.to_bytes())?;
        file.flush()?;
        if durable {
            file.sync_all()?;
        }
        info!("recording turns to {}", path.display());
        Ok(Self {
            path,
            file,
            header,
            turns: 0,
            durable,
        })
    }

    /// Reopens an existing turn file to continue recording after its last
    /// complete turn.
    ///
    /// # Errors
    ///
    /// Header validation errors, or [`TurnFileError::Corrupt`] when the file
    /// ends inside a turn.
    pub fn resume(path: impl AsRef<Path>, durable: bool) -> TurnFileResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut bytes = [0u8; TurnFileHeader::SIZE];
        file.read_exact(&mut bytes)?;
        let header = TurnFileHeader::from_bytes(&bytes)?;

        let len = file.metadata()?.len();
        let body = len.saturating_sub(TurnFileHeader::SIZE as u64);
        let turns = u32::try_from(body / TURN_RECORD_SIZE as u64).unwrap_or(u32::MAX);
        if body % TURN_RECORD_SIZE as u64 != 0 {
            return Err(TurnFileError::Corrupt {
                tick: turns,
                expected_offset: turn_offset(turns),
                actual: len,
            });
        }
        file.seek(SeekFrom::End(0))?;
        info!("resuming {} after {} turns", path.display(), turns);
        Ok(Self {
            path,
            file,
            header,
            turns,
            durable,
        })
    }

    /// Appends the set for the next tick and returns that tick.
    ///
    /// # Errors
    ///
    /// [`TurnFileError::OutOfSequence`] when the write position is not the
    /// end of the previous turn; [`TurnFileError::Io`] on write failure.
    pub fn append(&mut self, set: &RecordSet) -> TurnFileResult<u32> {
        let tick = self.turns;
        let expected_offset = turn_offset(tick);
        let actual = self.file.stream_position()?;
        if actual != expected_offset {
            return Err(TurnFileError::OutOfSequence {
                tick,
                expected_offset,
                actual,
            });
        }

        self.file.write_all(set.as_bytes())?;
        self.file.flush()?;
        if self.durable {
            self.file.sync_data()?;
        }
        self.turns += 1;
        debug!("turn {} written at offset {}", tick, expected_offset);
        Ok(tick)
    }

    /// Syncs everything to the device and closes the file.
    ///
    /// # Errors
    ///
    /// [`TurnFileError::Io`] when the sync fails.
    pub fn finish(mut self) -> TurnFileResult<u32> {
        self.file.flush()?;
        self.file.sync_all()?;
        info!("{} turns recorded to {}", self.turns, self.path.display());
        Ok(self.turns)
    }

    /// Turns written so far.
    #[must_use]
    pub const fn turns(&self) -> u32 {
        self.turns
    }

    /// Header written at creation.
    #[must_use]
    pub const fn header(&self) -> &TurnFileHeader {
        &self.header
    }

    /// File being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
