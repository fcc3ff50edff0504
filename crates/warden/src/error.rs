//! # Session Errors
//!
//! Everything here is fatal to the operation that returned it. A failed
//! exchange has already torn the session down by the time the caller sees
//! the error. Desync is not an error and never appears here.

use thiserror::Error;
use warden_lockstep::LockstepError;
use warden_replay::TurnFileError;
use warden_transport::TransportError;

use crate::config::ConfigError;

/// Session errors.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Host, join or link failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Turn exchange failure.
    #[error(transparent)]
    Lockstep(#[from] LockstepError),

    /// Turn file could not be written or read.
    #[error(transparent)]
    TurnFile(#[from] TurnFileError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No session is running.
    #[error("no session in progress")]
    NotStarted,

    /// A session is already running.
    #[error("a session is already in progress")]
    AlreadyStarted,

    /// Recording and replaying in the same session, or switching mode once
    /// the turn stream has started.
    #[error("turn file already in use: {0}")]
    PersistenceConflict(&'static str),

    /// The loaded turn file has no turn for this tick.
    #[error("replay finished before tick {tick}")]
    ReplayFinished {
        /// Tick that was requested.
        tick: u32,
    },

    /// A replay-only operation was called without a loaded turn file.
    #[error("no turn file loaded")]
    NotReplaying,
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
