//! # Lockstep Errors
//!
//! Everything here ends the session. Desync is deliberately absent: it is
//! reported through [`crate::DesyncReport`] and play continues.

use std::time::Duration;

use thiserror::Error;
use warden_transport::TransportError;

/// Lockstep errors.
#[derive(Error, Debug)]
pub enum LockstepError {
    /// Transport failure outside a tick (lobby, welcome, screen packets).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Transport failure while exchanging a tick.
    #[error("exchange for tick {tick} failed: {source}")]
    Exchange {
        /// Tick being exchanged.
        tick: u32,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },

    /// The client lost its host.
    #[error("connection to the host was lost at tick {tick}")]
    HostLost {
        /// Tick being exchanged.
        tick: u32,
    },

    /// The host never delivered the tick's RecordSet.
    #[error("no RecordSet for tick {tick} within {waited:?}")]
    Timeout {
        /// Tick being exchanged.
        tick: u32,
        /// How long we waited.
        waited: Duration,
    },

    /// Ticks must be exchanged strictly in order.
    #[error("tick {got} exchanged out of order (expected {expected})")]
    OutOfOrder {
        /// Tick the exchange is at.
        expected: u32,
        /// Tick that was asked for or received.
        got: u32,
    },

    /// Every participant slot is taken.
    #[error("all {max} participant slots are taken")]
    CapacityExceeded {
        /// Slot capacity.
        max: usize,
    },

    /// A message could not be decoded.
    #[error("malformed {what}: {len} bytes")]
    Malformed {
        /// What was being decoded.
        what: &'static str,
        /// Length received.
        len: usize,
    },

    /// Host and client speak different protocol versions.
    #[error("protocol version {remote} does not match ours ({local})")]
    ProtocolMismatch {
        /// Our version.
        local: u16,
        /// Peer's version.
        remote: u16,
    },

    /// The host never assigned us a slot.
    #[error("no slot assignment from the host within {0:?}")]
    WelcomeTimeout(Duration),

    /// Operation requires a slot assignment first.
    #[error("no participant slot assigned yet")]
    NotWelcomed,
}

/// Result type for lockstep operations.
pub type LockstepResult<T> = Result<T, LockstepError>;
