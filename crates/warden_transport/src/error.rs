//! # Transport Errors
//!
//! Session-start failures (`Init`, `Host`, `Join`) and mid-session send/poll
//! failures. Every variant carries enough context to diagnose after the fact.

use std::io;

use thiserror::Error;

use crate::peer::NetUserId;

/// Why a join attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinFailure {
    /// The session spec could not be parsed or resolved to an address.
    Resolve,
    /// The local endpoint could not be bound.
    Bind,
    /// No connection acknowledgement arrived before the join timeout.
    TimedOut,
    /// The host answered with a disconnect (full, or refused the connection).
    Refused,
}

impl std::fmt::Display for JoinFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Resolve => "address resolution failed",
            Self::Bind => "local bind failed",
            Self::TimedOut => "timed out waiting for the host",
            Self::Refused => "host refused the connection",
        };
        f.write_str(text)
    }
}

/// Transport errors.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Transport could not initialize.
    #[error("transport init failed: {reason}")]
    Init {
        /// What went wrong.
        reason: String,
    },

    /// Listening endpoint could not be opened.
    #[error("cannot host on {bind}: {source}")]
    Host {
        /// Address we tried to bind.
        bind: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// Joining a remote session failed.
    #[error("cannot join {spec}: {failure}")]
    Join {
        /// Session spec as given by the caller.
        spec: String,
        /// Failure class.
        failure: JoinFailure,
    },

    /// Operation requires an active host or client endpoint.
    #[error("transport is not hosting or joined")]
    NotActive,

    /// The peer is not connected.
    #[error("unknown peer {0}")]
    UnknownPeer(NetUserId),

    /// Payload does not fit into one datagram.
    #[error("payload of {len} bytes exceeds the {max}-byte datagram budget")]
    PayloadTooLarge {
        /// Payload length.
        len: usize,
        /// Largest payload accepted.
        max: usize,
    },

    /// Socket failure while sending or polling.
    #[error("{operation} failed: {source}")]
    Io {
        /// Operation that failed (`send`, `poll`, ...).
        operation: &'static str,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    /// Wraps a socket error with the operation that produced it.
    #[must_use]
    pub fn io(operation: &'static str, source: io::Error) -> Self {
        Self::Io { operation, source }
    }

    /// Returns true for errors raised while a session is being started.
    #[must_use]
    pub const fn is_session_start(&self) -> bool {
        matches!(self, Self::Init { .. } | Self::Host { .. } | Self::Join { .. })
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_error_message() {
        let err = TransportError::Join {
            spec: "127.0.0.1:9".to_string(),
            failure: JoinFailure::TimedOut,
        };
        assert_eq!(
            err.to_string(),
            "cannot join 127.0.0.1:9: timed out waiting for the host"
        );
        assert!(err.is_session_start());
    }

    #[test]
    fn test_io_error_is_mid_session() {
        let err = TransportError::io("send", io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(!err.is_session_start());
        assert!(err.to_string().starts_with("send failed"));
    }
}
