//! # Transport Configuration
//!
//! Loaded from the `[transport]` table of the session TOML file. Every field
//! has a default so a partial table is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TransportError, TransportResult};

/// Transport tuning knobs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Events dispatched per `update` call at most.
    pub max_events_per_update: usize,
    /// Connected peers accepted by a host at most.
    pub max_peers: usize,
    /// How long `join` waits for the host to acknowledge.
    pub join_timeout_ms: u64,
    /// Interval between connect request retransmissions.
    pub connect_retry_ms: u64,
    /// Lower bound for the reliable retransmission timeout.
    pub resend_timeout_ms: u64,
    /// Retransmissions of one reliable datagram before the peer is dropped.
    pub max_resends: u32,
    /// Silence after which a peer is considered gone.
    pub peer_timeout_ms: u64,
    /// Keepalive ping interval.
    pub ping_interval_ms: u64,
    /// Window over which packet loss is measured.
    pub loss_window_ms: u64,
    /// Upper bound for a blocking `read_message`.
    pub read_timeout_ms: u64,
    /// Sleep between socket polls inside bounded waits.
    pub poll_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_events_per_update: 64,
            max_peers: 16,
            join_timeout_ms: 5_000,
            connect_retry_ms: 250,
            resend_timeout_ms: 100,
            max_resends: 20,
            peer_timeout_ms: 5_000,
            ping_interval_ms: 500,
            loss_window_ms: 10_000,
            read_timeout_ms: 1_000,
            poll_interval_ms: 1,
        }
    }
}

impl TransportConfig {
    /// Rejects values that would make the transport spin or never dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Init`] naming the offending field.
    pub fn validate(&self) -> TransportResult<()> {
        let checks: [(&str, bool); 5] = [
            ("max_events_per_update", self.max_events_per_update > 0),
            ("max_peers", self.max_peers > 0),
            ("join_timeout_ms", self.join_timeout_ms > 0),
            ("peer_timeout_ms", self.peer_timeout_ms > 0),
            ("max_resends", self.max_resends > 0),
        ];
        match checks.iter().find(|(_, ok)| !ok) {
            Some((field, _)) => Err(TransportError::Init {
                reason: format!("{field} must be greater than zero"),
            }),
            None => Ok(()),
        }
    }

    /// Join timeout.
    #[must_use]
    pub const fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Connect retransmission interval.
    #[must_use]
    pub const fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }

    /// Minimum reliable retransmission timeout.
    #[must_use]
    pub const fn resend_timeout(&self) -> Duration {
        Duration::from_millis(self.resend_timeout_ms)
    }

    /// Peer silence timeout.
    #[must_use]
    pub const fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    /// Keepalive interval.
    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Packet loss measurement window.
    #[must_use]
    pub const fn loss_window(&self) -> Duration {
        Duration::from_millis(self.loss_window_ms)
    }

    /// Blocking read bound.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Sleep between polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
