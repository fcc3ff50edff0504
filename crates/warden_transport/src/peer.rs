//! # Peers and Link Telemetry
//!
//! A [`Peer`] exists from the connect event until the disconnect event or an
//! explicit drop. Its [`LinkEstimator`] tracks round-trip time the same way
//! TCP does (smoothed mean plus mean deviation) and counts retransmissions to
//! estimate loss.

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::reliability::ReliableChannel;

/// Network identity of a connected participant.
///
/// The host is always [`NetUserId::HOST`]; clients receive ids from 1 upwards
/// in connection order. Ids are never reused within a hosting session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetUserId(pub u32);

impl NetUserId {
    /// The hosting participant.
    pub const HOST: Self = Self(0);

    /// Returns true for the host id.
    #[inline]
    #[must_use]
    pub const fn is_host(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NetUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user#{}", self.0)
    }
}

/// Snapshot of one link's quality.
///
/// All zero for a peer that is not connected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeerLinkState {
    /// Smoothed round-trip time in milliseconds.
    pub rtt_ms: u32,
    /// Round-trip time mean deviation in milliseconds.
    pub rtt_variance_ms: u32,
    /// Retransmitted share of reliable datagrams, 0..=100.
    pub packet_loss_percent: u32,
    /// Payload and header bytes received from the peer.
    pub bytes_in: u64,
    /// Payload and header bytes sent to the peer.
    pub bytes_out: u64,
    /// Reliable datagrams not yet acknowledged.
    pub reliable_pending: u32,
    /// Bytes of reliable datagrams not yet acknowledged.
    pub bytes_in_flight: u32,
}

impl PeerLinkState {
    /// Per-metric maximum of two links.
    ///
    /// Used for the host's own link, which reports its worst peer.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        Self {
            rtt_ms: self.rtt_ms.max(other.rtt_ms),
            rtt_variance_ms: self.rtt_variance_ms.max(other.rtt_variance_ms),
            packet_loss_percent: self.packet_loss_percent.max(other.packet_loss_percent),
            bytes_in: self.bytes_in.max(other.bytes_in),
            bytes_out: self.bytes_out.max(other.bytes_out),
            reliable_pending: self.reliable_pending.max(other.reliable_pending),
            bytes_in_flight: self.bytes_in_flight.max(other.bytes_in_flight),
        }
    }
}

/// Round-trip and loss estimator for one link.
#[derive(Clone, Debug)]
pub struct LinkEstimator {
    rtt_ms: Option<u32>,
    rtt_variance_ms: u32,
    window_start: Instant,
    window_sent: u32,
    window_lost: u32,
    loss_percent: u32,
    /// Bytes received.
    pub bytes_in: u64,
    /// Bytes sent.
    pub bytes_out: u64,
}

impl LinkEstimator {
    /// Creates an estimator with no samples.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            rtt_ms: None,
            rtt_variance_ms: 0,
            window_start: now,
            window_sent: 0,
            window_lost: 0,
            loss_percent: 0,
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    /// Folds in one round-trip sample.
    pub fn record_rtt(&mut self, sample: Duration) {
        let sample = u32::try_from(sample.as_millis()).unwrap_or(u32::MAX);
        match self.rtt_ms {
            None => {
                self.rtt_ms = Some(sample);
                self.rtt_variance_ms = sample / 2;
            }
            Some(rtt) => {
                let deviation = rtt.abs_diff(sample);
                // rtt += (sample - rtt) / 8, var += (|dev| - var) / 4
                let rtt = if sample > rtt {
                    rtt + (sample - rtt) / 8
                } else {
                    rtt - (rtt - sample) / 8
                };
                self.rtt_ms = Some(rtt);
                self.rtt_variance_ms = if deviation > self.rtt_variance_ms {
                    self.rtt_variance_ms + (deviation - self.rtt_variance_ms) / 4
                } else {
                    self.rtt_variance_ms - (self.rtt_variance_ms - deviation) / 4
                };
            }
        }
    }

    /// Counts a first transmission of a reliable datagram.
    pub fn record_sent(&mut self) {
        self.window_sent = self.window_sent.saturating_add(1);
    }

    /// Counts a retransmission.
    pub fn record_lost(&mut self) {
        self.window_lost = self.window_lost.saturating_add(1);
    }

    /// Closes the loss window when it has run for `window`.
    pub fn roll_window(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.window_start) < window {
            return;
        }
        self.loss_percent = if self.window_sent == 0 {
            0
        } else {
            (self.window_lost.saturating_mul(100) / self.window_sent).min(100)
        };
        self.window_start = now;
        self.window_sent = 0;
        self.window_lost = 0;
    }

    /// Retransmission timeout: `rtt + 4 * variance`, never below `floor`.
    #[must_use]
    pub fn retransmit_timeout(&self, floor: Duration) -> Duration {
        let rto = match self.rtt_ms {
            Some(rtt) => Duration::from_millis(u64::from(rtt) + 4 * u64::from(self.rtt_variance_ms)),
            None => floor * 2,
        };
        rto.max(floor)
    }

    /// Smoothed round-trip time, 0 before the first sample.
    #[must_use]
    pub fn rtt_ms(&self) -> u32 {
        self.rtt_ms.unwrap_or(0)
    }

    /// Round-trip variance.
    #[must_use]
    pub const fn rtt_variance_ms(&self) -> u32 {
        self.rtt_variance_ms
    }

    /// Loss in percent over the last closed window, or the running window
    /// when none has closed yet.
    #[must_use]
    pub fn loss_percent(&self) -> u32 {
        if self.loss_percent == 0 && self.window_sent > 0 {
            (self.window_lost.saturating_mul(100) / self.window_sent).min(100)
        } else {
            self.loss_percent
        }
    }
}

/// A connected remote endpoint.
#[derive(Debug)]
pub struct Peer {
    /// Network identity.
    pub user: NetUserId,
    /// Remote socket address.
    pub addr: SocketAddr,
    /// Connection token carried by every datagram.
    pub token: u32,
    /// Link quality estimator.
    pub link: LinkEstimator,
    /// Reliable ordered channel state.
    pub reliable: ReliableChannel,
    /// Next unreliable sequence to send.
    pub unreliable_send: u16,
    /// Latest unreliable sequence delivered.
    pub unreliable_recv: Option<u16>,
    /// Last time any datagram arrived.
    pub last_recv: Instant,
    /// Last time a ping went out.
    pub last_ping: Instant,
}

impl Peer {
    /// Creates a peer that was just heard from.
    #[must_use]
    pub fn new(user: NetUserId, addr: SocketAddr, token: u32, now: Instant) -> Self {
        Self {
            user,
            addr,
            token,
            link: LinkEstimator::new(now),
            reliable: ReliableChannel::new(),
            unreliable_send: 0,
            unreliable_recv: None,
            last_recv: now,
            last_ping: now,
        }
    }

    /// Telemetry snapshot.
    #[must_use]
    pub fn link_state(&self) -> PeerLinkState {
        PeerLinkState {
            rtt_ms: self.link.rtt_ms(),
            rtt_variance_ms: self.link.rtt_variance_ms(),
            packet_loss_percent: self.link.loss_percent(),
            bytes_in: self.link.bytes_in,
            bytes_out: self.link.bytes_out,
            reliable_pending: self.reliable.pending_count(),
            bytes_in_flight: self.reliable.bytes_in_flight(),
        }
    }

    /// Returns true when nothing arrived for `timeout`.
    #[inline]
    #[must_use]
    pub fn is_silent(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.last_recv) > timeout
    }
}
