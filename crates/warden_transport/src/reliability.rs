//! # Reliable Ordered Channel
//!
//! Sender side: every reliable datagram is kept until acknowledged and is
//! retransmitted when its timeout expires. Receiver side: payloads are handed
//! out strictly in sequence order; early arrivals wait in a reorder buffer and
//! duplicates are discarded (but still acknowledged by the caller).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::packet::sequence_greater_than;

/// Out-of-order datagrams held at most, per peer.
const REORDER_WINDOW: u16 = 1024;

/// A datagram waiting for its acknowledgement.
#[derive(Clone, Debug)]
struct PendingDatagram {
    sequence: u16,
    datagram: Vec<u8>,
    first_sent: Instant,
    last_sent: Instant,
    resends: u32,
}

/// Per-peer reliable channel state.
#[derive(Debug, Default)]
pub struct ReliableChannel {
    /// Datagrams sent but not acknowledged, oldest first.
    pending: Vec<PendingDatagram>,
    /// Sequence of the next outgoing datagram.
    next_send: u16,
    /// Sequence the receiver delivers next.
    next_expected: u16,
    /// Early arrivals keyed by sequence.
    reorder: HashMap<u16, Vec<u8>>,
}

impl ReliableChannel {
    /// Creates an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next sequence number, builds the datagram with it and
    /// keeps a copy for retransmission. Returns the datagram to send.
    pub fn send(&mut self, now: Instant, build: impl FnOnce(u16) -> Vec<u8>) -> Vec<u8> {
        let sequence = self.next_send;
        self.next_send = self.next_send.wrapping_add(1);

        let datagram = build(sequence);
        self.pending.push(PendingDatagram {
            sequence,
            datagram: datagram.clone(),
            first_sent: now,
            last_sent: now,
            resends: 0,
        });
        datagram
    }

    /// Acknowledges a sequence number.
    ///
    /// Returns a round-trip sample when the datagram was never retransmitted
    /// (samples from retransmitted datagrams are ambiguous and skipped).
    pub fn acknowledge(&mut self, sequence: u16, now: Instant) -> Option<Duration> {
        let index = self.pending.iter().position(|p| p.sequence == sequence)?;
        let packet = self.pending.remove(index);
        (packet.resends == 0).then(|| now.duration_since(packet.first_sent))
    }

    /// Returns datagrams whose retransmission timeout expired and restarts
    /// their timers.
    pub fn due_resends(&mut self, now: Instant, timeout: Duration) -> Vec<Vec<u8>> {
        self.pending
            .iter_mut()
            .filter(|p| now.duration_since(p.last_sent) >= timeout)
            .map(|p| {
                p.last_sent = now;
                p.resends += 1;
                p.datagram.clone()
            })
            .collect()
    }

    /// Returns true once any datagram was retransmitted more than
    /// `max_resends` times.
    #[must_use]
    pub fn exhausted(&self, max_resends: u32) -> bool {
        self.pending.iter().any(|p| p.resends > max_resends)
    }

    /// Accepts an incoming reliable payload and returns every payload that is
    /// now deliverable, in order.
    pub fn receive(&mut self, sequence: u16, payload: &[u8]) -> Vec<Vec<u8>> {
        if sequence == self.next_expected {
            let mut ready = vec![payload.to_vec()];
            self.next_expected = self.next_expected.wrapping_add(1);
            while let Some(next) = self.reorder.remove(&self.next_expected) {
                ready.push(next);
                self.next_expected = self.next_expected.wrapping_add(1);
            }
            ready
        } else {
            let ahead = sequence.wrapping_sub(self.next_expected);
            if sequence_greater_than(sequence, self.next_expected) && ahead < REORDER_WINDOW {
                self.reorder
                    .entry(sequence)
                    .or_insert_with(|| payload.to_vec());
            }
            Vec::new()
        }
    }

    /// Reliable datagrams awaiting acknowledgement.
    #[must_use]
    pub fn pending_count(&self) -> u32 {
        u32::try_from(self.pending.len()).unwrap_or(u32::MAX)
    }

    /// Bytes of reliable datagrams awaiting acknowledgement.
    #[must_use]
    pub fn bytes_in_flight(&self) -> u32 {
        let bytes: usize = self.pending.iter().map(|p| p.datagram.len()).sum();
        u32::try_from(bytes).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(sequence: u16) -> Vec<u8> {
        sequence.to_le_bytes().to_vec()
    }

    #[test]
    fn test_acknowledge_clears_pending() {
        let now = Instant::now();
        let mut channel = ReliableChannel::new();
        channel.send(now, payload);
        channel.send(now, payload);
        assert_eq!(channel.pending_count(), 2);
        assert_eq!(channel.bytes_in_flight(), 4);

        let sample = channel.acknowledge(0, now + Duration::from_millis(30));
        assert_eq!(sample, Some(Duration::from_millis(30)));
        assert_eq!(channel.pending_count(), 1);

        // Unknown or repeated acks are ignored.
        assert_eq!(channel.acknowledge(0, now), None);
    }

    #[test]
    fn test_resend_skips_rtt_sample() {
        let now = Instant::now();
        let mut channel = ReliableChannel::new();
        channel.send(now, payload);

        let timeout = Duration::from_millis(100);
        assert!(channel.due_resends(now + Duration::from_millis(50), timeout).is_empty());
        assert_eq!(channel.due_resends(now + timeout, timeout).len(), 1);
        assert!(!channel.exhausted(1));

        assert_eq!(channel.acknowledge(0, now + timeout * 2), None);
        assert_eq!(channel.pending_count(), 0);
    }

    #[test]
    fn test_exhausted_after_max_resends() {
        let mut now = Instant::now();
        let timeout = Duration::from_millis(10);
        let mut channel = ReliableChannel::new();
        channel.send(now, payload);
        for _ in 0..3 {
            now += timeout;
            channel.due_resends(now, timeout);
        }
        assert!(channel.exhausted(2));
    }

    #[test]
    fn test_in_order_delivery() {
        let mut channel = ReliableChannel::new();
        assert!(channel.receive(1, b"b").is_empty());
        assert!(channel.receive(2, b"c").is_empty());

        let ready = channel.receive(0, b"a");
        assert_eq!(ready, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_duplicates_dropped() {
        let mut channel = ReliableChannel::new();
        assert_eq!(channel.receive(0, b"a").len(), 1);
        assert!(channel.receive(0, b"a").is_empty());

        assert!(channel.receive(2, b"c").is_empty());
        assert!(channel.receive(2, b"c").is_empty());
        assert_eq!(channel.receive(1, b"b").len(), 2);
    }
}
