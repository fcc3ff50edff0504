//! # Event and Message Queues
//!
//! The socket side produces [`TransportEvent`]s. `update` dispatches a bounded
//! number of them: connects and drops go to the caller's handler, data goes
//! into the incoming FIFO ([`MessageQueue`]) where `message_ready` and
//! `read_message` find it.

use std::collections::VecDeque;
use std::fmt;

use tracing::{debug, error};

use crate::peer::NetUserId;
use crate::transport::TransportEvents;

/// Why a peer left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// The peer said goodbye.
    Disconnected,
    /// The peer went silent or stopped acknowledging.
    TimedOut,
    /// We dropped the peer with `drop_user`.
    Kicked,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::TimedOut => "timed out",
            Self::Kicked => "dropped",
        })
    }
}

/// One application message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Sender.
    pub src: NetUserId,
    /// Message bytes.
    pub payload: Vec<u8>,
}

/// Something the socket side observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer completed the connection handshake.
    Connected(NetUserId),
    /// A peer is gone.
    Disconnected(NetUserId, DropReason),
    /// Application data arrived.
    Data(IncomingMessage),
}

impl TransportEvent {
    fn user(&self) -> NetUserId {
        match self {
            Self::Connected(user) | Self::Disconnected(user, _) => *user,
            Self::Data(message) => message.src,
        }
    }
}

/// Incoming FIFO, oldest first.
#[derive(Debug, Default)]
pub struct MessageQueue {
    messages: VecDeque<IncomingMessage>,
}

impl MessageQueue {
    /// Appends a message.
    pub fn push(&mut self, message: IncomingMessage) {
        self.messages.push_back(message);
    }

    /// Size of the oldest message from `src` without consuming it.
    #[must_use]
    pub fn peek_size(&self, src: NetUserId) -> Option<usize> {
        self.messages
            .iter()
            .find(|m| m.src == src)
            .map(|m| m.payload.len())
    }

    /// Removes and returns the oldest message from `src`.
    pub fn take(&mut self, src: NetUserId) -> Option<IncomingMessage> {
        let index = self.messages.iter().position(|m| m.src == src)?;
        self.messages.remove(index)
    }

    /// Discards everything queued from `src`.
    pub fn purge(&mut self, src: NetUserId) {
        self.messages.retain(|m| m.src != src);
    }

    /// Queued message count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Outcome of one dispatch pass.
#[derive(Debug, Default)]
pub struct Dispatch {
    /// Events handed out.
    pub processed: usize,
    /// Users whose connect was not accepted by the handler.
    pub rejected: Vec<NetUserId>,
}

/// Pending events plus the incoming FIFO.
#[derive(Debug, Default)]
pub struct EventQueue {
    pending: VecDeque<TransportEvent>,
    inbox: MessageQueue,
}

impl EventQueue {
    /// Records an event for the next dispatch.
    pub fn push(&mut self, event: TransportEvent) {
        self.pending.push_back(event);
    }

    /// Moves pending data events into the FIFO, leaving connects and drops
    /// for the next `update`.
    pub fn promote_data(&mut self) {
        let mut remaining = VecDeque::with_capacity(self.pending.len());
        for event in self.pending.drain(..) {
            match event {
                TransportEvent::Data(message) => self.inbox.push(message),
                other => remaining.push_back(other),
            }
        }
        self.pending = remaining;
    }

    /// Dispatches at most `budget` events to `handler`.
    pub fn dispatch(&mut self, handler: &mut dyn TransportEvents, budget: usize) -> Dispatch {
        let mut outcome = Dispatch::default();
        while outcome.processed < budget {
            let Some(event) = self.pending.pop_front() else {
                break;
            };
            outcome.processed += 1;
            match event {
                TransportEvent::Connected(user) => match handler.on_new_user(user) {
                    Some(slot) => debug!("{} connected as slot {}", user, slot),
                    None => {
                        error!("connection from unrecognized peer {} ignored", user);
                        outcome.rejected.push(user);
                    }
                },
                TransportEvent::Disconnected(user, reason) => {
                    self.inbox.purge(user);
                    handler.on_drop(user, reason);
                }
                TransportEvent::Data(message) => self.inbox.push(message),
            }
        }
        outcome
    }

    /// Forgets everything about `user`, pending or queued.
    pub fn forget(&mut self, user: NetUserId) {
        self.pending.retain(|event| event.user() != user);
        self.inbox.purge(user);
    }

    /// The incoming FIFO.
    #[must_use]
    pub fn inbox(&self) -> &MessageQueue {
        &self.inbox
    }

    /// The incoming FIFO, mutably.
    pub fn inbox_mut(&mut self) -> &mut MessageQueue {
        &mut self.inbox
    }

    /// Events waiting for dispatch.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drops all events and messages.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.inbox.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        accept: bool,
        joined: Vec<NetUserId>,
        dropped: Vec<(NetUserId, DropReason)>,
    }

    impl TransportEvents for Recorder {
        fn on_new_user(&mut self, user: NetUserId) -> Option<u8> {
            self.joined.push(user);
            self.accept.then_some(1)
        }

        fn on_drop(&mut self, user: NetUserId, reason: DropReason) {
            self.dropped.push((user, reason));
        }
    }

    fn data(src: u32, bytes: &[u8]) -> TransportEvent {
        TransportEvent::Data(IncomingMessage {
            src: NetUserId(src),
            payload: bytes.to_vec(),
        })
    }

    #[test]
    fn test_fifo_per_source() {
        let mut queue = MessageQueue::default();
        queue.push(IncomingMessage { src: NetUserId(1), payload: vec![1] });
        queue.push(IncomingMessage { src: NetUserId(2), payload: vec![2, 2] });
        queue.push(IncomingMessage { src: NetUserId(1), payload: vec![3, 3, 3] });

        assert_eq!(queue.peek_size(NetUserId(2)), Some(2));
        assert_eq!(queue.take(NetUserId(1)).unwrap().payload, vec![1]);
        assert_eq!(queue.take(NetUserId(1)).unwrap().payload, vec![3, 3, 3]);
        assert!(queue.take(NetUserId(1)).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut queue = MessageQueue::default();
        queue.push(IncomingMessage { src: NetUserId(4), payload: vec![0; 36] });
        for _ in 0..5 {
            assert_eq!(queue.peek_size(NetUserId(4)), Some(36));
        }
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_dispatch_is_bounded() {
        let mut events = EventQueue::default();
        for i in 0..10 {
            events.push(data(1, &[i]));
        }
        let mut handler = Recorder::default();
        assert_eq!(events.dispatch(&mut handler, 4).processed, 4);
        assert_eq!(events.pending_len(), 6);
        assert_eq!(events.inbox().len(), 4);
    }

    #[test]
    fn test_rejected_connect_reported() {
        let mut events = EventQueue::default();
        events.push(TransportEvent::Connected(NetUserId(7)));
        let mut handler = Recorder::default();
        let outcome = events.dispatch(&mut handler, 8);
        assert_eq!(outcome.rejected, vec![NetUserId(7)]);
        assert_eq!(handler.joined, vec![NetUserId(7)]);
    }

    #[test]
    fn test_drop_purges_queued_messages() {
        let mut events = EventQueue::default();
        events.push(data(3, b"late"));
        events.promote_data();
        events.push(TransportEvent::Disconnected(NetUserId(3), DropReason::TimedOut));

        let mut handler = Recorder { accept: true, ..Recorder::default() };
        events.dispatch(&mut handler, 8);
        assert_eq!(handler.dropped, vec![(NetUserId(3), DropReason::TimedOut)]);
        assert!(events.inbox().is_empty());
    }

    #[test]
    fn test_promote_keeps_control_events() {
        let mut events = EventQueue::default();
        events.push(TransportEvent::Connected(NetUserId(1)));
        events.push(data(1, b"x"));
        events.promote_data();
        assert_eq!(events.pending_len(), 1);
        assert_eq!(events.inbox().peek_size(NetUserId(1)), Some(1));
    }
}
