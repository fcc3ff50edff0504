//! # Bounded Polling
//!
//! Every blocking operation in the transport is an attempt closure retried
//! until it yields a value or the timeout expires. This is the only place
//! that sleeps.

use std::time::{Duration, Instant};

/// Calls `attempt` until it returns `Some`, an error, or `timeout` elapses.
///
/// `attempt` always runs at least once, so a zero timeout is a plain poll.
/// Between attempts the thread sleeps for `interval` (clamped to the time
/// left).
///
/// # Errors
///
/// Returns the first error produced by `attempt`.
pub fn retry_until<T, E>(
    timeout: Duration,
    interval: Duration,
    mut attempt: impl FnMut() -> Result<Option<T>, E>,
) -> Result<Option<T>, E> {
    let deadline = Deadline::after(timeout);
    loop {
        if let Some(value) = attempt()? {
            return Ok(Some(value));
        }
        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return Ok(None);
        }
        std::thread::sleep(interval.min(remaining));
    }
}

/// A point in time after which waiting stops.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `timeout` from now.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    /// Time left, zero once expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Returns true once the deadline passed.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }
}
