//! Exchange timing, loaded from the `[exchange]` table.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exchange tuning knobs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// How long one tick may wait for missing records before the missing
    /// peers are dropped (host) or the session fails (client).
    pub exchange_timeout_ms: u64,
    /// Wait per poll while records are outstanding.
    pub poll_interval_ms: u64,
    /// How long a client waits for its slot assignment after joining.
    pub welcome_timeout_ms: u64,
    /// Accept connections after the first exchange.
    pub allow_late_join: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            exchange_timeout_ms: 10_000,
            poll_interval_ms: 5,
            welcome_timeout_ms: 5_000,
            allow_late_join: false,
        }
    }
}

impl ExchangeConfig {
    /// Exchange timeout.
    #[must_use]
    pub const fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }

    /// Poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Welcome timeout.
    #[must_use]
    pub const fn welcome_timeout(&self) -> Duration {
        Duration::from_millis(self.welcome_timeout_ms)
    }
}
