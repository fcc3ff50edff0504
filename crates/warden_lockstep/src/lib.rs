//! # WARDEN Lockstep
//!
//! Turns every participant's local input into one shared stream of turns.
//!
//! ## Per-tick flow
//!
//! ```text
//!   client                       host                        client
//!     │ Record(n, slot 1)          │          Record(n, slot 2) │
//!     │ ─────────────────────────▶ │ ◀───────────────────────── │
//!     │                            │ wait for every human slot  │
//!     │                            │ substitute dropped slots   │
//!     │                            │ seal aggregate checksum    │
//!     │ ◀──────── RecordSet(n) ─── │ ─── RecordSet(n) ────────▶ │
//!     ▼                            ▼                            ▼
//!   DesyncDetector::check        DesyncDetector::check        ...
//! ```
//!
//! Records for tick `n` are consumed only once every connected slot's
//! tick-`n` record is in. Ticks never run out of order.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod desync;
pub mod error;
pub mod exchange;
pub mod message;
pub mod record;
pub mod slots;

pub use config::ExchangeConfig;
pub use desync::{DesyncDetector, DesyncReport, ReplayDivergence, StateDivergence};
pub use error::{LockstepError, LockstepResult};
pub use exchange::{Exchange, ExchangeOutcome, ExchangeState};
pub use message::{Message, RecordBody, RecordSetBody, ScreenPacket, Welcome, MAX_CHAT_LEN, PROTOCOL_VERSION};
pub use record::{ParticipantSlot, Record, RecordSet, SlotMask, MAX_SLOTS};
pub use slots::SlotTable;
