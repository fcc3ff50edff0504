//! # WARDEN
//!
//! Lockstep synchronization for a real-time strategy game: every
//! participant's input becomes one shared, ordered stream of turns, checked
//! for divergence and optionally recorded for replay.
//!
//! ```text
//! ┌──────────────┐  Record(n)   ┌───────────────────────────────────────┐
//! │  simulation  │ ───────────▶ │ Session                               │
//! │              │ ◀─────────── │  ├─ Transport     (UDP or in-memory)  │
//! └──────────────┘ TickOutcome  │  ├─ Exchange      (one set per tick)  │
//!                               │  ├─ DesyncDetector                    │
//!                               │  └─ TurnWriter / TurnReader           │
//!                               └───────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use warden::{Record, Role, Session, SessionConfig, SessionOptions};
//! use warden_transport::{TransportConfig, UdpTransport};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = UdpTransport::init(TransportConfig::default())?;
//! let mut session = Session::new(transport, SessionConfig::default());
//! session.begin_session(Role::Host, "5556", SessionOptions::default())?;
//! for tick in 0..100 {
//!     let outcome = session.exchange(tick, Record::noop(tick, 0))?;
//!     if outcome.report.desync_detected() {
//!         eprintln!("desync at tick {tick}");
//!     }
//! }
//! session.end_session()?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod session;

pub use config::{ConfigError, PersistenceConfig, SessionConfig};
pub use error::{SessionError, SessionResult};
pub use session::{Session, SessionOptions, TickOutcome};

pub use warden_lockstep::{
    DesyncReport, ExchangeState, ParticipantSlot, Record, RecordSet, SlotMask, MAX_SLOTS,
};
pub use warden_replay::TurnFileHeader;
pub use warden_transport::Role;
