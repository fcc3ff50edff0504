//! # WARDEN Transport
//!
//! The datagram layer underneath the lockstep exchange.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        HOST (authority)                      │
//! │   peers: NetUserId -> Peer { link, reliable channel }        │
//! │   events ──update()──> on_new_user / on_drop / inbox FIFO    │
//! └──────────────────────────────────────────────────────────────┘
//!          ▲ reliable (ordered, acked)     │ send_all
//!          │ unreliable (sequenced)        ▼
//! ┌──────────────────┐            ┌──────────────────┐
//! │   CLIENT (id 1)  │            │   CLIENT (id 2)  │
//! └──────────────────┘            └──────────────────┘
//! ```
//!
//! Everything runs on the caller's thread. Waiting is always bounded and goes
//! through [`poll::retry_until`].
//!
//! ## Telemetry
//!
//! Link metrics are reported per connected peer and are `0` for peers that
//! are not connected. Asking for the local user reports the upstream link on a
//! client and the *worst* peer on a host (maximum of every metric across
//! peers). That heuristic is kept as-is; an average would hide one bad link.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod memory;
pub mod nat;
pub mod packet;
pub mod peer;
pub mod poll;
pub mod queue;
pub mod reliability;
pub mod transport;
pub mod udp;

pub use config::TransportConfig;
pub use error::{JoinFailure, TransportError, TransportResult};
pub use memory::{MemoryHub, MemoryTransport};
pub use nat::{FallbackPortMapper, NatPmpMapper, NoPortMapping, PortMapper};
pub use peer::{NetUserId, PeerLinkState};
pub use queue::{DropReason, IncomingMessage};
pub use transport::{HostOptions, JoinOptions, Role, Transport, TransportEvents};
pub use udp::UdpTransport;

/// Port used when a bind or join spec does not name one.
pub const DEFAULT_PORT: u16 = 5556;

/// Maximum datagram size in bytes, header included.
///
/// Stays under the common 1280-byte IPv6 minimum MTU.
pub const MAX_PACKET_SIZE: usize = 1200;

/// Maximum application payload carried by a single datagram.
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - packet::DatagramHeader::SIZE;
