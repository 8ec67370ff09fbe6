//! Network identity for an engine instance
//!
//! Chooses the address and port an engine listens on. Ports come either from
//! the well-known BitTorrent port, a caller-fixed value, or the OS ephemeral
//! range so concurrent engines never collide.

pub mod identity;
pub mod port;

pub use identity::{DEFAULT_LISTEN_PORT, NetworkIdentity, PortSelection, PortSource};
pub use port::{PortAllocation, allocate_ephemeral_port, allocate_port};
