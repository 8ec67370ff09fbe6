//! Tracker request and response types

use std::net::SocketAddr;

use crate::descriptor::InfoHash;
use crate::protocol::PeerId;

/// Statistics and identity sent with an announce.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    /// TCP port we accept peer connections on
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    /// Bytes remaining; zero for seeders
    pub left: u64,
    pub event: AnnounceEvent,
}

/// Announce event reported to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    Started,
    /// Regular re-announce, sent without an `event` parameter
    Periodic,
    Completed,
    Stopped,
}

impl AnnounceEvent {
    /// Query value, or `None` for periodic announces.
    pub fn as_query_value(self) -> Option<&'static str> {
        match self {
            Self::Started => Some("started"),
            Self::Periodic => None,
            Self::Completed => Some("completed"),
            Self::Stopped => Some("stopped"),
        }
    }
}

/// Decoded announce response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceResponse {
    /// Seconds until the tracker wants the next announce
    pub interval: u32,
    pub complete: u32,
    pub incomplete: u32,
    pub peers: Vec<SocketAddr>,
}
