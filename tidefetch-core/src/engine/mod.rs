//! BitTorrent engine abstraction
//!
//! The orchestrator talks to engines only through [`EngineFactory`],
//! [`TorrentEngine`] and [`TransferHandle`]. The production implementation is
//! the swarm engine: an actor task owning the listening socket, with one
//! download driver per registered transfer and inbound seeding sessions.

pub mod actor;
pub mod commands;
pub mod config;
pub mod handle;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
mod seeding;
pub mod storage;
mod swarm;
pub mod transfer;

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

pub use actor::spawn_swarm_engine;
use async_trait::async_trait;
pub use config::EngineConfig;
pub use handle::{SwarmEngine, SwarmEngineFactory, SwarmTransfer};
#[cfg(any(test, feature = "test-utils"))]
pub use mock::{
    MockBehaviour, MockCall, MockEngine, MockEngineFactory, MockOutcome, MockTransfer,
};
use tokio::sync::watch;

use crate::descriptor::{InfoHash, TorrentDescriptor};

/// Lifecycle of a single registered transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Registered but no download requested yet.
    Registered,
    /// Download driver running.
    Downloading,
    /// Every piece verified and written.
    Complete,
    /// Engine stopped trying to make progress on its own.
    GaveUp,
    /// Engine closed before the transfer finished.
    Stopped,
}

impl TransferStatus {
    /// True once the status can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::GaveUp | Self::Stopped)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Registered => "registered",
            Self::Downloading => "downloading",
            Self::Complete => "complete",
            Self::GaveUp => "gave-up",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Builds engine instances from a configuration.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    type Engine: TorrentEngine;

    /// Constructs and starts an engine bound to the configured address.
    ///
    /// # Errors
    ///
    /// - `EngineError::Bind` - Listen address could not be bound
    /// - `EngineError::DataDirectory` - Data directory unusable
    /// - `EngineError::TransportDisabled` - Configuration leaves no transport
    async fn construct(&self, config: EngineConfig) -> Result<Self::Engine, EngineError>;
}

/// A running engine instance.
///
/// Owns its data directory and listening socket until [`TorrentEngine::close`]
/// or drop. Closing is idempotent.
#[async_trait]
pub trait TorrentEngine: Send + Sync {
    type Handle: TransferHandle;

    /// Registers a descriptor and returns the handle for its transfer.
    ///
    /// # Errors
    ///
    /// - `EngineError::Storage` - A zero-length file could not be created
    /// - `EngineError::Storage` - Existing data could not be inspected
    /// - `EngineError::EngineClosed` - Engine already shut down
    async fn register_torrent(
        &self,
        descriptor: TorrentDescriptor,
    ) -> Result<Self::Handle, EngineError>;

    /// Waits until every registered transfer reaches a terminal status.
    ///
    /// Returns `false` when any transfer was stopped or the engine closed
    /// while waiting.
    async fn wait_all_complete(&self) -> bool;

    /// Port the engine is listening on.
    fn local_port(&self) -> u16;

    /// Stops all transfers and releases the socket. Safe to call repeatedly.
    async fn close(&self);
}

/// Read-mostly view of one registered transfer.
#[async_trait]
pub trait TransferHandle: Send + Sync {
    /// Asks the engine to fetch every piece of the torrent.
    ///
    /// # Errors
    ///
    /// - `EngineError::EngineClosed` - Engine already shut down
    /// - `EngineError::UnknownTorrent` - Transfer no longer registered
    async fn request_full_download(&self) -> Result<(), EngineError>;

    fn info_hash(&self) -> InfoHash;

    fn total_length(&self) -> u64;

    /// Bytes of verified pieces on disk.
    fn bytes_completed(&self) -> u64;

    /// Per-transfer completion signal.
    fn completion(&self) -> watch::Receiver<TransferStatus>;
}

/// Errors raised by engine implementations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to bind listen address {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Data directory {} is unusable", path.display())]
    DataDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TCP transport is disabled, engine has no way to reach peers")]
    TransportDisabled,

    #[error("Torrent already registered: {info_hash}")]
    DuplicateTorrent { info_hash: InfoHash },

    #[error("Torrent not registered: {info_hash}")]
    UnknownTorrent { info_hash: InfoHash },

    #[error("Storage error on {}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine has been closed")]
    EngineClosed,

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Peer connection error: {reason}")]
    PeerConnection { reason: String },

    #[error("Tracker {url} failed: {reason}")]
    Tracker { url: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!TransferStatus::Registered.is_terminal());
        assert!(!TransferStatus::Downloading.is_terminal());
        assert!(TransferStatus::Complete.is_terminal());
        assert!(TransferStatus::GaveUp.is_terminal());
        assert!(TransferStatus::Stopped.is_terminal());
    }

    #[test]
    fn test_error_messages_name_the_resource() {
        let err = EngineError::Bind {
            addr: "127.0.0.1:6881".parse().unwrap(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().contains("127.0.0.1:6881"));

        let err = EngineError::DuplicateTorrent {
            info_hash: InfoHash::new([0xab; 20]),
        };
        assert!(err.to_string().contains("abababab"));
    }
}
