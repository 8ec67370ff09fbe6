//! Tidefetch Core - fetch a file over BitTorrent from a `.torrent` URL
//!
//! The [`fetch::DownloadOrchestrator`] acquires the descriptor over HTTP,
//! starts an engine on a non-conflicting port, registers the torrent and
//! decides whether the transfer truly completed. Engines sit behind the
//! traits in [`engine`]; the swarm engine is the production implementation.

pub mod config;
pub mod descriptor;
pub mod engine;
pub mod fetch;
pub mod network;
pub mod protocol;
pub mod tracing_setup;
pub mod tracker;

pub use config::{DownloadConfig, FetchConfig, NetworkConfig};
pub use descriptor::{DescriptorError, InfoHash, TorrentDescriptor};
pub use engine::{
    EngineConfig, EngineError, EngineFactory, SwarmEngine, SwarmEngineFactory, TorrentEngine,
    TransferHandle, TransferStatus,
};
pub use fetch::{CompletedTransfer, DownloadOrchestrator, FetchError, FetchErrorKind};
pub use network::{NetworkIdentity, PortSelection, allocate_ephemeral_port};
