//! Command definitions for the swarm engine actor.

use std::sync::Arc;

use tokio::sync::oneshot;

use super::EngineError;
use super::transfer::TransferState;
use crate::descriptor::InfoHash;

/// Commands sent from handles to the engine actor.
///
/// Each carries a responder; the actor answers every command it receives,
/// including while shutting down.
pub enum EngineCommand {
    /// Insert a prepared transfer into the registry.
    RegisterTorrent {
        transfer: Arc<TransferState>,
        responder: oneshot::Sender<Result<(), EngineError>>,
    },
    /// Start the download driver for a registered transfer.
    StartDownload {
        info_hash: InfoHash,
        responder: oneshot::Sender<Result<(), EngineError>>,
    },
    /// Stop every transfer, release the listener and exit.
    Shutdown { responder: oneshot::Sender<()> },
}

impl std::fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RegisterTorrent { transfer, .. } => f
                .debug_struct("RegisterTorrent")
                .field("info_hash", &transfer.info_hash())
                .finish(),
            Self::StartDownload { info_hash, .. } => f
                .debug_struct("StartDownload")
                .field("info_hash", info_hash)
                .finish(),
            Self::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}
