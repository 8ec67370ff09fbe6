//! Handles for the swarm engine
//!
//! [`SwarmEngine`] is the caller side of the actor in [`super::actor`].
//! Cloning is not supported; one engine has exactly one owner responsible
//! for closing it.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::actor::{request, spawn_swarm_engine};
use super::commands::EngineCommand;
use super::config::EngineConfig;
use super::transfer::{TransferRegistry, TransferState, wait_for_terminal};
use super::{EngineError, EngineFactory, TorrentEngine, TransferHandle, TransferStatus};
use crate::descriptor::{InfoHash, TorrentDescriptor};

/// Builds [`SwarmEngine`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwarmEngineFactory;

#[async_trait]
impl EngineFactory for SwarmEngineFactory {
    type Engine = SwarmEngine;

    async fn construct(&self, config: EngineConfig) -> Result<SwarmEngine, EngineError> {
        spawn_swarm_engine(config).await
    }
}

/// Running swarm engine.
///
/// Dropping without [`TorrentEngine::close`] aborts the actor and marks
/// unfinished transfers stopped.
pub struct SwarmEngine {
    commands: mpsc::Sender<EngineCommand>,
    registry: TransferRegistry,
    shutdown: watch::Receiver<bool>,
    local_addr: SocketAddr,
    data_dir: PathBuf,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl SwarmEngine {
    pub(crate) fn new(
        commands: mpsc::Sender<EngineCommand>,
        registry: TransferRegistry,
        shutdown: watch::Receiver<bool>,
        local_addr: SocketAddr,
        data_dir: PathBuf,
        actor: JoinHandle<()>,
    ) -> Self {
        Self {
            commands,
            registry,
            shutdown,
            local_addr,
            data_dir,
            actor: Mutex::new(Some(actor)),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow() || self.commands.is_closed()
    }

    /// Status of a registered transfer, if any.
    pub fn transfer_status(&self, info_hash: &InfoHash) -> Option<TransferStatus> {
        self.registry.read().get(info_hash).map(|transfer| transfer.status())
    }
}

#[async_trait]
impl TorrentEngine for SwarmEngine {
    type Handle = SwarmTransfer;

    async fn register_torrent(
        &self,
        descriptor: TorrentDescriptor,
    ) -> Result<SwarmTransfer, EngineError> {
        if self.is_closed() {
            return Err(EngineError::EngineClosed);
        }
        let info_hash = descriptor.info_hash;
        if self.registry.read().contains_key(&info_hash) {
            return Err(EngineError::DuplicateTorrent { info_hash });
        }

        let state = Arc::new(TransferState::prepare(descriptor, &self.data_dir).await?);
        let transfer = Arc::clone(&state);
        request(&self.commands, |responder| EngineCommand::RegisterTorrent {
            transfer,
            responder,
        })
        .await??;

        Ok(SwarmTransfer {
            state,
            commands: self.commands.clone(),
        })
    }

    async fn wait_all_complete(&self) -> bool {
        let receivers: Vec<_> = self
            .registry
            .read()
            .values()
            .map(|transfer| transfer.subscribe())
            .collect();
        wait_for_terminal(receivers, self.shutdown.clone()).await
    }

    fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    async fn close(&self) {
        let actor = self.actor.lock().take();
        let Some(actor) = actor else {
            return;
        };

        let _ = request(&self.commands, |responder| EngineCommand::Shutdown { responder }).await;
        if let Err(e) = actor.await {
            if e.is_panic() {
                tracing::error!(error = %e, "Swarm engine actor panicked");
            }
        }
    }
}

impl Drop for SwarmEngine {
    fn drop(&mut self) {
        let Some(actor) = self.actor.get_mut().take() else {
            return;
        };
        for transfer in self.registry.read().values() {
            transfer.transition(TransferStatus::Stopped);
        }
        actor.abort();
        tracing::debug!(local_addr = %self.local_addr, "Swarm engine dropped without close");
    }
}

/// Handle to one transfer registered with a [`SwarmEngine`].
#[derive(Clone)]
pub struct SwarmTransfer {
    state: Arc<TransferState>,
    commands: mpsc::Sender<EngineCommand>,
}

impl SwarmTransfer {
    pub fn status(&self) -> TransferStatus {
        self.state.status()
    }

    pub fn uploaded(&self) -> u64 {
        self.state.uploaded()
    }

    pub fn descriptor(&self) -> &TorrentDescriptor {
        self.state.descriptor()
    }
}

impl std::fmt::Debug for SwarmTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwarmTransfer")
            .field("info_hash", &self.state.info_hash())
            .field("status", &self.state.status())
            .field("bytes_completed", &self.state.bytes_completed())
            .finish()
    }
}

#[async_trait]
impl TransferHandle for SwarmTransfer {
    async fn request_full_download(&self) -> Result<(), EngineError> {
        let info_hash = self.state.info_hash();
        request(&self.commands, |responder| EngineCommand::StartDownload {
            info_hash,
            responder,
        })
        .await?
    }

    fn info_hash(&self) -> InfoHash {
        self.state.info_hash()
    }

    fn total_length(&self) -> u64 {
        self.state.total_length()
    }

    fn bytes_completed(&self) -> u64 {
        self.state.bytes_completed()
    }

    fn completion(&self) -> watch::Receiver<TransferStatus> {
        self.state.subscribe()
    }
}
