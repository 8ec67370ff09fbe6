//! Swarm engine actor
//!
//! One task owns the listening socket and the transfer registry writes.
//! Handles talk to it over [`EngineCommand`]s; download drivers and
//! seeding sessions run as child tasks and are aborted on shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::instrument::WithSubscriber;

use super::commands::EngineCommand;
use super::config::EngineConfig;
use super::handle::SwarmEngine;
use super::swarm::{SwarmContext, run_download};
use super::transfer::{TransferRegistry, TransferState};
use super::{EngineError, TransferStatus, seeding};
use crate::descriptor::InfoHash;
use crate::protocol::PeerId;
use crate::tracker::HttpTrackerClient;

const COMMAND_BUFFER: usize = 32;

/// Binds the listen socket and starts the engine actor.
///
/// The actor inherits the caller's current tracing subscriber.
///
/// # Errors
///
/// - `EngineError::TransportDisabled` - `disable_tcp` leaves no transport
/// - `EngineError::DataDirectory` - Data directory cannot be created
/// - `EngineError::Bind` - Listen address unavailable
/// - `EngineError::Tracker` - HTTP client could not be built
pub async fn spawn_swarm_engine(config: EngineConfig) -> Result<SwarmEngine, EngineError> {
    config.log_properties();
    if config.disable_tcp {
        return Err(EngineError::TransportDisabled);
    }

    prepare_data_dir(&config).await?;

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| EngineError::Bind { addr, source })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| EngineError::Bind { addr, source })?;

    let tracker = HttpTrackerClient::new(config.tracker_timeout, &config.user_agent)?;

    tracing::info!(
        listen_addr = %local_addr,
        dual_stack = config.identity.dual_stack,
        port_source = %config.identity.port_source,
        data_dir = %config.data_dir.display(),
        "Swarm engine listening"
    );

    let data_dir = config.data_dir.clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let registry = TransferRegistry::default();

    let actor = EngineActor {
        ctx: Arc::new(SwarmContext {
            config,
            peer_id: PeerId::generate(),
            local_port: local_addr.port(),
            tracker,
            shutdown: shutdown_rx.clone(),
        }),
        registry: Arc::clone(&registry),
        listener,
        commands: command_rx,
        shutdown: shutdown_tx,
        tasks: JoinSet::new(),
    };

    let join = tokio::spawn(actor.run().with_current_subscriber());

    Ok(SwarmEngine::new(
        command_tx,
        registry,
        shutdown_rx,
        local_addr,
        data_dir,
        join,
    ))
}

async fn prepare_data_dir(config: &EngineConfig) -> Result<(), EngineError> {
    let path = &config.data_dir;
    let data_dir_error = |source| EngineError::DataDirectory {
        path: path.clone(),
        source,
    };

    tokio::fs::create_dir_all(path).await.map_err(data_dir_error)?;
    let metadata = tokio::fs::metadata(path).await.map_err(data_dir_error)?;
    if !metadata.is_dir() {
        return Err(data_dir_error(std::io::Error::new(
            std::io::ErrorKind::NotADirectory,
            "not a directory",
        )));
    }
    Ok(())
}

struct EngineActor {
    ctx: Arc<SwarmContext>,
    registry: TransferRegistry,
    listener: TcpListener,
    commands: mpsc::Receiver<EngineCommand>,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl EngineActor {
    async fn run(mut self) {
        tracing::debug!(peer_id = ?self.ctx.peer_id, "Swarm engine actor started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(EngineCommand::Shutdown { responder }) => {
                        self.shutdown().await;
                        let _ = responder.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, address)) => self.accept_peer(stream, address),
                    Err(e) => tracing::warn!(error = %e, "Failed to accept peer connection"),
                },
                Some(result) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = result {
                        if e.is_panic() {
                            tracing::error!(error = %e, "Engine task panicked");
                        }
                    }
                }
            }
        }

        tracing::debug!("Swarm engine actor stopped");
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::RegisterTorrent {
                transfer,
                responder,
            } => {
                let _ = responder.send(self.register(transfer));
            }
            EngineCommand::StartDownload {
                info_hash,
                responder,
            } => {
                let _ = responder.send(self.start_download(info_hash));
            }
            EngineCommand::Shutdown { responder } => {
                let _ = responder.send(());
            }
        }
    }

    fn register(&mut self, transfer: Arc<TransferState>) -> Result<(), EngineError> {
        let info_hash = transfer.info_hash();
        let mut registry = self.registry.write();
        if registry.contains_key(&info_hash) {
            return Err(EngineError::DuplicateTorrent { info_hash });
        }

        tracing::info!(
            %info_hash,
            name = %transfer.descriptor().name,
            pieces = transfer.descriptor().piece_count(),
            total = transfer.total_length(),
            "Registered torrent"
        );
        registry.insert(info_hash, transfer);
        Ok(())
    }

    fn start_download(&mut self, info_hash: InfoHash) -> Result<(), EngineError> {
        let transfer = self
            .registry
            .read()
            .get(&info_hash)
            .cloned()
            .ok_or(EngineError::UnknownTorrent { info_hash })?;

        match transfer.status() {
            TransferStatus::Registered => {
                transfer.transition(TransferStatus::Downloading);
                self.tasks
                    .spawn(run_download(Arc::clone(&self.ctx), transfer).with_current_subscriber());
            }
            status => {
                tracing::debug!(%info_hash, %status, "Download already requested or finished");
            }
        }
        Ok(())
    }

    fn accept_peer(&mut self, stream: TcpStream, address: SocketAddr) {
        if !self.ctx.config.seed {
            tracing::debug!(peer = %address, "Seeding disabled, dropping inbound peer");
            return;
        }
        self.tasks.spawn(
            seeding::serve_peer(
                Arc::clone(&self.ctx),
                Arc::clone(&self.registry),
                stream,
                address,
            )
            .with_current_subscriber(),
        );
    }

    async fn shutdown(&mut self) {
        self.shutdown.send_replace(true);

        let transfers: Vec<_> = self.registry.read().values().cloned().collect();
        for transfer in transfers {
            transfer.transition(TransferStatus::Stopped);
        }

        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
        tracing::info!(local_port = self.ctx.local_port, "Swarm engine shut down");
    }
}

/// Sends a command and waits for the actor's answer.
pub(crate) async fn request<T>(
    commands: &mpsc::Sender<EngineCommand>,
    build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
) -> Result<T, EngineError> {
    let (responder, response) = oneshot::channel();
    commands
        .send(build(responder))
        .await
        .map_err(|_| EngineError::EngineClosed)?;
    response.await.map_err(|_| EngineError::EngineClosed)
}
