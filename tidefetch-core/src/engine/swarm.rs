//! Download driver: peer discovery, piece selection and block pipelining

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use sha1::{Digest, Sha1};
use tokio::sync::watch;

use super::config::EngineConfig;
use super::transfer::TransferState;
use super::{EngineError, TransferStatus};
use crate::descriptor::PieceIndex;
use crate::protocol::{PeerConnection, PeerHandshake, PeerId, PeerMessage, PieceBitfield};
use crate::tracker::{AnnounceEvent, AnnounceRequest, HttpTrackerClient};

/// Block requests kept in flight per peer.
const PIPELINE_DEPTH: usize = 5;

/// State shared by every task of one engine.
pub(crate) struct SwarmContext {
    pub config: EngineConfig,
    pub peer_id: PeerId,
    pub local_port: u16,
    pub tracker: HttpTrackerClient,
    pub shutdown: watch::Receiver<bool>,
}

impl SwarmContext {
    pub(crate) async fn closed(&self) {
        let mut shutdown = self.shutdown.clone();
        let _ = shutdown.wait_for(|stopped| *stopped).await;
    }
}

enum DriverOutcome {
    Complete,
    GaveUp,
    Shutdown,
}

/// Runs until the transfer completes, the engine gives up, or shutdown.
pub(crate) async fn run_download(ctx: Arc<SwarmContext>, transfer: Arc<TransferState>) {
    let info_hash = transfer.info_hash();
    tracing::info!(
        %info_hash,
        name = %transfer.descriptor().name,
        total = transfer.total_length(),
        "Starting download"
    );

    let outcome = tokio::select! {
        () = drive(&ctx, &transfer) => DriverOutcome::Complete,
        () = stalled(&transfer, ctx.config.give_up_after) => DriverOutcome::GaveUp,
        () = ctx.closed() => DriverOutcome::Shutdown,
    };

    match outcome {
        DriverOutcome::Complete => {
            announce_all(&ctx, &transfer, AnnounceEvent::Completed).await;
            tracing::info!(%info_hash, bytes = transfer.bytes_completed(), "Download complete");
        }
        DriverOutcome::GaveUp => {
            tracing::warn!(
                %info_hash,
                completed = transfer.bytes_completed(),
                total = transfer.total_length(),
                "No progress within give-up window, abandoning download"
            );
            transfer.transition(TransferStatus::GaveUp);
        }
        DriverOutcome::Shutdown => {
            tracing::debug!(%info_hash, "Download driver stopped by shutdown");
        }
    }
}

async fn drive(ctx: &SwarmContext, transfer: &Arc<TransferState>) {
    let mut event = AnnounceEvent::Started;
    let mut round = 0u32;

    while !transfer.is_complete() {
        round += 1;
        let peers = discover_peers(ctx, transfer, event).await;
        event = AnnounceEvent::Periodic;
        tracing::debug!(
            info_hash = %transfer.info_hash(),
            round,
            peers = peers.len(),
            "Peer discovery round"
        );

        futures::stream::iter(peers)
            .for_each_concurrent(ctx.config.max_peer_connections, |address| async move {
                if let Err(e) = download_from_peer(ctx, transfer, address).await {
                    tracing::debug!(peer = %address, error = %e, "Peer session ended");
                }
            })
            .await;

        if !transfer.is_complete() {
            tokio::time::sleep(ctx.config.rediscover_interval).await;
        }
    }
}

/// Resolves once no piece has completed for `limit`.
async fn stalled(transfer: &TransferState, limit: Option<Duration>) {
    let Some(limit) = limit else {
        return std::future::pending().await;
    };
    loop {
        let idle = transfer.idle_for();
        if idle >= limit {
            return;
        }
        tokio::time::sleep(limit - idle).await;
    }
}

fn announce_request(
    ctx: &SwarmContext,
    transfer: &TransferState,
    event: AnnounceEvent,
) -> AnnounceRequest {
    AnnounceRequest {
        info_hash: transfer.info_hash(),
        peer_id: ctx.peer_id,
        port: ctx.local_port,
        uploaded: transfer.uploaded(),
        downloaded: transfer.bytes_completed(),
        left: transfer.bytes_left(),
        event,
    }
}

/// Announces to every HTTP(S) tracker concurrently, returning all peers.
async fn announce_all(
    ctx: &SwarmContext,
    transfer: &TransferState,
    event: AnnounceEvent,
) -> Vec<SocketAddr> {
    let request = announce_request(ctx, transfer, event);
    let announces = transfer
        .descriptor()
        .announce_urls
        .iter()
        .filter(|url| {
            let supported = HttpTrackerClient::supports(url);
            if !supported {
                tracing::debug!(tracker = %url, "Skipping tracker with unsupported scheme");
            }
            supported
        })
        .map(|url| {
            let request = &request;
            async move {
                match ctx.tracker.announce(url, request).await {
                    Ok(response) => response.peers,
                    Err(e) => {
                        tracing::warn!(error = %e, "Tracker announce failed");
                        Vec::new()
                    }
                }
            }
        });

    futures::future::join_all(announces)
        .await
        .into_iter()
        .flatten()
        .collect()
}

async fn discover_peers(
    ctx: &SwarmContext,
    transfer: &TransferState,
    event: AnnounceEvent,
) -> Vec<SocketAddr> {
    let mut candidates = ctx.config.initial_peers.clone();
    candidates.extend(announce_all(ctx, transfer, event).await);

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|address| seen.insert(*address))
        .filter(|address| usable_peer(&ctx.config, ctx.local_port, address))
        .collect()
}

fn usable_peer(config: &EngineConfig, local_port: u16, address: &SocketAddr) -> bool {
    if address.port() == 0 {
        return false;
    }
    if (address.is_ipv4() && config.disable_ipv4) || (address.is_ipv6() && config.disable_ipv6) {
        return false;
    }
    // Trackers commonly echo our own announce back
    let own = address.port() == local_port
        && (address.ip().is_loopback() || address.ip() == config.identity.listen_address);
    !own
}

/// A claimed piece; returned to the pool on drop unless already verified.
struct PieceClaim {
    transfer: Arc<TransferState>,
    index: PieceIndex,
}

impl Drop for PieceClaim {
    fn drop(&mut self) {
        self.transfer.release_piece(self.index);
    }
}

struct PieceDownload {
    claim: PieceClaim,
    length: u32,
    block_size: u32,
    buffer: Vec<u8>,
    requested: Vec<bool>,
    received: Vec<bool>,
    outstanding: usize,
}

impl PieceDownload {
    fn new(transfer: Arc<TransferState>, index: PieceIndex, block_size: u32) -> Self {
        let length = transfer.descriptor().piece_size(index);
        let block_size = block_size.max(1);
        let blocks = length.div_ceil(block_size) as usize;
        Self {
            claim: PieceClaim { transfer, index },
            length,
            block_size,
            buffer: vec![0u8; length as usize],
            requested: vec![false; blocks],
            received: vec![false; blocks],
            outstanding: 0,
        }
    }

    fn index(&self) -> PieceIndex {
        self.claim.index
    }

    fn block_len(&self, block: usize) -> u32 {
        let offset = block as u32 * self.block_size;
        self.block_size.min(self.length - offset)
    }

    /// Requests to send so that up to [`PIPELINE_DEPTH`] are outstanding.
    fn next_requests(&mut self) -> Vec<PeerMessage> {
        let mut requests = Vec::new();
        for block in 0..self.requested.len() {
            if self.outstanding >= PIPELINE_DEPTH {
                break;
            }
            if self.requested[block] {
                continue;
            }
            self.requested[block] = true;
            self.outstanding += 1;
            requests.push(PeerMessage::Request {
                piece_index: self.claim.index,
                offset: block as u32 * self.block_size,
                length: self.block_len(block),
            });
        }
        requests
    }

    /// A choking peer discards our queued requests.
    fn reset_requests(&mut self) {
        self.requested.clone_from(&self.received);
        self.outstanding = 0;
    }

    /// Stores a block; returns true once every block has arrived.
    fn accept_block(&mut self, offset: u32, data: &[u8]) -> Result<bool, EngineError> {
        let block = (offset / self.block_size) as usize;
        let aligned = offset % self.block_size == 0;
        if !aligned || block >= self.received.len() || data.len() as u32 != self.block_len(block)
        {
            return Err(EngineError::Protocol {
                message: format!(
                    "Unexpected block at offset {offset} ({} bytes) for piece {}",
                    data.len(),
                    self.claim.index
                ),
            });
        }

        if !self.received[block] {
            let start = offset as usize;
            self.buffer[start..start + data.len()].copy_from_slice(data);
            self.received[block] = true;
            self.requested[block] = true;
            self.outstanding = self.outstanding.saturating_sub(1);
        }

        Ok(self.received.iter().all(|done| *done))
    }

    /// Verifies the assembled piece and commits it to storage.
    async fn finish(self) -> Result<(), EngineError> {
        let transfer = &self.claim.transfer;
        let index = self.claim.index;
        let expected = transfer
            .descriptor()
            .piece_hashes
            .get(index.as_u32() as usize)
            .ok_or_else(|| EngineError::Protocol {
                message: format!("Piece {index} out of range"),
            })?;

        if Sha1::digest(&self.buffer).as_slice() != expected {
            return Err(EngineError::Protocol {
                message: format!("Piece {index} failed hash verification"),
            });
        }

        transfer.storage().write_piece(index, &self.buffer).await?;
        transfer.complete_piece(index);
        Ok(())
    }
}

async fn download_from_peer(
    ctx: &SwarmContext,
    transfer: &Arc<TransferState>,
    address: SocketAddr,
) -> Result<(), EngineError> {
    let handshake = PeerHandshake::new(transfer.info_hash(), ctx.peer_id);
    let (mut connection, remote) =
        PeerConnection::connect(address, handshake, ctx.config.connect_timeout).await?;
    if remote.peer_id == ctx.peer_id {
        return Ok(());
    }
    tracing::debug!(peer = %address, info_hash = %transfer.info_hash(), "Connected to peer");

    let piece_count = transfer.descriptor().piece_count();
    let mut peer_has = PieceBitfield::new(piece_count);
    let mut choked = true;
    let mut interested = false;
    let mut active: Option<PieceDownload> = None;

    loop {
        if transfer.is_complete() {
            return Ok(());
        }

        if !interested && transfer.wants_from(&peer_has) {
            connection.send(&PeerMessage::Interested).await?;
            interested = true;
        }

        if !choked {
            if active.is_none() {
                match transfer.claim_piece(&peer_has) {
                    Some(index) => {
                        active = Some(PieceDownload::new(
                            Arc::clone(transfer),
                            index,
                            ctx.config.block_size,
                        ));
                    }
                    None if !peer_has.is_empty() && !transfer.wants_from(&peer_has) => {
                        connection.send(&PeerMessage::NotInterested).await?;
                        return Ok(());
                    }
                    None => {}
                }
            }
            if let Some(download) = active.as_mut() {
                for request in download.next_requests() {
                    connection.send(&request).await?;
                }
            }
        }

        let message = tokio::time::timeout(ctx.config.peer_timeout, connection.receive())
            .await
            .map_err(|_| EngineError::PeerConnection {
                reason: format!("Peer {address} idle for {:?}", ctx.config.peer_timeout),
            })??;

        if ctx.config.debug {
            tracing::debug!(peer = %address, message = ?MessageSummary(&message), "Received");
        }

        match message {
            PeerMessage::Bitfield { bitfield } => {
                peer_has = PieceBitfield::from_wire(&bitfield, piece_count).ok_or_else(|| {
                    EngineError::Protocol {
                        message: format!("Bitfield of {} bytes from {address}", bitfield.len()),
                    }
                })?;
            }
            PeerMessage::Have { piece_index } => peer_has.set(piece_index),
            PeerMessage::Choke => {
                choked = true;
                if let Some(download) = active.as_mut() {
                    download.reset_requests();
                }
            }
            PeerMessage::Unchoke => choked = false,
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => {
                let finished = match active.as_mut() {
                    Some(download) if download.index() == piece_index => {
                        download.accept_block(offset, &data)?
                    }
                    _ => false,
                };
                if finished {
                    if let Some(download) = active.take() {
                        download.finish().await?;
                    }
                }
            }
            PeerMessage::KeepAlive
            | PeerMessage::Interested
            | PeerMessage::NotInterested
            | PeerMessage::Request { .. }
            | PeerMessage::Cancel { .. }
            | PeerMessage::Port { .. } => {}
        }
    }
}

/// Debug view of a message without dumping block payloads.
struct MessageSummary<'a>(&'a PeerMessage);

impl std::fmt::Debug for MessageSummary<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => write!(f, "Piece({piece_index}, {offset}, {} bytes)", data.len()),
            PeerMessage::Bitfield { bitfield } => write!(f, "Bitfield({} bytes)", bitfield.len()),
            other => write!(f, "{other:?}"),
        }
    }
}
