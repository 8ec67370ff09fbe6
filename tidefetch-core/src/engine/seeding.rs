//! Inbound peer sessions serving verified pieces

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpStream;

use super::EngineError;
use super::swarm::SwarmContext;
use super::transfer::{TransferRegistry, TransferState};
use crate::descriptor::PieceIndex;
use crate::protocol::{PeerConnection, PeerHandshake, PeerMessage};

/// Largest block a peer may request.
const MAX_REQUEST_LEN: u32 = 128 * 1024;

/// Serves one inbound connection until the peer leaves or goes quiet.
pub(crate) async fn serve_peer(
    ctx: Arc<SwarmContext>,
    registry: TransferRegistry,
    stream: TcpStream,
    address: SocketAddr,
) {
    match serve(&ctx, &registry, stream, address).await {
        Ok(()) => tracing::debug!(peer = %address, "Seeding session closed"),
        Err(e) => tracing::debug!(peer = %address, error = %e, "Seeding session ended"),
    }
}

async fn serve(
    ctx: &SwarmContext,
    registry: &TransferRegistry,
    stream: TcpStream,
    address: SocketAddr,
) -> Result<(), EngineError> {
    let (mut connection, remote) =
        tokio::time::timeout(ctx.config.peer_timeout, PeerConnection::accept(stream, address))
            .await
            .map_err(|_| EngineError::PeerConnection {
                reason: format!("No handshake from {address}"),
            })??;

    let transfer = registry
        .read()
        .get(&remote.info_hash)
        .cloned()
        .ok_or(EngineError::UnknownTorrent {
            info_hash: remote.info_hash,
        })?;

    connection
        .send_handshake(&PeerHandshake::new(remote.info_hash, ctx.peer_id))
        .await?;

    let bitfield = transfer.bitfield();
    if !bitfield.is_empty() {
        connection
            .send(&PeerMessage::Bitfield {
                bitfield: bitfield.to_bytes(),
            })
            .await?;
    }
    tracing::debug!(
        peer = %address,
        info_hash = %remote.info_hash,
        pieces = bitfield.count(),
        "Accepted seeding session"
    );

    let mut choking = true;
    loop {
        let message = match tokio::time::timeout(ctx.config.peer_timeout, connection.receive())
            .await
        {
            Ok(result) => result?,
            Err(_) => return Ok(()),
        };

        match message {
            PeerMessage::Interested if choking => {
                connection.send(&PeerMessage::Unchoke).await?;
                choking = false;
            }
            PeerMessage::NotInterested => {
                if !choking {
                    connection.send(&PeerMessage::Choke).await?;
                    choking = true;
                }
            }
            PeerMessage::Request {
                piece_index,
                offset,
                length,
            } if !choking => {
                let Some(data) = read_block(&transfer, piece_index, offset, length).await? else {
                    tracing::debug!(
                        peer = %address,
                        piece = %piece_index,
                        offset,
                        length,
                        "Ignoring unserviceable request"
                    );
                    continue;
                };
                connection
                    .send(&PeerMessage::Piece {
                        piece_index,
                        offset,
                        data,
                    })
                    .await?;
                transfer.record_upload(u64::from(length));
            }
            _ => {}
        }
    }
}

/// Reads a requested block; `None` when the request is out of bounds or
/// the piece is not verified here.
async fn read_block(
    transfer: &TransferState,
    piece_index: PieceIndex,
    offset: u32,
    length: u32,
) -> Result<Option<Bytes>, EngineError> {
    if length == 0 || length > MAX_REQUEST_LEN || !transfer.has_piece(piece_index) {
        return Ok(None);
    }
    let piece_size = transfer.descriptor().piece_size(piece_index);
    if offset.checked_add(length).is_none_or(|end| end > piece_size) {
        return Ok(None);
    }

    let start = u64::from(piece_index.as_u32()) * u64::from(transfer.descriptor().piece_length)
        + u64::from(offset);
    let data = transfer.storage().read(start, u64::from(length)).await?;
    Ok(Some(Bytes::from(data)))
}
