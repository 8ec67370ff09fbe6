//! TCP peer connection

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::handshake::{HANDSHAKE_LEN, HandshakeCodec};
use super::messages::MessageCodec;
use super::types::{PeerHandshake, PeerMessage};
use crate::engine::EngineError;

/// Largest frame accepted from a peer: a 128 KiB block plus headers.
pub const MAX_MESSAGE_LEN: u32 = 128 * 1024 + 13;

/// Handshaken connection to a single peer.
pub struct PeerConnection {
    stream: TcpStream,
    address: SocketAddr,
    max_message_len: u32,
}

impl PeerConnection {
    /// Dials `address`, sends our handshake and validates the reply.
    ///
    /// # Errors
    /// - `EngineError::PeerConnection` - Connect timed out or I/O failed
    /// - `EngineError::Protocol` - Peer answered for a different torrent
    pub async fn connect(
        address: SocketAddr,
        handshake: PeerHandshake,
        connect_timeout: Duration,
    ) -> Result<(Self, PeerHandshake), EngineError> {
        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(address)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(EngineError::PeerConnection {
                    reason: format!("Failed to connect to {address}: {e}"),
                });
            }
            Err(_) => {
                return Err(EngineError::PeerConnection {
                    reason: format!("Timed out connecting to {address}"),
                });
            }
        };

        let mut connection = Self::from_stream(stream, address);
        connection.send_handshake(&handshake).await?;
        let remote = connection.read_handshake().await?;

        if remote.info_hash != handshake.info_hash {
            return Err(EngineError::Protocol {
                message: format!("Info hash mismatch in handshake from {address}"),
            });
        }

        Ok((connection, remote))
    }

    /// Wraps an inbound stream and reads the remote handshake.
    ///
    /// The caller decides whether to answer with [`Self::send_handshake`].
    ///
    /// # Errors
    /// - `EngineError::PeerConnection` - Stream closed before a full handshake
    /// - `EngineError::Protocol` - Not a BitTorrent handshake
    pub async fn accept(
        stream: TcpStream,
        address: SocketAddr,
    ) -> Result<(Self, PeerHandshake), EngineError> {
        let mut connection = Self::from_stream(stream, address);
        let remote = connection.read_handshake().await?;
        Ok((connection, remote))
    }

    fn from_stream(stream: TcpStream, address: SocketAddr) -> Self {
        let _ = stream.set_nodelay(true);
        Self {
            stream,
            address,
            max_message_len: MAX_MESSAGE_LEN,
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// # Errors
    /// - `EngineError::PeerConnection` - Write failed
    pub async fn send_handshake(&mut self, handshake: &PeerHandshake) -> Result<(), EngineError> {
        self.stream
            .write_all(&HandshakeCodec::encode(handshake))
            .await
            .map_err(|e| self.io_error("send handshake", &e))
    }

    async fn read_handshake(&mut self) -> Result<PeerHandshake, EngineError> {
        let mut buf = [0u8; HANDSHAKE_LEN];
        self.stream
            .read_exact(&mut buf)
            .await
            .map_err(|e| self.io_error("read handshake", &e))?;
        HandshakeCodec::decode(&buf)
    }

    /// # Errors
    /// - `EngineError::PeerConnection` - Write failed
    pub async fn send(&mut self, message: &PeerMessage) -> Result<(), EngineError> {
        self.stream
            .write_all(&MessageCodec::encode(message))
            .await
            .map_err(|e| self.io_error("send message", &e))
    }

    /// Reads the next complete message.
    ///
    /// # Errors
    /// - `EngineError::PeerConnection` - Read failed or peer hung up
    /// - `EngineError::Protocol` - Oversized or malformed frame
    pub async fn receive(&mut self) -> Result<PeerMessage, EngineError> {
        let length = self
            .stream
            .read_u32()
            .await
            .map_err(|e| self.io_error("read message length", &e))?;

        if length > self.max_message_len {
            return Err(EngineError::Protocol {
                message: format!(
                    "Message of {length} bytes from {} exceeds limit",
                    self.address
                ),
            });
        }

        let mut body = BytesMut::zeroed(length as usize);
        self.stream
            .read_exact(&mut body)
            .await
            .map_err(|e| self.io_error("read message body", &e))?;

        MessageCodec::decode(body.freeze())
    }

    fn io_error(&self, action: &str, error: &std::io::Error) -> EngineError {
        EngineError::PeerConnection {
            reason: format!("Failed to {action} with {}: {error}", self.address),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::descriptor::{InfoHash, PieceIndex};
    use crate::protocol::PeerId;

    #[tokio::test]
    async fn test_handshake_and_message_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let info_hash = InfoHash::new([9u8; 20]);

        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let (mut connection, remote) = PeerConnection::accept(stream, peer).await.unwrap();
            connection
                .send_handshake(&PeerHandshake::new(remote.info_hash, PeerId::generate()))
                .await
                .unwrap();
            connection
                .send(&PeerMessage::Have {
                    piece_index: PieceIndex::new(3),
                })
                .await
                .unwrap();
            connection.receive().await.unwrap()
        });

        let (mut client, remote) = PeerConnection::connect(
            address,
            PeerHandshake::new(info_hash, PeerId::generate()),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        assert_eq!(remote.info_hash, info_hash);
        assert_eq!(
            client.receive().await.unwrap(),
            PeerMessage::Have {
                piece_index: PieceIndex::new(3)
            }
        );
        client.send(&PeerMessage::Interested).await.unwrap();

        assert_eq!(server.await.unwrap(), PeerMessage::Interested);
    }

    #[tokio::test]
    async fn test_info_hash_mismatch_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let (mut connection, _) = PeerConnection::accept(stream, peer).await.unwrap();
            let other = PeerHandshake::new(InfoHash::new([1u8; 20]), PeerId::generate());
            let _ = connection.send_handshake(&other).await;
        });

        let result = PeerConnection::connect(
            address,
            PeerHandshake::new(InfoHash::new([2u8; 20]), PeerId::generate()),
            Duration::from_secs(2),
        )
        .await;
        assert!(matches!(result, Err(EngineError::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let result = PeerConnection::connect(
            address,
            PeerHandshake::new(InfoHash::new([2u8; 20]), PeerId::generate()),
            Duration::from_secs(2),
        )
        .await;
        assert!(matches!(result, Err(EngineError::PeerConnection { .. })));
    }
}
