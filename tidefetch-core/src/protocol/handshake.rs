//! Handshake framing

use super::types::{PeerHandshake, PeerId};
use crate::descriptor::InfoHash;
use crate::engine::EngineError;

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/// Length of a BEP 3 handshake: 1 + 19 + 8 + 20 + 20.
pub const HANDSHAKE_LEN: usize = 68;

pub struct HandshakeCodec;

impl HandshakeCodec {
    pub fn encode(handshake: &PeerHandshake) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PROTOCOL.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL);
        buf[20..28].copy_from_slice(&handshake.reserved);
        buf[28..48].copy_from_slice(handshake.info_hash.as_bytes());
        buf[48..68].copy_from_slice(handshake.peer_id.as_bytes());
        buf
    }

    /// # Errors
    /// - `EngineError::Protocol` - Peer speaks a different protocol
    pub fn decode(buf: &[u8; HANDSHAKE_LEN]) -> Result<PeerHandshake, EngineError> {
        if usize::from(buf[0]) != PROTOCOL.len() || &buf[1..20] != PROTOCOL {
            return Err(EngineError::Protocol {
                message: "Unexpected protocol identifier in handshake".to_string(),
            });
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Ok(PeerHandshake {
            reserved,
            info_hash: InfoHash::new(info_hash),
            peer_id: PeerId::new(peer_id),
        })
    }
}
