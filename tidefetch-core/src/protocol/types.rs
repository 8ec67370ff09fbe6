//! Wire protocol value types

use bytes::Bytes;
use rand::Rng;

use crate::descriptor::{InfoHash, PieceIndex};

/// Client prefix in Azureus-style peer ids.
pub const PEER_ID_PREFIX: &[u8; 8] = b"-TF0001-";

/// 20-byte peer identifier sent in handshakes and tracker announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 20]);

impl PeerId {
    pub fn new(id: [u8; 20]) -> Self {
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Random id carrying this client's prefix.
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        id[..8].copy_from_slice(PEER_ID_PREFIX);
        rand::rng().fill(&mut id[8..]);
        Self(id)
    }
}

/// Messages exchanged after the handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have {
        piece_index: PieceIndex,
    },
    Bitfield {
        bitfield: Bytes,
    },
    Request {
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    },
    Piece {
        piece_index: PieceIndex,
        offset: u32,
        data: Bytes,
    },
    Cancel {
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    },
    /// DHT port announcement; parsed but never acted on.
    Port {
        port: u16,
    },
}

/// Opening handshake of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerHandshake {
    pub reserved: [u8; 8],
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl PeerHandshake {
    /// Handshake with no extension bits set.
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }
}

/// Piece availability, most significant bit first as on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceBitfield {
    bits: Vec<u8>,
    piece_count: u32,
}

impl PieceBitfield {
    pub fn new(piece_count: u32) -> Self {
        Self {
            bits: vec![0u8; (piece_count as usize).div_ceil(8)],
            piece_count,
        }
    }

    /// Builds a bitfield from wire bytes, ignoring trailing spare bits.
    ///
    /// Returns `None` when the byte length does not match the piece count.
    pub fn from_wire(bytes: &[u8], piece_count: u32) -> Option<Self> {
        if bytes.len() != (piece_count as usize).div_ceil(8) {
            return None;
        }
        let mut bitfield = Self {
            bits: bytes.to_vec(),
            piece_count,
        };
        let spare = bitfield.bits.len() * 8 - piece_count as usize;
        if let Some(last) = bitfield.bits.last_mut() {
            *last &= 0xFFu8.checked_shl(spare as u32).unwrap_or(0);
        }
        Some(bitfield)
    }

    pub fn set(&mut self, index: PieceIndex) {
        let index = index.as_u32();
        if index < self.piece_count {
            self.bits[index as usize / 8] |= 0x80 >> (index % 8);
        }
    }

    pub fn has(&self, index: PieceIndex) -> bool {
        let index = index.as_u32();
        index < self.piece_count && self.bits[index as usize / 8] & (0x80 >> (index % 8)) != 0
    }

    pub fn count(&self) -> u32 {
        self.bits.iter().map(|byte| byte.count_ones()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|byte| *byte == 0)
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }
}
