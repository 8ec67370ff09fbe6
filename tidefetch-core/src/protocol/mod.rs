//! BitTorrent peer wire protocol (BEP 3)
//!
//! Handshake and length-prefixed message framing over TCP, plus the piece
//! availability bitfield exchanged after the handshake.

pub mod connection;
pub mod handshake;
pub mod messages;
pub mod types;

pub use connection::PeerConnection;
pub use handshake::{HANDSHAKE_LEN, HandshakeCodec};
pub use messages::MessageCodec;
pub use types::{PeerHandshake, PeerId, PeerMessage, PieceBitfield};
