//! Length-prefixed message framing

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::types::PeerMessage;
use crate::descriptor::PieceIndex;
use crate::engine::EngineError;

mod id {
    pub const CHOKE: u8 = 0;
    pub const UNCHOKE: u8 = 1;
    pub const INTERESTED: u8 = 2;
    pub const NOT_INTERESTED: u8 = 3;
    pub const HAVE: u8 = 4;
    pub const BITFIELD: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const PIECE: u8 = 7;
    pub const CANCEL: u8 = 8;
    pub const PORT: u8 = 9;
}

pub struct MessageCodec;

impl MessageCodec {
    /// Encodes a message including its 4-byte length prefix.
    pub fn encode(message: &PeerMessage) -> Bytes {
        let mut buf = BytesMut::with_capacity(17);

        match message {
            PeerMessage::KeepAlive => buf.put_u32(0),
            PeerMessage::Choke => Self::put_header(&mut buf, id::CHOKE, 0),
            PeerMessage::Unchoke => Self::put_header(&mut buf, id::UNCHOKE, 0),
            PeerMessage::Interested => Self::put_header(&mut buf, id::INTERESTED, 0),
            PeerMessage::NotInterested => Self::put_header(&mut buf, id::NOT_INTERESTED, 0),
            PeerMessage::Have { piece_index } => {
                Self::put_header(&mut buf, id::HAVE, 4);
                buf.put_u32(piece_index.as_u32());
            }
            PeerMessage::Bitfield { bitfield } => {
                Self::put_header(&mut buf, id::BITFIELD, bitfield.len());
                buf.put_slice(bitfield);
            }
            PeerMessage::Request {
                piece_index,
                offset,
                length,
            } => {
                Self::put_header(&mut buf, id::REQUEST, 12);
                buf.put_u32(piece_index.as_u32());
                buf.put_u32(*offset);
                buf.put_u32(*length);
            }
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => {
                Self::put_header(&mut buf, id::PIECE, 8 + data.len());
                buf.put_u32(piece_index.as_u32());
                buf.put_u32(*offset);
                buf.put_slice(data);
            }
            PeerMessage::Cancel {
                piece_index,
                offset,
                length,
            } => {
                Self::put_header(&mut buf, id::CANCEL, 12);
                buf.put_u32(piece_index.as_u32());
                buf.put_u32(*offset);
                buf.put_u32(*length);
            }
            PeerMessage::Port { port } => {
                Self::put_header(&mut buf, id::PORT, 2);
                buf.put_u16(*port);
            }
        }

        buf.freeze()
    }

    fn expect_len(body: &Bytes, expected: usize, name: &str) -> Result<(), EngineError> {
        if body.len() == expected {
            Ok(())
        } else {
            Err(EngineError::Protocol {
                message: format!("Invalid {name} message length: {}", body.len() + 1),
            })
        }
    }

    fn put_header(buf: &mut BytesMut, message_id: u8, body_len: usize) {
        buf.put_u32(1 + body_len as u32);
        buf.put_u8(message_id);
    }

    /// Decodes a message body, i.e. everything after the length prefix.
    ///
    /// An empty body is a keep-alive.
    ///
    /// # Errors
    /// - `EngineError::Protocol` - Unknown id or body length wrong for its id
    pub fn decode(mut body: Bytes) -> Result<PeerMessage, EngineError> {
        if body.is_empty() {
            return Ok(PeerMessage::KeepAlive);
        }

        let message_id = body.get_u8();

        let message = match message_id {
            id::CHOKE => {
                Self::expect_len(&body, 0, "Choke")?;
                PeerMessage::Choke
            }
            id::UNCHOKE => {
                Self::expect_len(&body, 0, "Unchoke")?;
                PeerMessage::Unchoke
            }
            id::INTERESTED => {
                Self::expect_len(&body, 0, "Interested")?;
                PeerMessage::Interested
            }
            id::NOT_INTERESTED => {
                Self::expect_len(&body, 0, "NotInterested")?;
                PeerMessage::NotInterested
            }
            id::HAVE => {
                Self::expect_len(&body, 4, "Have")?;
                PeerMessage::Have {
                    piece_index: PieceIndex::new(body.get_u32()),
                }
            }
            id::BITFIELD => PeerMessage::Bitfield { bitfield: body },
            id::REQUEST | id::CANCEL => {
                Self::expect_len(&body, 12, "Request")?;
                let piece_index = PieceIndex::new(body.get_u32());
                let offset = body.get_u32();
                let length = body.get_u32();
                if message_id == id::REQUEST {
                    PeerMessage::Request {
                        piece_index,
                        offset,
                        length,
                    }
                } else {
                    PeerMessage::Cancel {
                        piece_index,
                        offset,
                        length,
                    }
                }
            }
            id::PIECE => {
                if body.len() < 8 {
                    return Err(EngineError::Protocol {
                        message: "Piece message too short".to_string(),
                    });
                }
                let piece_index = PieceIndex::new(body.get_u32());
                let offset = body.get_u32();
                PeerMessage::Piece {
                    piece_index,
                    offset,
                    data: body,
                }
            }
            id::PORT => {
                Self::expect_len(&body, 2, "Port")?;
                PeerMessage::Port {
                    port: body.get_u16(),
                }
            }
            other => {
                return Err(EngineError::Protocol {
                    message: format!("Unknown message ID: {other}"),
                });
            }
        };

        Ok(message)
    }
}
