use bytes::{BufMut, Buf, Bytes, BytesMut};
use tokio_util::codec::{Encoder, Decoder};
use crate::fs::Piece;
use super::{handshake::*, PeerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {

    // First frame in each direction, identifies the sender.
    Handshake(Handshake),

    // The sender will not serve requests until it unchokes.
    Choke,

    // Requests from the peer will be served.
    Unchoke,

    // The sender wants pieces the receiver has.
    Interested,

    // The receiver has nothing the sender lacks.
    NotInterested,

    // The sender now holds the piece.
    Have { idx: u32 },

    // Every piece the sender holds, piece 0 in the high bit of the first byte.
    Bitfield(Bytes),

    // Asks for a whole piece.
    Request { idx: u32 },

    // A whole piece.
    Piece(Piece),

    // The sender has the complete file.
    Shutdown,
}

// Frame type ids.
const CHOKE: u8 = 0;
const UNCHOKE: u8 = 1;
const INTERESTED: u8 = 2;
const NOT_INTERESTED: u8 = 3;
const HAVE: u8 = 4;
const BITFIELD: u8 = 5;
const REQUEST: u8 = 6;
const PIECE: u8 = 7;
const SHUTDOWN: u8 = 100;

/// Frames are `<len: u32><type: u8><payload>` where len counts the type
/// byte and payload. The first frame read is always a handshake.
#[derive(Debug)]
pub struct MessageCodec {

    // Longest frame body accepted from the peer.
    max_frame_len: usize,

    expect_handshake: bool,

}

impl MessageCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            expect_handshake: true,
        }
    }
}

impl Encoder<Message> for MessageCodec {

    type Error = PeerError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match msg {

            // <header><zero bits><peer id>
            Message::Handshake(handshake) => HandshakeCodec.encode(handshake, dst)?,

            // [0, 0, 0, 1, 0]
            Message::Choke => {
                dst.put_u32(1);
                dst.put_u8(CHOKE);
            },

            // [0, 0, 0, 1, 1]
            Message::Unchoke => {
                dst.put_u32(1);
                dst.put_u8(UNCHOKE);
            },

            // [0, 0, 0, 1, 2]
            Message::Interested => {
                dst.put_u32(1);
                dst.put_u8(INTERESTED);
            },

            // [0, 0, 0, 1, 3]
            Message::NotInterested => {
                dst.put_u32(1);
                dst.put_u8(NOT_INTERESTED);
            },

            // have: <len=0005><id=4><piece index>
            Message::Have { idx } => {
                dst.put_u32(5);
                dst.put_u8(HAVE);
                dst.put_u32(idx);
            },

            // bitfield: <len=0001+X><id=5><bitfield>
            Message::Bitfield(bits) => {
                dst.put_u32(1 + bits.len() as u32);
                dst.put_u8(BITFIELD);
                dst.extend_from_slice(&bits);
            },

            // request: <len=0005><id=6><index>
            Message::Request { idx } => {
                dst.put_u32(5);
                dst.put_u8(REQUEST);
                dst.put_u32(idx);
            },

            // piece: <len=0005+X><id=7><index><data>
            Message::Piece(piece) => {
                dst.reserve(9 + piece.len());
                dst.put_u32(5 + piece.len() as u32);
                dst.put_u8(PIECE);
                dst.put_u32(piece.idx() as u32);
                dst.extend_from_slice(piece.data());
            },

            // [0, 0, 0, 1, 100]
            Message::Shutdown => {
                dst.put_u32(1);
                dst.put_u8(SHUTDOWN);
            },
        }

        Ok(())
    }
}

impl Decoder for MessageCodec {

    type Item = Message;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {

        // Later handshakes are passed up so the session can ignore them.
        if self.expect_handshake || looks_like_handshake(src) {
            let handshake = HandshakeCodec.decode(src)?;
            if handshake.is_some() {
                self.expect_handshake = false;
            }
            return Ok(handshake.map(Message::Handshake));
        }

        // Can't read message length.
        if src.remaining() < 4 { return Ok(None); }

        let mut peeker = std::io::Cursor::new(&src[..]);
        let msg_len = peeker.get_u32() as usize;

        if msg_len == 0 {
            return Err(PeerError::InvalidMessage);
        }
        if msg_len > self.max_frame_len {
            return Err(PeerError::FrameTooLong { len: msg_len, max: self.max_frame_len });
        }
        if src.remaining() < 4 + msg_len {
            // Haven't recieved all of message.
            src.reserve(4 + msg_len - src.remaining());
            return Ok(None);
        }

        src.advance(4);
        let mut frame = src.split_to(msg_len);
        let id = frame.get_u8();
        let payload_len = frame.remaining();

        let msg = match id {
            CHOKE if payload_len == 0 => Message::Choke,
            UNCHOKE if payload_len == 0 => Message::Unchoke,
            INTERESTED if payload_len == 0 => Message::Interested,
            NOT_INTERESTED if payload_len == 0 => Message::NotInterested,
            HAVE if payload_len == 4 => Message::Have { idx: frame.get_u32() },
            BITFIELD => Message::Bitfield(frame.freeze()),
            REQUEST if payload_len == 4 => Message::Request { idx: frame.get_u32() },
            PIECE if payload_len >= 4 => {
                let idx = frame.get_u32() as usize;
                Message::Piece(Piece::new(idx, frame.freeze()))
            },
            SHUTDOWN if payload_len == 0 => Message::Shutdown,
            CHOKE | UNCHOKE | INTERESTED | NOT_INTERESTED | HAVE | REQUEST | PIECE | SHUTDOWN => {
                tracing::warn!("message id {} with bad payload length {}", id, payload_len);
                return Err(PeerError::InvalidMessage);
            },
            id => {
                tracing::warn!("invalid message id: {}", id);
                return Err(PeerError::InvalidMessageId(id));
            }
        };

        Ok(Some(msg))
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Handshake(handshake) => write!(f, "handshake from {}", handshake.peer_id),
            Message::Choke => write!(f, "choke"),
            Message::Unchoke => write!(f, "unchoke"),
            Message::Interested => write!(f, "interested"),
            Message::NotInterested => write!(f, "not interested"),
            Message::Have { idx } => write!(f, "have piece idx: {}", idx),
            Message::Bitfield(bits) => write!(f, "bitfield of {} bytes", bits.len()),
            Message::Request { idx } => write!(f, "request for piece idx: {}", idx),
            Message::Piece(piece) => write!(f, "piece {{ idx: {}, length: {} }}", piece.idx(), piece.len()),
            Message::Shutdown => write!(f, "shutdown"),
        }
    }
}
