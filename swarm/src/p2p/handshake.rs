use bytes::{BufMut, Buf, BytesMut};
use tokio_util::codec::{Encoder, Decoder};
use crate::PeerId;
use super::PeerError;

pub const HEADER: [u8; 18] = *b"P2PFILESHARINGPROJ";

pub const HANDSHAKE_LEN: usize = 32;

#[derive(Clone, PartialEq, Eq)]
pub struct Handshake {
    pub header:     [u8; 18],
    pub reserved:   [u8; 10],
    pub peer_id:    PeerId,
}

impl Handshake {
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            header:     HEADER,
            reserved:   [0; 10],
            peer_id,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.header == HEADER
    }

    pub fn header_lossy(&self) -> String {
        String::from_utf8_lossy(&self.header).into_owned()
    }
}

// Whether buffered bytes start like a handshake rather than a length prefix.
// Any length prefix equal to these bytes is far beyond the frame limit.
pub fn looks_like_handshake(src: &[u8]) -> bool {
    src.len() >= 4 && src[..4] == HEADER[..4]
}

pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {

    type Error = PeerError;

    fn encode(&mut self, item: Handshake, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(HANDSHAKE_LEN);
        dst.extend_from_slice(&item.header);
        dst.extend_from_slice(&item.reserved);
        dst.put_u32(item.peer_id);
        Ok(())
    }
}

impl Decoder for HandshakeCodec {

    type Item = Handshake;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {

        // Handshake not fully recieved.
        if src.remaining() < HANDSHAKE_LEN {
            return Ok(None);
        }

        let mut header = [0; 18];
        src.copy_to_slice(&mut header);

        let mut reserved = [0; 10];
        src.copy_to_slice(&mut reserved);

        let peer_id = src.get_u32();

        Ok(Some(Handshake {
            header,
            reserved,
            peer_id,
        }))
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("header", &String::from_utf8_lossy(&self.header))
            .field("reserved", &hex::encode(self.reserved))
            .field("peer_id", &self.peer_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_layout() {
        let mut dst = BytesMut::new();
        HandshakeCodec.encode(Handshake::new(1001), &mut dst).unwrap();
        assert_eq!(dst.len(), HANDSHAKE_LEN);
        assert_eq!(&dst[..18], b"P2PFILESHARINGPROJ");
        assert_eq!(&dst[18..28], &[0; 10]);
        assert_eq!(&dst[28..], &[0, 0, 0x03, 0xe9]);
    }

    #[test]
    fn test_handshake_decoding() {
        let mut src = BytesMut::new();
        src.extend_from_slice(b"P2PFILESHARINGPROJ");
        src.extend_from_slice(&[0; 10]);
        src.extend_from_slice(&[0, 0, 0x03, 0xea]);

        let handshake = HandshakeCodec.decode(&mut src).unwrap().unwrap();
        assert!(handshake.is_valid());
        assert_eq!(handshake.peer_id, 1002);
        assert!(src.is_empty());
    }

    #[test]
    fn test_handshake_decoding_with_incomplete_data() {
        let mut src = BytesMut::new();
        src.extend_from_slice(b"P2PFILESHARINGPROJ");
        let handshake = HandshakeCodec.decode(&mut src);
        assert!(handshake.unwrap().is_none());
        assert_eq!(src.len(), 18, "partial handshake must stay buffered");
    }

    #[test]
    fn test_handshake_decoding_with_extra_data() {
        let mut src = BytesMut::new();
        HandshakeCodec.encode(Handshake::new(7), &mut src).unwrap();
        src.extend_from_slice(&[0, 0, 0, 1, 2]);
        let handshake = HandshakeCodec.decode(&mut src).unwrap().unwrap();
        assert_eq!(handshake.peer_id, 7);
        assert_eq!(&src[..], &[0, 0, 0, 1, 2]);
    }

    #[test]
    fn test_incorrect_header() {
        let mut src = BytesMut::new();
        src.extend_from_slice(b"P2PFILESHARINGXXXX");
        src.extend_from_slice(&[0; 14]);
        let handshake = HandshakeCodec.decode(&mut src).unwrap().unwrap();
        assert!(!handshake.is_valid());
        assert_eq!(handshake.header_lossy(), "P2PFILESHARINGXXXX");
    }
}
