// Contains the piece geometry of the shared file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreInfo {

    // Length of the file in bytes.
    pub total_len: u64,

    // Length of pieces in bytes.
    pub piece_len: usize,

    // Length of the last piece, will be <= piece_len.
    pub last_piece_len: usize,

    // Number of pieces in the file.
    pub num_pieces: u32,

}

impl StoreInfo {

    pub fn new(total_len: u64, piece_len: usize) -> Self {
        debug_assert!(piece_len > 0, "piece length must be positive");

        let num_pieces = total_len.div_ceil(piece_len as u64) as u32;
        let last_piece_len = if num_pieces == 0 {
            0
        } else {
            (total_len - piece_len as u64 * (num_pieces as u64 - 1)) as usize
        };

        Self {
            total_len,
            piece_len,
            last_piece_len,
            num_pieces,
        }
    }

    pub fn contains(&self, idx: usize) -> bool {
        idx < self.num_pieces as usize
    }

    // Returns length of piece given its index.
    pub fn piece_length(&self, idx: usize) -> usize {
        if idx + 1 == self.num_pieces as usize {
            self.last_piece_len
        } else {
            self.piece_len
        }
    }

    pub fn piece_byte_offset(&self, idx: usize) -> u64 {
        idx as u64 * self.piece_len as u64
    }

    // Largest frame body (type + payload) a peer may legitimately send:
    // either a full piece message or the bitfield message.
    pub fn max_frame_len(&self) -> usize {
        let piece = 1 + 4 + self.piece_len;
        let bitfield = 1 + (self.num_pieces as usize).div_ceil(8);
        piece.max(bitfield)
    }
}
