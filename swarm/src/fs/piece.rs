use bytes::Bytes;

// A whole piece of the shared file, the unit of transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {

    idx: usize,

    data: Bytes,

}

impl Piece {

    pub fn new(idx: usize, data: impl Into<Bytes>) -> Self {
        Self { idx, data: data.into() }
    }

    pub fn idx(&self) -> usize {
        self.idx
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

}
