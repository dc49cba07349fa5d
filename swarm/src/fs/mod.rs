use std::path::PathBuf;

mod piece;
mod disk;

pub use disk::PieceStore;
pub use piece::Piece;

#[derive(thiserror::Error, Debug)]
pub enum DiskError {

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("peer starts with the file but {0} does not exist")]
    MissingFile(PathBuf),

    #[error("file {path} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("piece index {0} out of range")]
    PieceOutOfRange(usize),

    #[error("piece {idx} has {actual} bytes, expected {expected}")]
    PieceLength {
        idx: usize,
        expected: usize,
        actual: usize,
    },

    #[error("piece store is closed")]
    Closed,

    #[error("disk task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

}

pub type Result<T> = std::result::Result<T, DiskError>;
