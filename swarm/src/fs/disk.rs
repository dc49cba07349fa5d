use std::{
    fs,
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use crate::{bitfield::Bitfield, store::StoreInfo};
use super::{DiskError, Piece, Result};

/// The local copy of the shared file.
///
/// One lock covers both the file handle and the piece flags, so a flag is
/// set only after its bytes are on disk and a read never observes a flag
/// without its data.
#[derive(Debug)]
pub struct PieceStore {

    path: PathBuf,

    info: StoreInfo,

    inner: Mutex<Inner>,

}

#[derive(Debug)]
struct Inner {
    // None once closed.
    handle: Option<fs::File>,
    bitfield: Bitfield,
}

impl PieceStore {

    /// Opens the backing file. A peer that starts with the file must find it
    /// at full size, otherwise the file is created and sized up front.
    pub fn open(path: impl Into<PathBuf>, info: StoreInfo, has_file: bool) -> Result<Self> {
        let path = path.into();
        let num_pieces = info.num_pieces as usize;

        let (handle, bitfield) = if has_file {
            let handle = fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => DiskError::MissingFile(path.clone()),
                    _ => e.into(),
                })?;
            let actual = handle.metadata()?.len();
            if actual != info.total_len {
                return Err(DiskError::SizeMismatch {
                    path,
                    expected: info.total_len,
                    actual,
                });
            }
            tracing::info!("opened complete file: {:?}", &path);
            (handle, Bitfield::full(num_pieces))
        } else {
            create_parent(&path)?;
            let handle = fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(true)
                .open(&path)?;
            handle.set_len(info.total_len)?;
            tracing::info!("created file: {:?}", &path);
            (handle, Bitfield::new(num_pieces))
        };

        Ok(Self {
            path,
            info,
            inner: Mutex::new(Inner { handle: Some(handle), bitfield }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &StoreInfo {
        &self.info
    }

    pub fn has(&self, idx: usize) -> bool {
        self.lock().bitfield.has(idx)
    }

    // Snapshot of the pieces held right now.
    pub fn bitfield(&self) -> Bitfield {
        self.lock().bitfield.clone()
    }

    pub fn count(&self) -> usize {
        self.lock().bitfield.count()
    }

    pub fn is_complete(&self) -> bool {
        self.lock().bitfield.is_complete()
    }

    /// Reads a whole piece, None if the piece is not held.
    pub fn read(&self, idx: usize) -> Result<Option<Piece>> {
        if !self.info.contains(idx) {
            return Err(DiskError::PieceOutOfRange(idx));
        }

        let mut inner = self.lock();
        if !inner.bitfield.has(idx) {
            return Ok(None);
        }
        let handle = inner.handle.as_mut().ok_or(DiskError::Closed)?;

        let mut buf = vec![0; self.info.piece_length(idx)];
        handle.seek(SeekFrom::Start(self.info.piece_byte_offset(idx)))?;
        handle.read_exact(&mut buf)?;
        Ok(Some(Piece::new(idx, buf)))
    }

    /// Writes a whole piece. Returns true if the piece was newly stored,
    /// false if it was already held (the existing bytes are kept).
    pub fn write(&self, piece: &Piece) -> Result<bool> {
        let idx = piece.idx();
        if !self.info.contains(idx) {
            return Err(DiskError::PieceOutOfRange(idx));
        }
        let expected = self.info.piece_length(idx);
        if piece.len() != expected {
            return Err(DiskError::PieceLength {
                idx,
                expected,
                actual: piece.len(),
            });
        }

        let mut inner = self.lock();
        if inner.bitfield.has(idx) {
            return Ok(false);
        }
        let handle = inner.handle.as_mut().ok_or(DiskError::Closed)?;

        handle.seek(SeekFrom::Start(self.info.piece_byte_offset(idx)))?;
        handle.write_all(piece.data())?;
        inner.bitfield.set(idx);
        Ok(true)
    }

    // The async variants run on the blocking pool so file I/O and waits on
    // the store lock stay off the runtime's worker threads.

    pub async fn read_piece(self: &Arc<Self>, idx: usize) -> Result<Option<Piece>> {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.read(idx)).await?
    }

    pub async fn write_piece(self: &Arc<Self>, piece: Piece) -> Result<bool> {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.write(&piece)).await?
    }

    pub async fn snapshot(self: &Arc<Self>) -> Result<Bitfield> {
        let store = Arc::clone(self);
        Ok(tokio::task::spawn_blocking(move || store.bitfield()).await?)
    }

    /// Flushes and releases the file. Later reads and writes fail.
    pub fn close(&self) -> Result<()> {
        if let Some(handle) = self.lock().handle.take() {
            handle.sync_all()?;
            tracing::debug!("closed file: {:?}", &self.path);
        }
        Ok(())
    }

    // Flags and file stay consistent across a panicking holder, a flag is
    // only set after a completed write.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.is_dir() {
            tracing::info!("creating directory: {:?}", dir);
            fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}
