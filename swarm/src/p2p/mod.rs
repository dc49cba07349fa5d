use std::{
    net::SocketAddr,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tokio::sync::mpsc;
use crate::PeerId;

mod session;
mod sender;
mod selector;
pub mod handshake;
pub mod message;
pub mod state;

pub use session::PeerSession;
pub use sender::{outbox, Outbox, OutboxRx};

use self::{message::Message, state::SessionState};

type Result<T, E = PeerError> = std::result::Result<T, E>;
pub type PeerTx = mpsc::UnboundedSender<PeerCommand>;
pub type PeerRx = mpsc::UnboundedReceiver<PeerCommand>;

#[derive(thiserror::Error, Debug)]
pub enum PeerError {

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake provided incorrect header: {0}")]
    IncorrectHeader(String),

    #[error("no handshake recieved")]
    NoHandshake,

    #[error("invalid message ID: {0}")]
    InvalidMessageId(u8),

    #[error("invalid message payload")]
    InvalidMessage,

    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLong {
        len: usize,
        max: usize,
    },

    #[error("channel error: {0}")]
    Channel(String),

    #[error("disk: {0}")]
    Disk(#[from] crate::fs::DiskError),

}

impl<T> From<mpsc::error::SendError<T>> for PeerError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        PeerError::Channel(e.to_string())
    }
}

// Commands that can be sent to a peer session.
#[derive(Debug)]
pub enum PeerCommand {

    // Stop reading, flush the send queue and close.
    Shutdown,

}

/// The part of a session other tasks can reach: its state and its send
/// queue. Messages enqueued here go out in order through the session's
/// sender.
#[derive(Debug)]
pub struct PeerHandle {

    // Remote end of the connection.
    pub address: SocketAddr,

    state: Mutex<SessionState>,

    outbox: Outbox,

    // Serialises choke flips so the flag and the last message sent agree.
    choke_lock: tokio::sync::Mutex<()>,

}

impl PeerHandle {

    pub fn new(address: SocketAddr, num_pieces: usize, outbox: Outbox) -> PeerHandle {
        PeerHandle {
            address,
            state: Mutex::new(SessionState::new(num_pieces)),
            outbox,
            choke_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        self.state().peer_id
    }

    pub fn is_established(&self) -> bool {
        self.state().is_established()
    }

    pub async fn send(&self, msg: Message) -> Result<()> {
        self.outbox.send(msg).await.map_err(Into::into)
    }

    /// Starts serving the peer. Returns false if it was already unchoked,
    /// in which case nothing is sent.
    pub async fn unchoke(&self) -> Result<bool> {
        self.set_choked(false).await
    }

    /// Stops serving the peer. Returns false if it was already choked.
    pub async fn choke(&self) -> Result<bool> {
        self.set_choked(true).await
    }

    async fn set_choked(&self, choked: bool) -> Result<bool> {
        let _guard = self.choke_lock.lock().await;
        {
            let mut state = self.state();
            if state.choked == choked {
                return Ok(false);
            }
            state.choked = choked;
            // Rates are measured per choke period.
            state.download.reset();
        }
        let msg = if choked { Message::Choke } else { Message::Unchoke };
        self.send(msg).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_choke_flips_once() {
        let (tx, mut rx) = outbox(8);
        let handle = PeerHandle::new("127.0.0.1:6008".parse().unwrap(), 4, tx);

        // Starts choked.
        assert!(!handle.choke().await.unwrap());
        assert!(rx.try_recv().is_err());

        handle.state().download.add(100);
        assert!(handle.unchoke().await.unwrap());
        assert_eq!(rx.try_recv().unwrap(), Message::Unchoke);
        assert_eq!(handle.state().download.round(), 0);

        assert!(!handle.unchoke().await.unwrap());
        assert!(rx.try_recv().is_err());

        assert!(handle.choke().await.unwrap());
        assert_eq!(rx.try_recv().unwrap(), Message::Choke);
        assert!(handle.state().choked);
    }
}
