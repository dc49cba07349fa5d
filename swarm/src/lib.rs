mod bitfield;
mod config;
mod peers;
mod store;
mod stats;
mod fs;
mod p2p;
mod choke;
mod engine;

// Numeric peer identifier taken from the peer list.
pub type PeerId = u32;

// Re-exports
pub use bitfield::Bitfield;
pub use config::{Config, ConfigError};
pub use peers::{PeerDescriptor, PeerTable};
pub use store::StoreInfo;
pub use stats::RateCounter;
pub use fs::{DiskError, Piece, PieceStore};
pub use p2p::{
    handshake::Handshake,
    message::Message,
    state::{ConnState, SessionState},
    PeerError,
    PeerHandle,
};
pub use choke::{ChokeScheduler, OptimisticUnchokeScheduler};
pub use engine::{EngineContext, EngineError, PeerEngine};
