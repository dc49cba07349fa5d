use crate::{bitfield::Bitfield, stats::RateCounter, PeerId};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnState {
    Connected,
    AwaitingHandshake,
    Handshaked, // Our handshake is on the wire, theirs has been read.
    Active,     // Piece selection running.
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionState {

    pub conn_state: ConnState,

    // Id the remote claimed in its handshake.
    pub peer_id: Option<PeerId>,

    pub handshake_sent: bool,

    pub handshake_received: bool,

    // Selection is started once per session.
    pub selecting: bool,

    // Whether we are refusing the peer's requests.
    pub choked: bool,

    // Whether the peer is refusing our requests.
    pub peer_choking: bool,

    // Pieces the peer holds, replaced by bitfield messages and grown by haves.
    pub bitfield: Bitfield,

    // Piece we are waiting on, at most one per connection.
    pub requested: Option<usize>,

    // Interest last declared to the peer, None before the first declaration.
    pub interested: Option<bool>,

    // Whether the peer told us it has the complete file.
    pub peer_complete: bool,

    pub download: RateCounter,

}

impl SessionState {

    pub fn new(num_pieces: usize) -> SessionState {
        SessionState {
            conn_state: ConnState::Connected,
            peer_id: None,
            handshake_sent: false,
            handshake_received: false,
            selecting: false,
            choked: true,
            peer_choking: true,
            bitfield: Bitfield::new(num_pieces),
            requested: None,
            interested: None,
            peer_complete: false,
            download: RateCounter::default(),
        }
    }

    // Both handshakes are through and selection has not started yet.
    pub fn ready_to_select(&self) -> bool {
        self.handshake_sent && self.handshake_received && !self.selecting
    }

    // Schedulers and broadcasts only see connections past the handshake.
    pub fn is_established(&self) -> bool {
        matches!(self.conn_state, ConnState::Handshaked | ConnState::Active)
    }

    #[inline(always)]
    pub fn update(&mut self, f: impl FnOnce(&mut SessionState)) {
        f(self);
    }
}
