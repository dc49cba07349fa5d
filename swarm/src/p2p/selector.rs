use std::sync::Arc;
use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use crate::{bitfield::Bitfield, fs::PieceStore};
use super::{message::Message, PeerHandle};

pub type SelectorTx = mpsc::UnboundedSender<SelectorEvent>;
pub type SelectorRx = mpsc::UnboundedReceiver<SelectorEvent>;

// What the session saw that may change which piece to ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorEvent {
    Bitfield,
    Have(usize),
    PieceReceived(usize),
    Unchoked,
}

/// Decides what to ask one neighbor for.
///
/// Keeps at most one request outstanding on the connection. A request is
/// cleared when its piece arrives or the neighbor unchokes us again, since
/// requests sent while choked are dropped by the other side.
#[derive(Debug)]
pub struct PieceSelector {

    handle: Arc<PeerHandle>,

    store: Arc<PieceStore>,

    // Most missing pieces considered per decision.
    max_candidates: usize,

}

impl PieceSelector {

    pub fn new(handle: Arc<PeerHandle>, store: Arc<PieceStore>, max_candidates: usize) -> Self {
        Self {
            handle,
            store,
            max_candidates,
        }
    }

    pub async fn run(self, mut selector_rx: SelectorRx) {
        while let Some(event) = selector_rx.recv().await {
            let own = match self.store.snapshot().await {
                Ok(own) => own,
                Err(e) => {
                    tracing::error!("selector stopped: {}", e);
                    return;
                },
            };
            for msg in self.on_event(event, &own) {
                if let Err(e) = self.handle.send(msg).await {
                    tracing::debug!("selector stopped: {}", e);
                    return;
                }
            }
        }
    }

    // Messages to send in response to one event.
    pub fn on_event(&self, event: SelectorEvent, own: &Bitfield) -> Vec<Message> {
        let mut state = self.handle.state();

        if matches!(event, SelectorEvent::PieceReceived(_) | SelectorEvent::Unchoked) {
            state.requested = None;
        }

        let candidates = candidates(own, &state.bitfield, self.max_candidates);
        let Some(&idx) = candidates.choose(&mut rand::thread_rng()) else {
            if state.interested != Some(false) {
                state.interested = Some(false);
                return vec![Message::NotInterested];
            }
            return Vec::new();
        };

        if state.peer_choking || state.requested.is_some() {
            return Vec::new();
        }

        tracing::trace!("requesting piece {} after {:?}", idx, event);
        state.requested = Some(idx);
        state.interested = Some(true);
        vec![Message::Interested, Message::Request { idx: idx as u32 }]
    }
}

// Pieces the neighbor has that we lack, capped at `limit`.
pub fn candidates(own: &Bitfield, neighbor: &Bitfield, limit: usize) -> Vec<usize> {
    own.missing_from(neighbor).take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fs::Piece, p2p::outbox, store::StoreInfo};

    fn setup(dir: &std::path::Path) -> (PieceSelector, Arc<PeerHandle>, Arc<PieceStore>) {
        let info = StoreInfo::new(25, 10);
        let store = Arc::new(PieceStore::open(dir.join("thefile"), info, false).unwrap());
        let (tx, _rx) = outbox(8);
        let handle = Arc::new(PeerHandle::new("127.0.0.1:6008".parse().unwrap(), 3, tx));
        let selector = PieceSelector::new(handle.clone(), store.clone(), 1000);
        (selector, handle, store)
    }

    #[test]
    fn test_candidates() {
        let own = Bitfield::from_bytes(&[0b1000_0000], 3);
        let neighbor = Bitfield::from_bytes(&[0b1110_0000], 3);
        assert_eq!(candidates(&own, &neighbor, 1000), vec![1, 2]);
        assert_eq!(candidates(&own, &neighbor, 1), vec![1]);
        assert!(candidates(&neighbor, &own, 1000).is_empty());
    }

    #[test]
    fn test_requests_when_unchoked() {
        let dir = tempfile::tempdir().unwrap();
        let (selector, handle, store) = setup(dir.path());

        handle.state().bitfield = Bitfield::full(3);
        // Choked: interest is not declared yet, nothing requested.
        assert!(selector.on_event(SelectorEvent::Bitfield, &store.bitfield()).is_empty());

        handle.state().peer_choking = false;
        let msgs = selector.on_event(SelectorEvent::Unchoked, &store.bitfield());
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0], Message::Interested);
        let requested = match msgs[1] {
            Message::Request { idx } => idx as usize,
            ref other => panic!("expected request, got {:?}", other),
        };
        assert_eq!(handle.state().requested, Some(requested));

        // One request at a time.
        assert!(selector.on_event(SelectorEvent::Have(1), &store.bitfield()).is_empty());
    }

    #[test]
    fn test_not_interested_once() {
        let dir = tempfile::tempdir().unwrap();
        let (selector, handle, store) = setup(dir.path());

        // Neighbor has nothing.
        assert_eq!(selector.on_event(SelectorEvent::Bitfield, &store.bitfield()), vec![Message::NotInterested]);
        assert!(selector.on_event(SelectorEvent::Bitfield, &store.bitfield()).is_empty());
        assert_eq!(handle.state().interested, Some(false));
    }

    #[test]
    fn test_piece_received_moves_on() {
        let dir = tempfile::tempdir().unwrap();
        let (selector, handle, store) = setup(dir.path());

        {
            let mut state = handle.state();
            state.bitfield = Bitfield::from_bytes(&[0b1100_0000], 3);
            state.peer_choking = false;
        }

        let first = match selector.on_event(SelectorEvent::Bitfield, &store.bitfield()).pop() {
            Some(Message::Request { idx }) => idx as usize,
            other => panic!("expected request, got {:?}", other),
        };
        store.write(&Piece::new(first, vec![0; 10])).unwrap();

        let second = match selector.on_event(SelectorEvent::PieceReceived(first), &store.bitfield()).pop() {
            Some(Message::Request { idx }) => idx as usize,
            other => panic!("expected request, got {:?}", other),
        };
        assert_ne!(first, second);
        store.write(&Piece::new(second, vec![0; 10])).unwrap();

        // Nothing left this neighbor can give.
        assert_eq!(
            selector.on_event(SelectorEvent::PieceReceived(second), &store.bitfield()),
            vec![Message::NotInterested]
        );
        assert_eq!(handle.state().requested, None);
    }

    #[test]
    fn test_never_requests_held_pieces() {
        let dir = tempfile::tempdir().unwrap();
        let (selector, handle, store) = setup(dir.path());
        store.write(&Piece::new(0, vec![0; 10])).unwrap();
        store.write(&Piece::new(2, vec![0; 5])).unwrap();
        {
            let mut state = handle.state();
            state.bitfield = Bitfield::full(3);
            state.peer_choking = false;
        }
        for _ in 0..10 {
            handle.state().requested = None;
            let msgs = selector.on_event(SelectorEvent::Bitfield, &store.bitfield());
            assert_eq!(msgs.last(), Some(&Message::Request { idx: 1 }));
        }
    }
}
