use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::{tcp::{OwnedReadHalf, OwnedWriteHalf}, TcpStream},
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time,
};
use tokio_util::codec::{FramedRead, FramedWrite};
use futures::{SinkExt, StreamExt};
use crate::{
    bitfield::Bitfield,
    engine::{EngineCommand, EngineContext},
    fs::{DiskError, Piece},
    PeerId,
};
use super::{
    *,
    handshake::Handshake,
    message::{Message, MessageCodec},
    selector::{PieceSelector, SelectorEvent, SelectorTx},
    sender,
    state::ConnState,
};

type MessageStream = FramedRead<OwnedReadHalf, MessageCodec>;
type MessageSink = FramedWrite<OwnedWriteHalf, MessageCodec>;

// Upper bound on flushing the send queue when closing.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct PeerSession {

    // The peer's IP address.
    address: SocketAddr,

    // Context is a read only state accessible by all peers.
    ctx: Arc<EngineContext>,

    // State and send queue shared with the schedulers.
    handle: Arc<PeerHandle>,

    // The peer we dialed, None for inbound connections.
    dialed: Option<PeerId>,

    // Commands to the peer.
    peer_rx: PeerRx,

    outbox_rx: Option<OutboxRx>,

    selector_tx: Option<SelectorTx>,

    selector: Option<JoinHandle<()>>,

}

impl PeerSession {

    pub fn new(
        address: SocketAddr,
        ctx: Arc<EngineContext>,
        dialed: Option<PeerId>,
    ) -> (PeerSession, Arc<PeerHandle>, PeerTx) {

        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (outbox_tx, outbox_rx) = outbox(ctx.config.send_queue_len);
        let handle = Arc::new(PeerHandle::new(address, ctx.info.num_pieces as usize, outbox_tx));

        (
            PeerSession {
                address,
                ctx,
                handle: handle.clone(),
                dialed,
                peer_rx,
                outbox_rx: Some(outbox_rx),
                selector_tx: None,
                selector: None,
            },
            handle,
            peer_tx,
        )
    }

    #[tracing::instrument(name = "peer", skip(self, stream), fields(address = %self.address))]
    pub async fn start_session(mut self, stream: TcpStream) -> Result<()> {

        let res = self.run(stream).await;

        self.handle.state().update(|state| state.conn_state = ConnState::Closed);
        if let Some(selector) = self.selector.take() {
            selector.abort();
        }
        match &res {
            Ok(()) => tracing::info!("session closed"),
            Err(e) => tracing::error!("session closed: {}", e),
        }
        self.ctx.engine_tx.send(EngineCommand::SessionClosed { address: self.address }).ok();
        res
    }

    async fn run(&mut self, stream: TcpStream) -> Result<()> {

        let max_frame_len = self.ctx.info.max_frame_len();
        let (read, write) = stream.into_split();
        let mut stream = FramedRead::new(read, MessageCodec::new(max_frame_len));
        let mut sink = FramedWrite::new(write, MessageCodec::new(max_frame_len));

        self.exchange_handshake(&mut stream, &mut sink).await?;

        // From here on the sender task is the only writer.
        let outbox_rx = self.outbox_rx.take().ok_or(PeerError::Channel("send queue already taken".into()))?;
        let (drain_tx, drain_rx) = oneshot::channel();
        let mut sender = tokio::spawn(sender::run(sink, outbox_rx, drain_rx));

        let mut sender_done = false;
        let res = match self.introduce().await {
            Err(e) => Err(e),
            Ok(()) => loop { tokio::select! {

                // Message from peer.
                msg = stream.next() => match msg {
                    Some(Ok(msg)) => if let Err(e) = self.handle_msg(msg).await {
                        break Err(e);
                    },
                    Some(Err(e)) => break Err(e),
                    None => {
                        tracing::info!("connection closed by peer");
                        break Ok(());
                    },
                },

                // Command from elsewhere in application.
                Some(cmd) = self.peer_rx.recv() => match cmd {
                    PeerCommand::Shutdown => {
                        tracing::info!("session shutdown");
                        break Ok(());
                    },
                },

                // Writer stopped on its own, the socket is gone.
                res = &mut sender => {
                    sender_done = true;
                    break match res {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(e),
                        Err(e) => Err(PeerError::Channel(e.to_string())),
                    };
                },

            }},
        };

        if !sender_done {
            if res.is_ok() {
                drain_tx.send(()).ok();
                match time::timeout(DRAIN_TIMEOUT, &mut sender).await {
                    Ok(Ok(Err(e))) => tracing::debug!("send queue not flushed: {}", e),
                    Err(_) => {
                        tracing::warn!("timed out flushing send queue");
                        sender.abort();
                    },
                    _ => {},
                }
            } else {
                sender.abort();
            }
        }

        res
    }

    async fn exchange_handshake(&mut self, stream: &mut MessageStream, sink: &mut MessageSink) -> Result<()> {

        let handshake = Handshake::new(self.ctx.id);

        // The dialing side speaks first.
        if self.dialed.is_some() {
            tracing::trace!("send handshake");
            sink.send(Message::Handshake(handshake.clone())).await?;
            self.handle.state().update(|state| state.handshake_sent = true);
        }
        self.handle.state().update(|state| state.conn_state = ConnState::AwaitingHandshake);

        tracing::trace!("waiting for handshake");
        let theirs = match stream.next().await {
            Some(Ok(Message::Handshake(handshake))) => handshake,
            Some(Ok(msg)) => {
                tracing::error!("expected handshake, got {}", msg);
                return Err(PeerError::NoHandshake);
            },
            Some(Err(e)) => return Err(e),
            None => return Err(PeerError::NoHandshake),
        };

        if !theirs.is_valid() {
            tracing::error!(
                "Handshake failed with Peer [{}] due to incorrect header [{}]",
                theirs.peer_id,
                theirs.header_lossy(),
            );
            return Err(PeerError::IncorrectHeader(theirs.header_lossy()));
        }
        if let Some(dialed) = self.dialed.filter(|&id| id != theirs.peer_id) {
            tracing::warn!("dialed peer {} but handshake came from {}", dialed, theirs.peer_id);
        }
        if !self.ctx.peers.contains(theirs.peer_id) {
            tracing::warn!("peer {} is not in the peer list", theirs.peer_id);
        }

        self.handle.state().update(|state| {
            state.peer_id = Some(theirs.peer_id);
            state.handshake_received = true;
        });

        // Respond with handshake if connection is inbound.
        if self.dialed.is_none() {
            tracing::trace!("send handshake");
            sink.send(Message::Handshake(handshake)).await?;
            self.handle.state().update(|state| state.handshake_sent = true);
            tracing::info!("Peer [{}] is connected from Peer [{}]", self.ctx.id, theirs.peer_id);
        }

        Ok(())
    }

    // Announces our pieces and starts selection.
    async fn introduce(&mut self) -> Result<()> {

        self.handle.state().update(|state| state.conn_state = ConnState::Handshaked);

        // Taken after the session became visible to broadcasts, so every
        // piece written since is either in it or announced with a have.
        let bitfield = self.ctx.store.snapshot().await?;
        self.handle.send(Message::Bitfield(bitfield.to_bytes().into())).await?;

        self.start_selection();
        Ok(())
    }

    fn start_selection(&mut self) {
        {
            let mut state = self.handle.state();
            if !state.ready_to_select() {
                return;
            }
            state.selecting = true;
            state.conn_state = ConnState::Active;
            state.download.reset();
        }

        let (selector_tx, selector_rx) = mpsc::unbounded_channel();
        let selector = PieceSelector::new(
            self.handle.clone(),
            self.ctx.store.clone(),
            self.ctx.config.max_candidates,
        );
        self.selector = Some(tokio::spawn(selector.run(selector_rx)));
        self.selector_tx = Some(selector_tx);
    }

    fn select(&self, event: SelectorEvent) {
        if let Some(selector_tx) = &self.selector_tx {
            selector_tx.send(event).ok();
        }
    }

    // Remote id for log lines, only read once the handshake is in.
    fn remote(&self) -> PeerId {
        self.handle.peer_id().unwrap_or_default()
    }

    async fn handle_msg(&mut self, msg: Message) -> Result<()> {
        tracing::trace!("read: {}", msg);
        let id = self.ctx.id;

        match msg {

            Message::Handshake(handshake) => {
                tracing::warn!("ignoring repeated handshake from {}", handshake.peer_id);
            },

            Message::Choke => {
                self.handle.state().update(|state| state.peer_choking = true);
                tracing::info!("Peer [{}] is choked by [{}]", id, self.remote());
            },

            Message::Unchoke => {
                self.handle.state().update(|state| state.peer_choking = false);
                tracing::info!("Peer [{}] is unchoked by [{}]", id, self.remote());
                self.select(SelectorEvent::Unchoked);
            },

            Message::Interested => {
                tracing::info!("Peer [{}] received the 'interested' message from [{}]", id, self.remote());
            },

            Message::NotInterested => {
                tracing::info!("Peer [{}] received the 'not interested' message from [{}]", id, self.remote());
            },

            Message::Have { idx } => self.handle_have(idx as usize),

            Message::Bitfield(bits) => self.handle_bitfield(&bits),

            Message::Request { idx } => self.handle_request(idx as usize).await?,

            Message::Piece(piece) => self.handle_piece(piece).await,

            Message::Shutdown => {
                let remote = self.remote();
                self.handle.state().update(|state| state.peer_complete = true);
                self.ctx.mark_complete(remote);
                tracing::info!("Peer [{}] received the 'shutdown' message from [{}]", id, remote);
            },
        }

        Ok(())
    }

    fn handle_have(&mut self, idx: usize) {
        if !self.ctx.info.contains(idx) {
            tracing::warn!("have msg with invalid idx: {}", idx);
            return;
        }
        self.handle.state().update(|state| {
            state.bitfield.set(idx);
        });
        tracing::info!(
            "Peer [{}] received the 'have' message from [{}] for the piece [{}]",
            self.ctx.id,
            self.remote(),
            idx,
        );
        self.select(SelectorEvent::Have(idx));
    }

    fn handle_bitfield(&mut self, bits: &[u8]) {
        let bitfield = Bitfield::from_bytes(bits, self.ctx.info.num_pieces as usize);
        tracing::debug!(
            "Peer [{}] has received from Peer [{}] the bitfield [{}]",
            self.ctx.id,
            self.remote(),
            bitfield,
        );
        self.handle.state().update(|state| state.bitfield = bitfield);
        self.select(SelectorEvent::Bitfield);
    }

    async fn handle_request(&mut self, idx: usize) -> Result<()> {

        // Requests from choked peers are dropped.
        if self.handle.state().choked {
            tracing::trace!("request for piece {} whilst choked", idx);
            return Ok(());
        }
        if !self.ctx.info.contains(idx) {
            tracing::warn!("invalid request for piece {}", idx);
            return Ok(());
        }

        let piece = match self.ctx.store.read_piece(idx).await {
            Ok(Some(piece)) => piece,
            Ok(None) => {
                tracing::debug!("requested piece {} not held", idx);
                return Ok(());
            },
            Err(e) => {
                tracing::error!("failed to read piece {}: {}", idx, e);
                return Ok(());
            },
        };

        if !self.ctx.config.request_delay.is_zero() {
            time::sleep(self.ctx.config.request_delay).await;
        }
        self.handle.send(Message::Piece(piece)).await
    }

    async fn handle_piece(&mut self, piece: Piece) {

        let idx = piece.idx();
        self.handle.state().update(|state| state.download.add(piece.len() as u64));

        match self.ctx.store.write_piece(piece).await {
            Ok(true) => {
                tracing::info!(
                    "Peer [{}] has downloaded the piece [{}] from [{}]. Now the number of pieces it has is [{}]",
                    self.ctx.id,
                    idx,
                    self.remote(),
                    self.ctx.store.count(),
                );
                self.ctx.broadcast_have(idx, self.address).await;
            },
            Ok(false) => tracing::debug!("duplicate piece {}", idx),
            Err(e @ (DiskError::PieceOutOfRange(_) | DiskError::PieceLength { .. })) => {
                tracing::warn!("dropping piece from {}: {}", self.remote(), e);
            },
            Err(e) => tracing::error!("failed to write piece {}: {}", idx, e),
        }

        self.select(SelectorEvent::PieceReceived(idx));
    }
}
