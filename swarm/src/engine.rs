use std::{
    collections::{BTreeSet, HashMap},
    net::{Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, RwLock},
    task::JoinHandle,
};
use crate::{
    choke::{ChokeScheduler, OptimisticUnchokeScheduler},
    config::{Config, ConfigError},
    fs::{DiskError, PieceStore},
    p2p::{message::Message, PeerCommand, PeerError, PeerHandle, PeerSession, PeerTx},
    peers::{PeerDescriptor, PeerTable},
    store::StoreInfo,
    PeerId,
};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {

    #[error("config error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("disk error: {0}")]
    DiskError(#[from] DiskError),

    #[error("failed to listen on port {port}: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },

    #[error("failed to connect to peer {id} at {address}: {source}")]
    Connect {
        id: PeerId,
        address: String,
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

}

pub enum EngineCommand {

    // Sent by a session once its connection is gone.
    SessionClosed { address: SocketAddr },

    // Sent by the optimistic scheduler once every peer has the file.
    Shutdown,

}

// Type aliases.
pub type Result<T> = std::result::Result<T, EngineError>;
pub type EngineTx = mpsc::UnboundedSender<EngineCommand>;
pub type EngineRx = mpsc::UnboundedReceiver<EngineCommand>;

/// State shared by the sessions and schedulers of one peer process.
#[derive(Debug)]
pub struct EngineContext {

    // Our own id.
    pub id: PeerId,

    pub config: Config,

    pub peers: PeerTable,

    pub info: StoreInfo,

    pub store: Arc<PieceStore>,

    // Commands to the engine.
    pub engine_tx: EngineTx,

    // Live sessions by remote address.
    sessions: RwLock<HashMap<SocketAddr, Arc<PeerHandle>>>,

    // Peers known to hold the complete file, ourselves included.
    completed: Mutex<BTreeSet<PeerId>>,

    // Neighbors left choked by the last preferred neighbor round.
    choked: Mutex<Vec<PeerId>>,

    // Every expected connection has been made.
    connections_done: AtomicBool,

}

impl EngineContext {

    pub fn new(
        id: PeerId,
        config: Config,
        peers: PeerTable,
        store: PieceStore,
        engine_tx: EngineTx,
    ) -> Self {
        Self {
            id,
            info: *store.info(),
            config,
            peers,
            store: Arc::new(store),
            engine_tx,
            sessions: RwLock::new(HashMap::new()),
            completed: Mutex::new(BTreeSet::new()),
            choked: Mutex::new(Vec::new()),
            connections_done: AtomicBool::new(false),
        }
    }

    pub async fn register(&self, handle: Arc<PeerHandle>) {
        self.sessions.write().await.insert(handle.address, handle);
    }

    pub async fn unregister(&self, address: SocketAddr) {
        self.sessions.write().await.remove(&address);
    }

    // Sessions past their handshake.
    pub async fn established(&self) -> Vec<Arc<PeerHandle>> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|handle| handle.is_established())
            .cloned()
            .collect()
    }

    pub async fn handle_for(&self, id: PeerId) -> Option<Arc<PeerHandle>> {
        self.established()
            .await
            .into_iter()
            .find(|handle| handle.peer_id() == Some(id))
    }

    pub async fn broadcast(&self, msg: Message) {
        for handle in self.established().await {
            if let Err(e) = handle.send(msg.clone()).await {
                tracing::debug!("broadcast to {} failed: {}", handle.address, e);
            }
        }
    }

    // Announces a new piece to every neighbor except the one it came from.
    pub async fn broadcast_have(&self, idx: usize, except: SocketAddr) {
        for handle in self.established().await {
            if handle.address == except {
                continue;
            }
            if let Err(e) = handle.send(Message::Have { idx: idx as u32 }).await {
                tracing::debug!("have to {} failed: {}", handle.address, e);
            }
        }
    }

    /// Records that a peer holds the complete file. Returns false if it was
    /// already known or the peer is not in the peer list.
    pub fn mark_complete(&self, id: PeerId) -> bool {
        if !self.peers.contains(id) {
            tracing::warn!("completion from unknown peer {}", id);
            return false;
        }
        lock(&self.completed).insert(id)
    }

    pub fn has_completed(&self, id: PeerId) -> bool {
        lock(&self.completed).contains(&id)
    }

    pub fn all_complete(&self) -> bool {
        lock(&self.completed).len() == self.peers.len()
    }

    pub fn set_choked(&self, choked: Vec<PeerId>) {
        *lock(&self.choked) = choked;
    }

    pub fn choked(&self) -> Vec<PeerId> {
        lock(&self.choked).clone()
    }

    pub fn set_connections_done(&self) {
        self.connections_done.store(true, Ordering::Release);
    }

    /// Every expected connection is made and past its handshake. Completion
    /// is only judged from here on.
    pub async fn swarm_ready(&self) -> bool {
        if !self.connections_done.load(Ordering::Acquire) {
            return false;
        }
        self.sessions
            .read()
            .await
            .values()
            .all(|handle| handle.is_established())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct SessionEntry {

    // Commands to the session.
    peer_tx: PeerTx,

    task: JoinHandle<std::result::Result<(), PeerError>>,

}

/// One peer process: connects to the peers before it in the peer list,
/// accepts the peers after it, and runs the choking schedulers until
/// every peer has the file.
#[derive(Debug)]
pub struct PeerEngine {

    ctx: Arc<EngineContext>,

    listener: Option<TcpListener>,

    // Sessions we have started.
    sessions: HashMap<SocketAddr, SessionEntry>,

    engine_rx: EngineRx,

    // Inbound connections still expected.
    pending_inbound: usize,

}

impl PeerEngine {

    /// Opens the local store and binds the listening port.
    pub async fn bind(id: PeerId, config: Config, peers: PeerTable) -> Result<Self> {

        let local = peers.get(id).ok_or(ConfigError::UnknownPeer(id))?.clone();
        let info = config.store_info();
        let store = PieceStore::open(config.file_path(id), info, local.has_file)?;
        tracing::info!("peer {} starts with {}/{} pieces", id, store.count(), info.num_pieces);

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, local.port))
            .await
            .map_err(|source| EngineError::Bind { port: local.port, source })?;
        tracing::info!("listening on {}", listener.local_addr()?);

        let pending_inbound = peers.higher_count(id);
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();

        Ok(Self {
            ctx: Arc::new(EngineContext::new(id, config, peers, store, engine_tx)),
            listener: Some(listener),
            sessions: HashMap::new(),
            engine_rx,
            pending_inbound,
        })
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    #[tracing::instrument(skip_all, name = "engine", fields(id = self.ctx.id))]
    pub async fn run(mut self) -> Result<()> {

        self.connect_to_peers().await?;

        let mut listener = self.listener.take();
        if self.pending_inbound == 0 {
            listener = None;
        }
        self.check_connected();

        let schedulers = [
            ChokeScheduler::spawn(self.ctx.clone()),
            OptimisticUnchokeScheduler::spawn(self.ctx.clone()),
        ];

        // Top level engine loop.
        loop { tokio::select! {

            new_peer_conn = accept(listener.as_ref()) => {
                let (stream, address) = match new_peer_conn {
                    Ok((stream, address)) => (stream, address),
                    Err(e) => {
                        tracing::warn!("inbound peer connection error: {}", e);
                        continue;
                    },
                };
                self.start_session(stream, address, None).await;
                self.pending_inbound = self.pending_inbound.saturating_sub(1);
                if self.pending_inbound == 0 {
                    tracing::info!("all expected peers connected, closing listener");
                    listener = None;
                }
                self.check_connected();
            }

            Some(cmd) = self.engine_rx.recv() => {
                match cmd {

                    EngineCommand::SessionClosed { address } => {
                        self.sessions.remove(&address);
                        self.ctx.unregister(address).await;
                    },

                    EngineCommand::Shutdown => break,

                }
            }

        }}

        for scheduler in schedulers {
            scheduler.abort();
        }
        self.shutdown().await
    }

    // Dials every peer listed before us, in order. Any failure is fatal.
    async fn connect_to_peers(&mut self) -> Result<()> {

        let targets: Vec<PeerDescriptor> = self.ctx.peers.lower_than(self.ctx.id).cloned().collect();
        for peer in targets {
            let stream = TcpStream::connect((peer.host.as_str(), peer.port))
                .await
                .map_err(|source| EngineError::Connect {
                    id: peer.id,
                    address: peer.to_string(),
                    source,
                })?;
            let address = stream.peer_addr()?;
            tracing::info!("Peer [{}] makes a connection to Peer [{}]", self.ctx.id, peer.id);
            self.start_session(stream, address, Some(peer.id)).await;
        }

        Ok(())
    }

    async fn start_session(&mut self, stream: TcpStream, address: SocketAddr, dialed: Option<PeerId>) {
        let (session, handle, peer_tx) = PeerSession::new(address, self.ctx.clone(), dialed);
        self.ctx.register(handle).await;
        let task = tokio::spawn(session.start_session(stream));
        self.sessions.insert(address, SessionEntry { peer_tx, task });
    }

    fn check_connected(&self) {
        if self.pending_inbound == 0 {
            self.ctx.set_connections_done();
        }
    }

    async fn shutdown(&mut self) -> Result<()> {

        tracing::info!("disconnecting from {} peers", self.sessions.len());
        self.ctx.broadcast(Message::Shutdown).await;
        for entry in self.sessions.values() {
            entry.peer_tx.send(PeerCommand::Shutdown).ok();
        }

        for (address, entry) in self.sessions.drain() {
            match entry.task.await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => tracing::debug!("session {} ended: {}", address, e),
                Err(e) => tracing::warn!("session task {} failed: {}", address, e),
            }
        }

        self.ctx.store.close()?;
        tracing::info!("peer {} finished", self.ctx.id);
        Ok(())
    }
}

async fn accept(listener: Option<&TcpListener>) -> std::io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}
