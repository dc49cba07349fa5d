use std::sync::Arc;
use rand::seq::SliceRandom;
use tokio::{task::JoinHandle, time};
use crate::{
    engine::{EngineCommand, EngineContext},
    p2p::{message::Message, PeerHandle},
    PeerId,
};

/// Every optimistic interval, unchokes one random neighbor the preferred
/// round left choked, then checks whether the swarm is done.
#[derive(Debug)]
pub struct OptimisticUnchokeScheduler {
    ctx: Arc<EngineContext>,
}

impl OptimisticUnchokeScheduler {

    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub fn spawn(ctx: Arc<EngineContext>) -> JoinHandle<()> {
        let period = ctx.config.optimistic_unchoking_interval;
        let scheduler = Self::new(ctx);
        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if scheduler.tick().await {
                    break;
                }
            }
        })
    }

    // One round, returns true once every peer has the file.
    pub async fn tick(&self) -> bool {
        if let Some((id, handle)) = self.pick().await {
            self.unchoke(id, &handle).await;
        }
        self.check_completion().await
    }

    // A neighbor the preferred round left choked, still connected and not
    // already unchoked by an earlier optimistic round.
    async fn pick(&self) -> Option<(PeerId, Arc<PeerHandle>)> {
        let mut candidates = Vec::new();
        for id in self.ctx.choked() {
            if let Some(handle) = self.ctx.handle_for(id).await {
                if handle.state().choked {
                    candidates.push((id, handle));
                }
            }
        }
        candidates.choose(&mut rand::thread_rng()).cloned()
    }

    async fn unchoke(&self, id: PeerId, handle: &PeerHandle) {
        match handle.unchoke().await {
            Ok(true) => tracing::info!("Peer [{}] has the optimistically unchoked neighbor [{}]", self.ctx.id, id),
            Ok(false) => {},
            Err(e) => tracing::debug!("optimistic unchoke of {} failed: {}", id, e),
        }
    }

    async fn check_completion(&self) -> bool {
        if !self.ctx.swarm_ready().await {
            return false;
        }

        if self.ctx.all_complete() {
            tracing::info!("all peers have the complete file");
            self.ctx.engine_tx.send(EngineCommand::Shutdown).ok();
            return true;
        }

        if self.ctx.store.is_complete() && self.ctx.mark_complete(self.ctx.id) {
            tracing::info!("Peer [{}] has downloaded the complete file", self.ctx.id);
            self.ctx.broadcast(Message::Shutdown).await;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{engine::tests::{add_neighbor, test_context}, p2p::state::ConnState};

    #[tokio::test]
    async fn test_unchokes_a_choked_neighbor() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx) = test_context(dir.path(), 3, true);
        let (_a, mut a_rx) = add_neighbor(&ctx, 2).await;
        let (b, mut b_rx) = add_neighbor(&ctx, 3).await;
        ctx.set_choked(vec![3]);

        let scheduler = OptimisticUnchokeScheduler::new(ctx.clone());
        assert!(!scheduler.tick().await);
        assert_eq!(b_rx.try_recv().unwrap(), Message::Unchoke);
        assert!(!b.state().choked);
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_skips_unchoked_and_closed_neighbors() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx) = test_context(dir.path(), 4, true);
        let (a, mut a_rx) = add_neighbor(&ctx, 2).await;
        let (_b, mut b_rx) = add_neighbor(&ctx, 3).await;
        let (c, mut c_rx) = add_neighbor(&ctx, 4).await;
        ctx.set_choked(vec![2, 3, 4]);

        // 2 is already unchoked, 4 has gone away.
        a.state().choked = false;
        c.state().conn_state = ConnState::Closed;

        let scheduler = OptimisticUnchokeScheduler::new(ctx.clone());
        assert!(!scheduler.tick().await);
        assert_eq!(b_rx.try_recv().unwrap(), Message::Unchoke);
        assert!(a_rx.try_recv().is_err());
        assert!(c_rx.try_recv().is_err());

        // Nobody left to pick.
        assert!(!scheduler.tick().await);
        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_err());
        assert!(c_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_completion_waits_for_connections() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, mut engine_rx) = test_context(dir.path(), 2, true);
        let (_neighbor, mut neighbor_rx) = add_neighbor(&ctx, 2).await;
        let scheduler = OptimisticUnchokeScheduler::new(ctx.clone());

        // Complete locally, but not every connection is made yet.
        assert!(!scheduler.tick().await);
        assert!(neighbor_rx.try_recv().is_err());

        ctx.set_connections_done();
        assert!(!scheduler.tick().await);
        assert_eq!(neighbor_rx.try_recv().unwrap(), Message::Shutdown);

        // Announced once.
        assert!(!scheduler.tick().await);
        assert!(neighbor_rx.try_recv().is_err());

        ctx.mark_complete(2);
        assert!(scheduler.tick().await);
        assert!(matches!(engine_rx.try_recv(), Ok(EngineCommand::Shutdown)));
    }

    #[tokio::test]
    async fn test_lone_seed_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, mut engine_rx) = test_context(dir.path(), 1, true);
        ctx.set_connections_done();
        let scheduler = OptimisticUnchokeScheduler::new(ctx.clone());
        assert!(!scheduler.tick().await);
        assert!(scheduler.tick().await);
        assert!(matches!(engine_rx.try_recv(), Ok(EngineCommand::Shutdown)));
    }
}
