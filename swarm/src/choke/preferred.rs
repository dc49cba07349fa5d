use std::{sync::Arc, time::Instant};
use tokio::{task::JoinHandle, time};
use crate::{engine::EngineContext, p2p::PeerHandle, PeerId};
use super::{format_ids, rank};

/// Every unchoking interval, unchokes the neighbors we download from
/// fastest and chokes everyone else.
#[derive(Debug)]
pub struct ChokeScheduler {
    ctx: Arc<EngineContext>,
}

impl ChokeScheduler {

    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub fn spawn(ctx: Arc<EngineContext>) -> JoinHandle<()> {
        let period = ctx.config.unchoking_interval;
        let scheduler = Self::new(ctx);
        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                scheduler.tick().await;
            }
        })
    }

    // One round, returns the preferred neighbors.
    pub async fn tick(&self) -> Vec<PeerId> {

        let now = Instant::now();
        let neighbors: Vec<(PeerId, f64, Arc<PeerHandle>)> = self.ctx
            .established()
            .await
            .into_iter()
            .filter_map(|handle| {
                let (id, rate) = {
                    let state = handle.state();
                    (state.peer_id?, state.download.rate_at(now))
                };
                Some((id, rate, handle))
            })
            .collect();

        let k = self.ctx.config.preferred_neighbors;
        let (preferred, choked) = rank(neighbors.iter().map(|(id, rate, _)| (*id, *rate)).collect(), k);
        tracing::info!("Peer [{}] has the preferred neighbors [{}]", self.ctx.id, format_ids(&preferred));
        self.ctx.set_choked(choked);

        for (id, _, handle) in neighbors.iter() {
            let res = if preferred.contains(id) {
                handle.unchoke().await
            } else {
                handle.choke().await
            };
            if let Err(e) = res {
                tracing::debug!("choke update for {} failed: {}", id, e);
            }
        }

        preferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{engine::tests::{add_neighbor, test_context}, Message};

    #[tokio::test]
    async fn test_unchokes_fastest() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx) = test_context(dir.path(), 4, true);
        let (fast, mut fast_rx) = add_neighbor(&ctx, 2).await;
        let (mid, mut mid_rx) = add_neighbor(&ctx, 3).await;
        let (slow, mut slow_rx) = add_neighbor(&ctx, 4).await;

        let start = Instant::now();
        for (handle, bytes) in [(&fast, 5000), (&mid, 3000), (&slow, 1000)] {
            handle.state().update(|state| {
                state.download.reset_at(start);
                state.download.add(bytes);
            });
        }

        let scheduler = ChokeScheduler::new(ctx.clone());
        assert_eq!(scheduler.tick().await, vec![2]);
        assert_eq!(fast_rx.try_recv().unwrap(), Message::Unchoke);
        // Already choked, nothing sent.
        assert!(mid_rx.try_recv().is_err());
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(ctx.choked(), vec![3, 4]);

        // Unchoking restarted the fast neighbor's window, the others now lead.
        assert!(!fast.state().choked);
        assert_eq!(fast.state().download.round(), 0);
        assert_eq!(scheduler.tick().await, vec![3]);
        assert_eq!(mid_rx.try_recv().unwrap(), Message::Unchoke);
        assert_eq!(fast_rx.try_recv().unwrap(), Message::Choke);
        assert!(slow_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_redundant_messages() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx) = test_context(dir.path(), 2, true);
        let (_only, mut only_rx) = add_neighbor(&ctx, 2).await;

        let scheduler = ChokeScheduler::new(ctx.clone());
        assert_eq!(scheduler.tick().await, vec![2]);
        assert_eq!(only_rx.try_recv().unwrap(), Message::Unchoke);
        assert_eq!(scheduler.tick().await, vec![2]);
        assert!(only_rx.try_recv().is_err());
        assert!(ctx.choked().is_empty());
    }
}
