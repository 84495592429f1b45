//! Periodic stats snapshots pushed to subscribers.
//!
//! Each subscriber gets a bounded queue. A subscriber that stops reading
//! loses its oldest snapshots; the sampler never waits on anyone.

use chrono::Utc;
use recollect_config::StatsConfig;
use recollect_core::{BlockStore, SessionRegistry, StoreError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::aggregator::StatsAggregator;
use crate::model::StatsSnapshot;

/// A live stats feed. Dropping it releases the connection slot.
pub struct StatsSubscription {
    receiver: broadcast::Receiver<Arc<StatsSnapshot>>,
    connections: Arc<AtomicUsize>,
    missed: u64,
}

impl StatsSubscription {
    /// The next snapshot, skipping any this subscriber fell behind on.
    /// `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<Arc<StatsSnapshot>> {
        loop {
            match self.receiver.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "Slow stats subscriber, oldest snapshots dropped");
                    self.missed += missed;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Snapshots dropped because this subscriber read too slowly.
    pub fn missed(&self) -> u64 {
        self.missed
    }
}

impl Drop for StatsSubscription {
    fn drop(&mut self) {
        self.connections.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Samples stats on a fixed cadence and fans snapshots out.
pub struct StatsBroadcaster {
    aggregator: Arc<StatsAggregator>,
    store: Arc<dyn BlockStore>,
    sessions: Arc<SessionRegistry>,
    config: StatsConfig,
    sender: broadcast::Sender<Arc<StatsSnapshot>>,
    latest: RwLock<Option<Arc<StatsSnapshot>>>,
    connections: Arc<AtomicUsize>,
    stop: watch::Sender<bool>,
}

impl StatsBroadcaster {
    pub fn new(
        aggregator: Arc<StatsAggregator>,
        store: Arc<dyn BlockStore>,
        sessions: Arc<SessionRegistry>,
        config: StatsConfig,
    ) -> Self {
        let (sender, _) = broadcast::channel(config.subscriber_queue.max(1));
        let (stop, _) = watch::channel(false);
        Self {
            aggregator,
            store,
            sessions,
            config,
            sender,
            latest: RwLock::new(None),
            connections: Arc::new(AtomicUsize::new(0)),
            stop,
        }
    }

    pub fn aggregator(&self) -> &Arc<StatsAggregator> {
        &self.aggregator
    }

    pub fn subscribe(&self) -> StatsSubscription {
        self.connections.fetch_add(1, Ordering::Relaxed);
        StatsSubscription {
            receiver: self.sender.subscribe(),
            connections: self.connections.clone(),
            missed: 0,
        }
    }

    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// The most recently published snapshot.
    pub async fn latest(&self) -> Option<Arc<StatsSnapshot>> {
        self.latest.read().await.clone()
    }

    /// Compute a snapshot now and publish it to every subscriber.
    pub async fn sample(&self) -> Result<Arc<StatsSnapshot>, StoreError> {
        let snapshot = Arc::new(
            self.aggregator
                .snapshot(
                    self.store.as_ref(),
                    &self.sessions,
                    self.config.active_session_window(),
                    self.active_connections(),
                    Utc::now(),
                )
                .await?,
        );
        *self.latest.write().await = Some(snapshot.clone());
        // No subscribers is fine
        let _ = self.sender.send(snapshot.clone());
        Ok(snapshot)
    }

    /// Spawn the sampler. It runs on its own cadence, independent of the
    /// correction loop.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.config.interval();
        let mut stop = self.stop.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = period.as_secs(), "Stats broadcaster started");

            loop {
                tokio::select! {
                    changed = stop.changed() => {
                        let stopping = changed.is_err() || *stop.borrow();
                        if stopping {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sample().await {
                            warn!(error = %e, "Stats sample failed");
                        }
                    }
                }
            }

            info!("Stats broadcaster stopped");
        })
    }

    pub fn stop(&self) {
        self.stop.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recollect_core::{EventBus, NewBlock, SessionId, Source};
    use recollect_memory::InMemoryBlockStore;
    use std::time::Duration;

    fn broadcaster(queue: usize) -> (Arc<StatsBroadcaster>, Arc<InMemoryBlockStore>) {
        let store = Arc::new(InMemoryBlockStore::new(EventBus::default()));
        let config = StatsConfig {
            interval_secs: 5,
            subscriber_queue: queue,
            ..StatsConfig::default()
        };
        let broadcaster = StatsBroadcaster::new(
            Arc::new(StatsAggregator::new()),
            store.clone(),
            Arc::new(SessionRegistry::new()),
            config,
        );
        (Arc::new(broadcaster), store)
    }

    #[tokio::test]
    async fn connections_are_counted() {
        let (broadcaster, _) = broadcaster(4);
        let first = broadcaster.subscribe();
        let second = broadcaster.subscribe();
        assert_eq!(broadcaster.active_connections(), 2);
        drop(first);
        assert_eq!(broadcaster.active_connections(), 1);
        drop(second);

        let snapshot = broadcaster.sample().await.unwrap();
        assert_eq!(snapshot.active_connections, 0);
    }

    #[tokio::test]
    async fn slow_subscriber_drops_oldest() {
        let (broadcaster, store) = broadcaster(2);
        let mut subscription = broadcaster.subscribe();

        for i in 0..5 {
            store
                .create(NewBlock::new(SessionId::from("s1"), format!("turn {i}"), Source::User))
                .await
                .unwrap();
            broadcaster.sample().await.unwrap();
        }

        let next = subscription.recv().await.unwrap();
        assert_eq!(next.memory.total_blocks, 4);
        assert_eq!(subscription.missed(), 3);
        let last = subscription.recv().await.unwrap();
        assert_eq!(last.memory.total_blocks, 5);
        assert_eq!(broadcaster.latest().await.unwrap().memory.total_blocks, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn sampler_runs_on_its_own_cadence() {
        let (broadcaster, _) = broadcaster(8);
        let mut subscription = broadcaster.subscribe();
        let handle = broadcaster.clone().start();

        // first tick fires immediately, the second after one interval
        assert!(subscription.recv().await.is_some());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(subscription.recv().await.is_some());

        broadcaster.stop();
        handle.await.unwrap();
    }
}
