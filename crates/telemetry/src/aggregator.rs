//! Rolling counters derived from memory events.

use chrono::{DateTime, Duration, Utc};
use recollect_core::{BlockFilter, BlockStore, MemoryEvent, SessionRegistry, StoreError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::model::{MemoryStats, StatsSnapshot};

/// Counters accumulated from the event stream.
#[derive(Debug, Default)]
struct RunningTotals {
    total_messages: u64,
    total_corrections: u64,
    total_removed: u64,
    degraded_evaluations: u64,
    /// Ingestion times inside the rate window.
    recent_ingests: VecDeque<DateTime<Utc>>,
    /// Events dropped because the listener fell behind.
    lagged: u64,
}

impl RunningTotals {
    fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        while let Some(front) = self.recent_ingests.front() {
            if now - *front > window {
                self.recent_ingests.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Derives rolling metrics from store and loop events.
///
/// The store never calls into this type; it only publishes events, which
/// [`StatsAggregator::listen`] folds into the running totals.
pub struct StatsAggregator {
    totals: Mutex<RunningTotals>,
    rate_window: Duration,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            totals: Mutex::new(RunningTotals::default()),
            rate_window: Duration::minutes(1),
        }
    }

    fn totals(&self) -> MutexGuard<'_, RunningTotals> {
        self.totals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold one event into the totals.
    pub fn apply(&self, event: &MemoryEvent) {
        let mut totals = self.totals();
        match event {
            MemoryEvent::BlockCreated { timestamp, .. } => {
                totals.total_messages += 1;
                totals.recent_ingests.push_back(*timestamp);
                totals.prune(*timestamp, self.rate_window);
            }
            MemoryEvent::BlockEvaluated { degraded: true, .. } => {
                totals.degraded_evaluations += 1;
            }
            MemoryEvent::BlockRemoved { .. } => totals.total_removed += 1,
            MemoryEvent::CorrectionRunCompleted { corrections, .. } => {
                totals.total_corrections += *corrections as u64;
            }
            _ => {}
        }
    }

    /// Ingestions per minute over the last minute.
    pub fn messages_per_minute(&self, now: DateTime<Utc>) -> f32 {
        let mut totals = self.totals();
        totals.prune(now, self.rate_window);
        let minutes = self.rate_window.num_seconds() as f32 / 60.0;
        totals.recent_ingests.len() as f32 / minutes
    }

    pub fn total_messages(&self) -> u64 {
        self.totals().total_messages
    }

    pub fn total_corrections(&self) -> u64 {
        self.totals().total_corrections
    }

    pub fn lagged(&self) -> u64 {
        self.totals().lagged
    }

    /// Consume events until `stop` is signalled or the bus closes.
    pub fn listen(
        self: Arc<Self>,
        mut events: broadcast::Receiver<Arc<MemoryEvent>>,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = stop.changed() => {
                        let stopping = changed.is_err() || *stop.borrow();
                        if stopping {
                            break;
                        }
                    }
                    received = events.recv() => match received {
                        Ok(event) => self.apply(&event),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "Stats aggregator fell behind the event bus");
                            self.totals().lagged += missed;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!("Stats aggregator stopped");
        })
    }

    /// Build a snapshot from the running totals and the store's current
    /// contents.
    pub async fn snapshot(
        &self,
        store: &dyn BlockStore,
        sessions: &SessionRegistry,
        session_window: Duration,
        active_connections: usize,
        now: DateTime<Utc>,
    ) -> Result<StatsSnapshot, StoreError> {
        let blocks = store.list(&BlockFilter::default()).await?;
        let memory = MemoryStats::from_blocks(&blocks);
        let active_sessions = sessions.active_sessions(now, session_window).await.len();
        let messages_per_minute = self.messages_per_minute(now);

        let totals = self.totals();
        Ok(StatsSnapshot {
            active_sessions,
            total_messages: totals.total_messages,
            total_corrections: totals.total_corrections,
            total_removed: totals.total_removed,
            degraded_evaluations: totals.degraded_evaluations,
            avg_relevance_score: memory.avg_relevance_score,
            messages_per_minute,
            memory_usage_bytes: memory.total_size_bytes,
            memory_usage_mb: StatsSnapshot::bytes_to_mb(memory.total_size_bytes),
            active_connections,
            memory,
            timestamp: now,
        })
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recollect_core::{BlockId, EventBus, NewBlock, SessionId, Source};
    use recollect_memory::InMemoryBlockStore;

    fn created(at: DateTime<Utc>) -> MemoryEvent {
        MemoryEvent::BlockCreated {
            block_id: BlockId::new(),
            session_id: SessionId::from("s1"),
            source: Source::User,
            size_bytes: 10,
            timestamp: at,
        }
    }

    #[test]
    fn counts_events() {
        let aggregator = StatsAggregator::new();
        let now = Utc::now();
        aggregator.apply(&created(now));
        aggregator.apply(&created(now));
        aggregator.apply(&MemoryEvent::CorrectionRunCompleted {
            batch_id: "b1".into(),
            examined: 4,
            corrections: 3,
            removed: 1,
            failures: 0,
            timestamp: now,
        });
        aggregator.apply(&MemoryEvent::BlockEvaluated {
            block_id: BlockId::new(),
            score: 0.4,
            confidence: 0.3,
            degraded: true,
            timestamp: now,
        });

        assert_eq!(aggregator.total_messages(), 2);
        assert_eq!(aggregator.total_corrections(), 3);
        assert_eq!(aggregator.totals().degraded_evaluations, 1);
    }

    #[test]
    fn message_rate_uses_last_minute() {
        let aggregator = StatsAggregator::new();
        let now = Utc::now();
        aggregator.apply(&created(now - Duration::minutes(5)));
        aggregator.apply(&created(now - Duration::seconds(30)));
        aggregator.apply(&created(now - Duration::seconds(10)));

        assert_eq!(aggregator.messages_per_minute(now), 2.0);
        assert_eq!(aggregator.messages_per_minute(now + Duration::minutes(2)), 0.0);
        assert_eq!(aggregator.total_messages(), 3);
    }

    #[tokio::test]
    async fn listener_follows_the_bus() {
        let bus = EventBus::new(64);
        let store = InMemoryBlockStore::new(bus.clone());
        let sessions = SessionRegistry::new();
        let aggregator = Arc::new(StatsAggregator::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = aggregator.clone().listen(bus.subscribe(), stop_rx);

        let session = SessionId::from("s1");
        sessions.touch(&session, Utc::now()).await;
        store
            .create(NewBlock::new(session.clone(), "hello there", Source::User))
            .await
            .unwrap();
        store
            .create(NewBlock::new(session, "general kenobi", Source::Agent))
            .await
            .unwrap();

        for _ in 0..100 {
            if aggregator.total_messages() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }

        let snapshot = aggregator
            .snapshot(&store, &sessions, Duration::minutes(30), 0, Utc::now())
            .await
            .unwrap();
        assert_eq!(snapshot.total_messages, 2);
        assert_eq!(snapshot.active_sessions, 1);
        assert_eq!(snapshot.memory.total_blocks, 2);
        assert_eq!(snapshot.memory_usage_bytes, 25);

        stop_tx.send_replace(true);
        handle.await.unwrap();
    }
}
