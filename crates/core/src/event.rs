//! Memory event system: change notifications from the store and loop.
//!
//! Every Block Store mutation and every correction run publishes an event.
//! The stats aggregator subscribes to derive rolling metrics without the
//! store knowing anything about it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::block::{BlockId, MemoryTier, ProcessingStatus, Source};
use crate::session::SessionId;

/// All memory events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MemoryEvent {
    /// A block was ingested (HOT, PENDING)
    BlockCreated {
        block_id: BlockId,
        session_id: SessionId,
        source: Source,
        size_bytes: usize,
        timestamp: DateTime<Utc>,
    },

    /// A block received a (re-)evaluation score
    BlockEvaluated {
        block_id: BlockId,
        score: f32,
        confidence: f32,
        degraded: bool,
        timestamp: DateTime<Utc>,
    },

    /// Processing status moved
    StatusChanged {
        block_id: BlockId,
        from: ProcessingStatus,
        to: ProcessingStatus,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Tier membership moved
    TierChanged {
        block_id: BlockId,
        from: MemoryTier,
        to: MemoryTier,
        timestamp: DateTime<Utc>,
    },

    /// A block was explicitly retrieved
    BlockAccessed {
        block_id: BlockId,
        access_count: u32,
        timestamp: DateTime<Utc>,
    },

    /// A block left the live indices
    BlockRemoved {
        block_id: BlockId,
        session_id: SessionId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A block's content was rewritten by an improver
    ContentRevised {
        block_id: BlockId,
        timestamp: DateTime<Utc>,
    },

    /// A correction run finished
    CorrectionRunCompleted {
        batch_id: String,
        examined: usize,
        corrections: usize,
        removed: usize,
        failures: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for memory events.
///
/// Uses `tokio::sync::broadcast`: publishing never waits on subscribers,
/// and a subscriber that falls behind loses the oldest events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<MemoryEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: MemoryEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<MemoryEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
