//! Memory statistics for Recollect.
//!
//! [`StatsAggregator`] folds store and correction events into rolling
//! counters; [`StatsBroadcaster`] samples them on a fixed cadence and pushes
//! immutable [`StatsSnapshot`]s to subscribers.

pub mod aggregator;
pub mod broadcaster;
pub mod model;

pub use aggregator::StatsAggregator;
pub use broadcaster::{StatsBroadcaster, StatsSubscription};
pub use model::{MemoryStats, StatsSnapshot, TierUsage};
