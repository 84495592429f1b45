//! Block storage and tier management for Recollect.
//!
//! - [`InMemoryBlockStore`]: the Block Store, owner of every block record.
//! - [`ContentArchive`]: side storage for compacted and archived content.
//! - [`TierManager`]: HOT/WARM/COLD placement, migration and eviction.

pub mod archive;
pub mod compaction;
pub mod store;
pub mod tiers;

pub use archive::{ContentArchive, InMemoryArchive};
pub use compaction::{compact, summarize};
pub use store::InMemoryBlockStore;
pub use tiers::{EvictionReport, TierManager};
