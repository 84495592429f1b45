//! # Recollect Engine
//!
//! A relevance-scored, multi-tier memory for AI conversations. Every turn
//! is stored as a block, scored across five relevance dimensions, placed in
//! a HOT, WARM or COLD tier, and periodically re-scored by a self-correction
//! loop that retains, flags or removes it.
//!
//! ```no_run
//! use recollect_config::EngineConfig;
//! use recollect_core::{SessionId, Source};
//! use recollect_engine::MemoryEngine;
//!
//! # async fn demo() -> recollect_core::Result<()> {
//! let engine = MemoryEngine::new(EngineConfig::default())?;
//! engine.start().await;
//! let id = engine
//!     .submit_block(SessionId::from("s1"), "How do I rotate the API keys?", Source::User)
//!     .await?;
//! let block = engine.get_block(&id).await?;
//! println!("{} scored {:.2}", block.block_id, block.relevance_score);
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod summary;

pub use engine::{MemoryEngine, MemoryEngineBuilder};
pub use summary::BlockSummary;
