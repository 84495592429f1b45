//! # Recollect Core
//!
//! Domain types, traits, and error definitions for the Recollect
//! conversation memory engine. This crate has **no runtime machinery** of
//! its own: it defines the block model and the seams (store, completion
//! provider, event bus) that every other crate implements or consumes.
//!
//! ## Design Philosophy
//!
//! - The Block Store is a trait here; the in-memory implementation lives in
//!   `recollect-memory`.
//! - External collaborators (LLM completion) are traits with no provider
//!   baked in.
//! - Components receive their dependencies at construction; nothing here
//!   is a process-wide singleton.

pub mod block;
pub mod error;
pub mod event;
pub mod provider;
pub mod session;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use block::{
    AuditRecord, BlockId, Compaction, ConversationBlock, CorrectionEntry, MemoryTier, NewBlock,
    ProcessingStatus, Source, clamp_unit,
};
pub use error::{CorrectionError, Error, EvaluationError, ProviderError, Result, StoreError};
pub use event::{EventBus, MemoryEvent};
pub use provider::{CompletionMessage, CompletionOptions, CompletionProvider, CompletionRole};
pub use session::{SessionId, SessionRegistry};
pub use store::{BlockFilter, BlockStore, EvaluationClaim, EvaluationCommit, retry_on_conflict};
