//! Error types for the Recollect domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

use crate::block::{BlockId, MemoryTier, ProcessingStatus};

/// The top-level error type for Recollect operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Block store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Evaluation errors ---
    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    // --- Correction loop errors ---
    #[error("Correction error: {0}")]
    Correction(#[from] CorrectionError),

    // --- Completion provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Malformed block submission. Rejected synchronously, never retried.
    #[error("Invalid block: {0}")]
    Validation(String),

    #[error("Block not found: {0}")]
    NotFound(BlockId),

    /// Another writer holds or changed the block since it was read.
    #[error("Concurrent mutation on block {0}")]
    MutationConflict(BlockId),

    #[error("Invalid status transition for {block_id}: {from} -> {to}")]
    InvalidTransition {
        block_id: BlockId,
        from: ProcessingStatus,
        to: ProcessingStatus,
    },

    #[error("Block {block_id} has no archived content for tier {tier}")]
    Archive { block_id: BlockId, tier: MemoryTier },
}

impl StoreError {
    /// Whether the operation may succeed against a fresh read.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::MutationConflict(_))
    }
}

/// Failures of a single relevance dimension. The composite evaluator
/// absorbs these into a degraded result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("Scorer '{dimension}' failed: {reason}")]
    ScorerFailed { dimension: String, reason: String },

    #[error("Scorer '{dimension}' timed out after {timeout_ms}ms")]
    ScorerTimeout { dimension: String, timeout_ms: u64 },

    #[error("Invalid evaluation weights: {0}")]
    InvalidWeights(String),
}

/// Conditions raised while the correction loop or tier policy runs.
/// Logged and counted, never surfaced to ingestion callers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CorrectionError {
    #[error("No evictable block in tier {tier}")]
    CapacityExhausted { tier: MemoryTier },

    #[error("Correction of block {block_id} failed: {reason}")]
    LoopTaskFailure { block_id: BlockId, reason: String },

    #[error("Evaluation of block {0} was cancelled")]
    Cancelled(BlockId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}
