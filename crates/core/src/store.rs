//! Block Store trait: the only owner of persisted block state.
//!
//! Reads return snapshots (owned clones) and never wait on anything but the
//! mutation currently touching the index. Status changes for a block are
//! single-writer: the correction loop claims a block with
//! [`BlockStore::begin_evaluation`] and every other status writer gets
//! [`StoreError::MutationConflict`] until the claim is committed or aborted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use crate::block::{AuditRecord, BlockId, ConversationBlock, MemoryTier, NewBlock, ProcessingStatus};
use crate::error::StoreError;
use crate::session::SessionId;

/// Query over live blocks. Results are ordered by `sequence_number`
/// ascending; pass the last seen sequence as `after_sequence` to resume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<MemoryTier>,

    /// Restrict to these statuses. Empty means any live status.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statuses: Vec<ProcessingStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_sequence: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl BlockFilter {
    pub fn session(session_id: SessionId) -> Self {
        Self {
            session_id: Some(session_id),
            ..Self::default()
        }
    }

    pub fn tier(tier: MemoryTier) -> Self {
        Self {
            tier: Some(tier),
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: Vec<ProcessingStatus>) -> Self {
        self.statuses = statuses;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a live block passes every predicate except `limit`.
    pub fn matches(&self, block: &ConversationBlock) -> bool {
        self.session_id.as_ref().is_none_or(|s| &block.session_id == s)
            && self.tier.is_none_or(|t| block.memory_tier == t)
            && (self.statuses.is_empty() || self.statuses.contains(&block.processing_status))
            && self.since.is_none_or(|since| block.timestamp >= since)
            && self.after_sequence.is_none_or(|after| block.sequence_number > after)
    }
}

/// Proof that the holder is the single in-flight writer for a block.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationClaim {
    pub block_id: BlockId,
    pub token: u64,
    pub prior_status: ProcessingStatus,
    pub prior_score: f32,
}

/// Outcome of an evaluation, applied atomically with one audit entry.
#[derive(Debug, Clone, Default)]
pub struct EvaluationCommit {
    pub score: f32,
    pub confidence: f32,
    pub quality_metrics: BTreeMap<String, f32>,
    pub new_status: Option<ProcessingStatus>,
    pub review_cycles: u32,
    /// Some scorers did not contribute to `score`.
    pub degraded: bool,
    pub reason: String,
    pub batch_id: Option<String>,
}

/// The core Block Store trait.
///
/// Implementations: in-memory (`recollect-memory`). Anything durable plugs
/// in behind the same contract.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// The backend name (e.g., "in_memory").
    fn name(&self) -> &str;

    /// Allocate id and sequence number; the block starts HOT and PENDING.
    async fn create(&self, new: NewBlock) -> Result<BlockId, StoreError>;

    /// Fetch a live block. Removed blocks are `NotFound`.
    async fn get(&self, id: &BlockId) -> Result<ConversationBlock, StoreError>;

    /// Live blocks matching `filter`, by sequence number ascending.
    async fn list(&self, filter: &BlockFilter) -> Result<Vec<ConversationBlock>, StoreError>;

    /// Move a block to another tier, relocating its content accordingly.
    async fn update_tier(
        &self,
        id: &BlockId,
        tier: MemoryTier,
        reason: &str,
    ) -> Result<ConversationBlock, StoreError>;

    /// Direct status change outside an evaluation claim.
    async fn update_status(
        &self,
        id: &BlockId,
        status: ProcessingStatus,
        reason: &str,
    ) -> Result<(), StoreError>;

    /// Transition to REMOVED and drop the block from the live indices.
    /// Its audit trail is kept.
    async fn mark_removed(&self, id: &BlockId, reason: &str) -> Result<(), StoreError>;

    /// Count an explicit retrieval: bumps `access_count` and `last_accessed`.
    async fn record_access(&self, id: &BlockId) -> Result<ConversationBlock, StoreError>;

    /// Claim a block for evaluation (status becomes EVALUATING).
    async fn begin_evaluation(&self, id: &BlockId) -> Result<EvaluationClaim, StoreError>;

    /// Apply an evaluation outcome and release the claim.
    async fn commit_evaluation(
        &self,
        claim: EvaluationClaim,
        commit: EvaluationCommit,
    ) -> Result<ConversationBlock, StoreError>;

    /// Release a claim, restoring the prior status with no audit entry.
    async fn abort_evaluation(&self, claim: EvaluationClaim) -> Result<(), StoreError>;

    /// Replace a block's content (used by improvement of REVIEW blocks).
    async fn revise_content(
        &self,
        id: &BlockId,
        content: String,
        reason: &str,
    ) -> Result<(), StoreError>;

    /// A copy of the block carrying its full original content, whatever
    /// tier it sits in. Does not mutate anything.
    async fn hydrate(&self, block: &ConversationBlock) -> Result<ConversationBlock, StoreError>;

    /// Audit trail of one block, including removed blocks.
    async fn audit(&self, id: &BlockId) -> Result<Vec<AuditRecord>, StoreError>;

    /// Most recent audit records across all blocks, oldest first.
    async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditRecord>, StoreError>;

    /// Number of live blocks, optionally in one tier.
    async fn count(&self, tier: Option<MemoryTier>) -> Result<usize, StoreError>;
}

/// Run `op` against fresh state until it stops reporting a mutation
/// conflict, at most `attempts` times. The last conflict is returned.
pub async fn retry_on_conflict<T, F, Fut>(
    attempts: u32,
    backoff: Duration,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Err(e) if e.is_conflict() && attempt < attempts => {
                tracing::debug!(attempt, error = %e, "Mutation conflict, retrying");
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Source;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn block(seq: u64) -> ConversationBlock {
        ConversationBlock::from_new(
            NewBlock::new(SessionId::from("s1"), "content", Source::User),
            seq,
            Utc::now(),
        )
    }

    #[test]
    fn filter_matches_session_tier_and_cursor() {
        let b = block(5);
        assert!(BlockFilter::default().matches(&b));
        assert!(BlockFilter::session(SessionId::from("s1")).matches(&b));
        assert!(!BlockFilter::session(SessionId::from("s2")).matches(&b));
        assert!(!BlockFilter::tier(MemoryTier::Warm).matches(&b));

        let resumed = BlockFilter {
            after_sequence: Some(5),
            ..BlockFilter::default()
        };
        assert!(!resumed.matches(&b));
    }

    #[test]
    fn filter_statuses() {
        let b = block(1);
        let filter = BlockFilter::default()
            .with_statuses(vec![ProcessingStatus::Retained, ProcessingStatus::Review]);
        assert!(!filter.matches(&b));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_after_bound() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StoreError> =
            retry_on_conflict(3, Duration::from_millis(5), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::MutationConflict(BlockId::from("b"))) }
            })
            .await;
        assert!(matches!(result, Err(StoreError::MutationConflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_does_not_repeat_other_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StoreError> =
            retry_on_conflict(3, Duration::from_millis(5), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::NotFound(BlockId::from("b"))) }
            })
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_on_fresh_attempt() {
        let result = retry_on_conflict(3, Duration::from_millis(5), |attempt| async move {
            if attempt < 2 {
                Err(StoreError::MutationConflict(BlockId::from("b")))
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }
}
