//! Storage tier management.
//!
//! Decides which tier a block belongs in, migrates blocks between HOT, WARM
//! and COLD through the Block Store, and enforces per-tier capacity by
//! evicting the lowest retention priority into the next colder tier.
//!
//! Tier age is measured from a block's last access (its creation time when
//! it was never retrieved), so an explicit retrieval restarts the clock.

use chrono::{DateTime, Utc};
use recollect_config::TierConfig;
use recollect_core::{
    BlockFilter, BlockId, BlockStore, ConversationBlock, CorrectionError, MemoryTier, ProcessingStatus,
    StoreError, retry_on_conflict,
};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

const CONFLICT_BACKOFF: Duration = Duration::from_millis(5);

/// Blocks moved or removed by one capacity pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvictionReport {
    pub demoted: Vec<(BlockId, MemoryTier)>,
    pub removed: Vec<BlockId>,
    /// Passes that found no evictable candidate and forced the LRU block.
    pub forced: usize,
}

impl EvictionReport {
    pub fn is_empty(&self) -> bool {
        self.demoted.is_empty() && self.removed.is_empty()
    }
}

/// Manages tier placement for blocks.
pub struct TierManager {
    store: Arc<dyn BlockStore>,
    config: TierConfig,
    max_attempts: u32,
}

impl TierManager {
    pub fn new(store: Arc<dyn BlockStore>, config: TierConfig) -> Self {
        Self {
            store,
            config,
            max_attempts: 3,
        }
    }

    /// Bound on retries when a tier move collides with another writer.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    /// The tier the default policy assigns to `block` at `now`.
    pub fn decide_tier(&self, block: &ConversationBlock, now: DateTime<Utc>) -> MemoryTier {
        let idle = (now - block.last_accessed.max(block.timestamp)).max(chrono::Duration::zero());
        if idle >= self.config.archive_after() {
            MemoryTier::Cold
        } else if block.relevance_score >= self.config.hot_threshold
            && idle < self.config.compress_after()
        {
            MemoryTier::Hot
        } else {
            MemoryTier::Warm
        }
    }

    /// Move a block to `target`, retrying against fresh reads on conflict.
    pub async fn migrate(
        &self,
        block_id: &BlockId,
        target: MemoryTier,
        reason: &str,
    ) -> Result<ConversationBlock, StoreError> {
        let block = retry_on_conflict(self.max_attempts, CONFLICT_BACKOFF, |_| {
            self.store.update_tier(block_id, target, reason)
        })
        .await?;
        tracing::info!(block_id = %block_id, tier = %target, reason, "Block migrated");
        Ok(block)
    }

    /// Count an explicit retrieval and bring the block back to HOT with its
    /// full content restored.
    pub async fn promote_on_access(&self, block_id: &BlockId) -> Result<ConversationBlock, StoreError> {
        let block = self.store.record_access(block_id).await?;
        if block.memory_tier == MemoryTier::Hot {
            return Ok(block);
        }

        let from = block.memory_tier;
        let block = self.migrate(block_id, MemoryTier::Hot, "promoted on access").await?;
        tracing::debug!(block_id = %block_id, from = %from, "Promoted on access");

        if let Err(e) = self.enforce_capacity(Some(block_id)).await {
            tracing::warn!(block_id = %block_id, error = %e, "Capacity enforcement after promotion failed");
        }
        Ok(block)
    }

    /// Re-place a block after a retained re-evaluation.
    ///
    /// Colder placement follows the policy directly; a warmer tier is only
    /// granted when the score improved over `previous_score`.
    pub async fn rebalance(
        &self,
        block: &ConversationBlock,
        previous_score: f32,
        now: DateTime<Utc>,
    ) -> Result<MemoryTier, StoreError> {
        let target = self.decide_tier(block, now);
        if target == block.memory_tier {
            return Ok(target);
        }
        if target.is_warmer_than(block.memory_tier) && block.relevance_score <= previous_score {
            return Ok(block.memory_tier);
        }

        let reason = if target.is_warmer_than(block.memory_tier) {
            "relevance improved"
        } else {
            "relevance or age below tier policy"
        };
        self.migrate(&block.block_id, target, reason).await?;
        self.enforce_capacity(None).await?;
        Ok(target)
    }

    /// Initial placement after a block's first evaluation.
    pub async fn assign(&self, block: &ConversationBlock, now: DateTime<Utc>) -> Result<MemoryTier, StoreError> {
        let target = self.decide_tier(block, now);
        if target != block.memory_tier {
            self.migrate(&block.block_id, target, "initial placement").await?;
        }
        self.enforce_capacity(None).await?;
        Ok(target)
    }

    /// Release a removed block's tier membership. Removing an already
    /// removed block is a no-op.
    pub async fn detach(&self, block_id: &BlockId, reason: &str) -> Result<(), StoreError> {
        match self.store.mark_removed(block_id, reason).await {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Demote blocks whose idle time has passed the tier policy.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<EvictionReport, StoreError> {
        let mut report = EvictionReport::default();
        for block in self.store.list(&BlockFilter::default()).await? {
            if block.processing_status == ProcessingStatus::Evaluating {
                continue;
            }
            let target = self.decide_tier(&block, now);
            if !block.memory_tier.is_warmer_than(target) {
                continue;
            }
            match self.migrate(&block.block_id, target, "aged out of tier").await {
                Ok(_) => report.demoted.push((block.block_id.clone(), target)),
                Err(e) => {
                    tracing::warn!(block_id = %block.block_id, error = %e, "Age demotion skipped")
                }
            }
        }

        let capacity = self.enforce_capacity(None).await?;
        report.demoted.extend(capacity.demoted);
        report.removed.extend(capacity.removed);
        report.forced += capacity.forced;
        Ok(report)
    }

    /// Bring every tier within capacity, HOT first so overflow cascades.
    ///
    /// `protect` is never chosen while another candidate exists.
    pub async fn enforce_capacity(&self, protect: Option<&BlockId>) -> Result<EvictionReport, StoreError> {
        let mut report = EvictionReport::default();
        for tier in MemoryTier::ALL {
            self.enforce_tier(tier, protect, &mut report).await?;
        }
        Ok(report)
    }

    async fn enforce_tier(
        &self,
        tier: MemoryTier,
        protect: Option<&BlockId>,
        report: &mut EvictionReport,
    ) -> Result<(), StoreError> {
        let capacity = self.config.capacity(tier);
        loop {
            let blocks = self.store.list(&BlockFilter::tier(tier)).await?;
            if blocks.len() <= capacity {
                return Ok(());
            }
            let overflow = blocks.len() - capacity;
            let now = Utc::now();

            let mut victims = eviction_order(&blocks, protect, now);
            if victims.is_empty() {
                let error = CorrectionError::CapacityExhausted { tier };
                tracing::warn!(tier = %tier, error = %error, "Forcing least-recently-used block out");
                victims = lru_order(&blocks);
                report.forced += 1;
            }
            if victims.is_empty() {
                tracing::warn!(tier = %tier, "Every block in tier is being evaluated; capacity left exceeded");
                return Ok(());
            }

            let mut moved = 0;
            for victim in victims.into_iter().take(overflow) {
                match tier.colder() {
                    Some(next) => {
                        let reason = format!("evicted from {tier} at capacity");
                        match self.migrate(&victim.block_id, next, &reason).await {
                            Ok(_) => {
                                report.demoted.push((victim.block_id.clone(), next));
                                moved += 1;
                            }
                            Err(e) => {
                                tracing::debug!(block_id = %victim.block_id, error = %e, "Eviction skipped")
                            }
                        }
                    }
                    None => {
                        tracing::warn!(
                            block_id = %victim.block_id,
                            priority = victim.retention_priority,
                            "COLD tier full, removing block permanently"
                        );
                        match self.detach(&victim.block_id, "evicted: COLD tier at capacity").await {
                            Ok(()) => {
                                report.removed.push(victim.block_id.clone());
                                moved += 1;
                            }
                            Err(e) => {
                                tracing::debug!(block_id = %victim.block_id, error = %e, "Removal skipped")
                            }
                        }
                    }
                }
            }
            if moved == 0 {
                return Ok(());
            }
        }
    }
}

/// Evictable blocks, lowest retention priority first, oldest first on ties.
fn eviction_order<'a>(
    blocks: &'a [ConversationBlock],
    protect: Option<&BlockId>,
    now: DateTime<Utc>,
) -> Vec<&'a ConversationBlock> {
    let mut candidates: Vec<(f32, &ConversationBlock)> = blocks
        .iter()
        .filter(|b| {
            !matches!(
                b.processing_status,
                ProcessingStatus::Evaluating | ProcessingStatus::Pending
            ) && protect != Some(&b.block_id)
        })
        .map(|b| (b.compute_retention_priority(now), b))
        .collect();
    candidates.sort_by(|(pa, a), (pb, b)| {
        pa.partial_cmp(pb)
            .unwrap_or(Ordering::Equal)
            .then(a.sequence_number.cmp(&b.sequence_number))
    });
    candidates.into_iter().map(|(_, b)| b).collect()
}

/// Fallback order when nothing is evictable: least recently used first,
/// skipping only blocks with an evaluation in flight.
fn lru_order(blocks: &[ConversationBlock]) -> Vec<&ConversationBlock> {
    let mut candidates: Vec<&ConversationBlock> = blocks
        .iter()
        .filter(|b| b.processing_status != ProcessingStatus::Evaluating)
        .collect();
    candidates.sort_by(|a, b| {
        a.last_accessed
            .cmp(&b.last_accessed)
            .then(a.sequence_number.cmp(&b.sequence_number))
    });
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBlockStore;
    use recollect_core::{EvaluationCommit, EventBus, NewBlock, SessionId, Source};

    fn config(hot: usize, warm: usize, cold: usize) -> TierConfig {
        TierConfig {
            hot_capacity: hot,
            warm_capacity: warm,
            cold_capacity: cold,
            ..TierConfig::default()
        }
    }

    fn setup(cfg: TierConfig) -> (Arc<InMemoryBlockStore>, TierManager) {
        let store = Arc::new(InMemoryBlockStore::new(EventBus::new(1024)));
        let manager = TierManager::new(store.clone(), cfg);
        (store, manager)
    }

    async fn evaluated(store: &InMemoryBlockStore, content: &str, score: f32) -> ConversationBlock {
        let id = store
            .create(NewBlock::new(SessionId::from("s1"), content, Source::User))
            .await
            .unwrap();
        let claim = store.begin_evaluation(&id).await.unwrap();
        store
            .commit_evaluation(
                claim,
                EvaluationCommit {
                    score,
                    confidence: 1.0,
                    new_status: Some(ProcessingStatus::Retained),
                    reason: "initial evaluation".into(),
                    ..EvaluationCommit::default()
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn decide_tier_follows_score_and_idle_time() {
        let (store, manager) = setup(TierConfig::default());
        let now = Utc::now();

        let hot = evaluated(&store, "important", 0.85).await;
        assert_eq!(manager.decide_tier(&hot, now), MemoryTier::Hot);

        let warm = evaluated(&store, "so-so", 0.5).await;
        assert_eq!(manager.decide_tier(&warm, now), MemoryTier::Warm);

        let later = now + chrono::Duration::minutes(45);
        assert_eq!(manager.decide_tier(&hot, later), MemoryTier::Warm);

        let much_later = now + chrono::Duration::hours(25);
        assert_eq!(manager.decide_tier(&hot, much_later), MemoryTier::Cold);
    }

    #[tokio::test]
    async fn overflow_moves_lowest_priority_to_warm() {
        let (store, manager) = setup(config(100, 500, 2000));
        for i in 0..150 {
            evaluated(&store, &format!("block {i}"), 0.7 + i as f32 * 0.002).await;
        }

        let report = manager.enforce_capacity(None).await.unwrap();
        assert_eq!(report.demoted.len(), 50);
        assert_eq!(store.count(Some(MemoryTier::Hot)).await.unwrap(), 100);
        assert_eq!(store.count(Some(MemoryTier::Warm)).await.unwrap(), 50);

        let warm = store.list(&BlockFilter::tier(MemoryTier::Warm)).await.unwrap();
        let hot = store.list(&BlockFilter::tier(MemoryTier::Hot)).await.unwrap();
        let max_warm = warm.iter().map(|b| b.relevance_score).fold(0.0, f32::max);
        let min_hot = hot.iter().map(|b| b.relevance_score).fold(1.0, f32::min);
        assert!(max_warm < min_hot);
    }

    #[tokio::test]
    async fn overflow_cascades_and_cold_overflow_removes() {
        let (store, manager) = setup(config(1, 1, 1));
        let mut ids = Vec::new();
        for (i, score) in [0.9, 0.8, 0.7, 0.6].into_iter().enumerate() {
            ids.push(evaluated(&store, &format!("block {i}"), score).await.block_id);
        }

        let report = manager.enforce_capacity(None).await.unwrap();
        assert_eq!(report.removed, vec![ids[3].clone()]);
        assert_eq!(store.count(None).await.unwrap(), 3);
        for tier in MemoryTier::ALL {
            assert_eq!(store.count(Some(tier)).await.unwrap(), 1);
        }
        let trail = store.audit(&ids[3]).await.unwrap();
        assert_eq!(trail.last().unwrap().new_status, ProcessingStatus::Removed);
    }

    #[tokio::test]
    async fn promotion_restores_content_and_protects_block() {
        let (store, manager) = setup(config(1, 10, 10));
        let old = evaluated(&store, "an old block with content worth keeping", 0.3).await;
        manager.migrate(&old.block_id, MemoryTier::Cold, "test").await.unwrap();
        let fresh = evaluated(&store, "fresh", 0.99).await;

        let promoted = manager.promote_on_access(&old.block_id).await.unwrap();
        assert_eq!(promoted.memory_tier, MemoryTier::Hot);
        assert_eq!(promoted.content, "an old block with content worth keeping");
        assert_eq!(promoted.access_count, 1);

        assert_eq!(store.get(&old.block_id).await.unwrap().memory_tier, MemoryTier::Hot);
        assert_eq!(store.get(&fresh.block_id).await.unwrap().memory_tier, MemoryTier::Warm);
    }

    #[tokio::test]
    async fn rebalance_only_warms_on_improved_score() {
        let (store, manager) = setup(TierConfig::default());
        let block = evaluated(&store, "content", 0.9).await;
        manager.migrate(&block.block_id, MemoryTier::Warm, "test").await.unwrap();
        let block = store.get(&block.block_id).await.unwrap();
        let now = Utc::now();

        let tier = manager.rebalance(&block, 0.9, now).await.unwrap();
        assert_eq!(tier, MemoryTier::Warm);

        let tier = manager.rebalance(&block, 0.5, now).await.unwrap();
        assert_eq!(tier, MemoryTier::Hot);
    }

    #[tokio::test]
    async fn sweep_only_demotes() {
        let (store, manager) = setup(TierConfig::default());
        let hot = evaluated(&store, "hot", 0.9).await;
        let report = manager.sweep(Utc::now() + chrono::Duration::hours(2)).await.unwrap();
        assert_eq!(report.demoted, vec![(hot.block_id.clone(), MemoryTier::Warm)]);

        let report = manager.sweep(Utc::now()).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(store.get(&hot.block_id).await.unwrap().memory_tier, MemoryTier::Warm);
    }

    #[tokio::test]
    async fn detach_is_idempotent() {
        let (store, manager) = setup(TierConfig::default());
        let block = evaluated(&store, "bye", 0.1).await;
        manager.detach(&block.block_id, "low relevance").await.unwrap();
        manager.detach(&block.block_id, "low relevance").await.unwrap();
        assert_eq!(store.audit(&block.block_id).await.unwrap().len(), 2);
    }
}
