//! Data model for memory statistics and periodic stats snapshots.

use chrono::{DateTime, Utc};
use recollect_core::{ConversationBlock, MemoryTier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

// ── Tier usage ────────────────────────────────────────────────────────────

/// Occupancy of one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierUsage {
    pub blocks: usize,
    pub size_bytes: usize,
}

// ── Memory stats ──────────────────────────────────────────────────────────

/// Point-in-time view of what the store holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_blocks: usize,
    /// Bytes currently held live (summaries for WARM, nothing for COLD).
    pub total_size_bytes: usize,
    /// Bytes the same blocks would take uncompacted.
    pub original_size_bytes: usize,
    /// `original_size_bytes / total_size_bytes`; 1.0 when nothing is compacted.
    pub compression_ratio: f32,
    pub tier_breakdown: BTreeMap<MemoryTier, TierUsage>,
    pub oldest_block: Option<DateTime<Utc>>,
    pub newest_block: Option<DateTime<Utc>>,
    /// Mean relevance over blocks that have been evaluated at least once.
    pub avg_relevance_score: f32,
}

impl MemoryStats {
    pub fn from_blocks(blocks: &[ConversationBlock]) -> Self {
        let mut tier_breakdown: BTreeMap<MemoryTier, TierUsage> =
            MemoryTier::ALL.iter().map(|t| (*t, TierUsage::default())).collect();
        let mut total_size_bytes = 0;
        let mut original_size_bytes = 0;
        let mut oldest_block: Option<DateTime<Utc>> = None;
        let mut newest_block: Option<DateTime<Utc>> = None;
        let mut score_sum = 0.0_f32;
        let mut scored = 0_usize;

        for block in blocks {
            let size = block.size_bytes();
            total_size_bytes += size;
            original_size_bytes += size - block.content.len() + block.original_size_bytes();

            let usage = tier_breakdown.entry(block.memory_tier).or_default();
            usage.blocks += 1;
            usage.size_bytes += size;

            oldest_block = Some(oldest_block.map_or(block.timestamp, |t| t.min(block.timestamp)));
            newest_block = Some(newest_block.map_or(block.timestamp, |t| t.max(block.timestamp)));

            if !block.correction_history.is_empty() {
                score_sum += block.relevance_score;
                scored += 1;
            }
        }

        let compression_ratio = if total_size_bytes == 0 {
            1.0
        } else {
            original_size_bytes as f32 / total_size_bytes as f32
        };

        Self {
            total_blocks: blocks.len(),
            total_size_bytes,
            original_size_bytes,
            compression_ratio,
            tier_breakdown,
            oldest_block,
            newest_block,
            avg_relevance_score: if scored == 0 { 0.0 } else { score_sum / scored as f32 },
        }
    }

    pub fn tier(&self, tier: MemoryTier) -> TierUsage {
        self.tier_breakdown.get(&tier).copied().unwrap_or_default()
    }
}

// ── Stats snapshot ────────────────────────────────────────────────────────

/// One periodic snapshot pushed to stats subscribers. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub active_sessions: usize,
    /// Blocks ingested since start.
    pub total_messages: u64,
    /// Correction decisions applied since start.
    pub total_corrections: u64,
    pub total_removed: u64,
    pub degraded_evaluations: u64,
    pub avg_relevance_score: f32,
    pub messages_per_minute: f32,
    pub memory_usage_bytes: usize,
    pub memory_usage_mb: f64,
    pub active_connections: usize,
    pub memory: MemoryStats,
    pub timestamp: DateTime<Utc>,
}

impl StatsSnapshot {
    pub(crate) fn bytes_to_mb(bytes: usize) -> f64 {
        bytes as f64 / BYTES_PER_MB
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use recollect_core::{Compaction, CorrectionEntry, NewBlock, ProcessingStatus, SessionId, Source};

    fn block(content: &str, tier: MemoryTier, at: DateTime<Utc>) -> ConversationBlock {
        let mut b = ConversationBlock::from_new(
            NewBlock::new(SessionId::from("s1"), content, Source::User),
            1,
            at,
        );
        b.memory_tier = tier;
        b
    }

    #[test]
    fn empty_store() {
        let stats = MemoryStats::from_blocks(&[]);
        assert_eq!(stats.total_blocks, 0);
        assert_eq!(stats.compression_ratio, 1.0);
        assert!(stats.oldest_block.is_none());
        assert_eq!(stats.tier(MemoryTier::Cold), TierUsage::default());
        assert_eq!(stats.tier_breakdown.len(), 3);
    }

    #[test]
    fn tier_breakdown_and_compression() {
        let now = Utc::now();
        let hot = block("0123456789", MemoryTier::Hot, now - Duration::minutes(5));
        let mut warm = block("summary", MemoryTier::Warm, now);
        warm.compaction = Some(Compaction::new(70, 7));

        let stats = MemoryStats::from_blocks(&[hot.clone(), warm]);
        assert_eq!(stats.total_blocks, 2);
        assert_eq!(stats.total_size_bytes, 17);
        assert_eq!(stats.original_size_bytes, 80);
        assert!((stats.compression_ratio - 80.0 / 17.0).abs() < 1e-5);
        assert_eq!(stats.tier(MemoryTier::Hot), TierUsage { blocks: 1, size_bytes: 10 });
        assert_eq!(stats.tier(MemoryTier::Warm).blocks, 1);
        assert_eq!(stats.oldest_block, Some(hot.timestamp));
        assert_eq!(stats.newest_block, Some(now));
    }

    #[test]
    fn average_skips_unevaluated_blocks() {
        let now = Utc::now();
        let pending = block("new", MemoryTier::Hot, now);
        let mut scored = block("old", MemoryTier::Hot, now);
        scored.relevance_score = 0.8;
        scored.processing_status = ProcessingStatus::Retained;
        scored.correction_history.push(CorrectionEntry {
            old_status: ProcessingStatus::Pending,
            new_status: ProcessingStatus::Retained,
            old_score: 0.0,
            new_score: 0.8,
            old_tier: None,
            new_tier: None,
            reason: "initial".into(),
            timestamp: now,
            batch_id: None,
        });

        let stats = MemoryStats::from_blocks(&[pending, scored]);
        assert!((stats.avg_relevance_score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn snapshot_serializes_tiers_by_name() {
        let snapshot = StatsSnapshot {
            active_sessions: 1,
            total_messages: 2,
            total_corrections: 0,
            total_removed: 0,
            degraded_evaluations: 0,
            avg_relevance_score: 0.5,
            messages_per_minute: 2.0,
            memory_usage_bytes: 10,
            memory_usage_mb: StatsSnapshot::bytes_to_mb(10),
            active_connections: 0,
            memory: MemoryStats::from_blocks(&[]),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json["memory"]["tier_breakdown"]["HOT"].is_object());
        assert_eq!(json["total_messages"], 2);
    }
}
