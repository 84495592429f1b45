//! Lightweight block listing entries.

use chrono::{DateTime, Utc};
use recollect_core::{BlockId, ConversationBlock, MemoryTier, ProcessingStatus, SessionId, Source};
use serde::{Deserialize, Serialize};

/// What `list_blocks` returns per block: metadata only, no content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub block_id: BlockId,
    pub session_id: SessionId,
    pub sequence_number: u64,
    pub source: Source,
    pub tier: MemoryTier,
    pub status: ProcessingStatus,
    pub relevance_score: f32,
    pub size_bytes: usize,
    pub created_at: DateTime<Utc>,
    pub access_count: u32,
}

impl From<&ConversationBlock> for BlockSummary {
    fn from(block: &ConversationBlock) -> Self {
        Self {
            block_id: block.block_id.clone(),
            session_id: block.session_id.clone(),
            sequence_number: block.sequence_number,
            source: block.source,
            tier: block.memory_tier,
            status: block.processing_status,
            relevance_score: block.relevance_score,
            size_bytes: block.size_bytes(),
            created_at: block.timestamp,
            access_count: block.access_count,
        }
    }
}
