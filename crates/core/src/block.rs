//! Conversation blocks: the unit of memory management.
//!
//! A block is one discrete piece of conversation (a user turn, an agent
//! output, a tool result) together with everything the engine knows about
//! it: relevance, tier placement, lifecycle status and an append-only
//! correction history.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::StoreError;
use crate::session::SessionId;

/// Window over which access recency decays to zero.
const RECENCY_WINDOW_SECS: f32 = 86_400.0;

/// Unique, immutable identifier for a block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub String);

impl BlockId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for BlockId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who produced a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    User,
    Agent,
    Tool,
    System,
}

impl FromStr for Source {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Source::User),
            "agent" | "assistant" => Ok(Source::Agent),
            "tool" => Ok(Source::Tool),
            "system" => Ok(Source::System),
            other => Err(StoreError::Validation(format!("unknown source '{other}'"))),
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Source::User => "user",
            Source::Agent => "agent",
            Source::Tool => "tool",
            Source::System => "system",
        };
        f.write_str(s)
    }
}

/// Storage class of a block.
///
/// Ordering runs from warmest to coldest: `Hot < Warm < Cold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryTier {
    Hot,
    Warm,
    Cold,
}

impl MemoryTier {
    pub const ALL: [MemoryTier; 3] = [MemoryTier::Hot, MemoryTier::Warm, MemoryTier::Cold];

    /// The next colder tier, or `None` for COLD.
    pub fn colder(self) -> Option<MemoryTier> {
        match self {
            MemoryTier::Hot => Some(MemoryTier::Warm),
            MemoryTier::Warm => Some(MemoryTier::Cold),
            MemoryTier::Cold => None,
        }
    }

    pub fn is_warmer_than(self, other: MemoryTier) -> bool {
        self < other
    }
}

impl std::fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MemoryTier::Hot => "HOT",
            MemoryTier::Warm => "WARM",
            MemoryTier::Cold => "COLD",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Evaluating,
    Retained,
    Review,
    Removed,
}

impl ProcessingStatus {
    pub fn is_terminal(self) -> bool {
        self == ProcessingStatus::Removed
    }

    /// Whether the correction loop should pick this block up.
    pub fn is_correctable(self) -> bool {
        matches!(self, ProcessingStatus::Retained | ProcessingStatus::Review)
    }

    /// The block state machine.
    ///
    /// `PENDING → EVALUATING → {RETAINED, REVIEW, REMOVED}`,
    /// `RETAINED/REVIEW → EVALUATING` on each correction cycle, and any
    /// live status may be removed. `REMOVED` is terminal.
    pub fn can_transition_to(self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;
        match (self, next) {
            (Removed, _) => false,
            (_, Removed) => true,
            (Pending, Evaluating) => true,
            (Evaluating, Retained | Review) => true,
            (Retained | Review, Evaluating | Retained | Review) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Evaluating => "evaluating",
            ProcessingStatus::Retained => "retained",
            ProcessingStatus::Review => "review",
            ProcessingStatus::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// One append-only entry in a block's correction history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionEntry {
    pub old_status: ProcessingStatus,
    pub new_status: ProcessingStatus,
    pub old_score: f32,
    pub new_score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_tier: Option<MemoryTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_tier: Option<MemoryTier>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    /// Correction run that produced this entry, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

/// Persisted audit record. Survives physical removal of the block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub block_id: BlockId,
    pub session_id: SessionId,
    pub old_status: ProcessingStatus,
    pub new_status: ProcessingStatus,
    pub old_score: f32,
    pub new_score: f32,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

impl AuditRecord {
    pub fn from_entry(block_id: &BlockId, session_id: &SessionId, entry: &CorrectionEntry) -> Self {
        Self {
            block_id: block_id.clone(),
            session_id: session_id.clone(),
            old_status: entry.old_status,
            new_status: entry.new_status,
            old_score: entry.old_score,
            new_score: entry.new_score,
            reason: entry.reason.clone(),
            timestamp: entry.timestamp,
            batch_id: entry.batch_id.clone(),
        }
    }
}

/// Size accounting for a block whose full text lives in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Compaction {
    pub original_bytes: usize,
    pub compacted_bytes: usize,
    pub compression_ratio: f32,
}

impl Compaction {
    pub fn new(original_bytes: usize, compacted_bytes: usize) -> Self {
        let compression_ratio = original_bytes as f32 / compacted_bytes.max(1) as f32;
        Self {
            original_bytes,
            compacted_bytes,
            compression_ratio,
        }
    }
}

/// A block submission, validated by the store before anything is allocated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBlock {
    pub session_id: SessionId,
    pub content: String,
    pub source: Source,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_parameters: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_blocks: Vec<BlockId>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub relevance_tags: BTreeSet<String>,
}

fn default_content_type() -> String {
    "text".into()
}

impl NewBlock {
    pub fn new(session_id: SessionId, content: impl Into<String>, source: Source) -> Self {
        Self {
            session_id,
            content: content.into(),
            source,
            content_type: default_content_type(),
            tool_name: None,
            tool_parameters: None,
            parent_blocks: Vec::new(),
            relevance_tags: BTreeSet::new(),
        }
    }

    pub fn with_tool(mut self, name: impl Into<String>, parameters: serde_json::Value) -> Self {
        self.tool_name = Some(name.into());
        self.tool_parameters = Some(parameters);
        self
    }

    pub fn with_parents(mut self, parents: Vec<BlockId>) -> Self {
        self.parent_blocks = parents;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Reject malformed submissions.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.session_id.0.trim().is_empty() {
            return Err(StoreError::Validation("session_id must not be empty".into()));
        }
        if self.content.trim().is_empty() {
            return Err(StoreError::Validation("content must not be empty".into()));
        }
        if self.content_type.trim().is_empty() {
            return Err(StoreError::Validation("content_type must not be empty".into()));
        }
        if self.tool_name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(StoreError::Validation("tool_name must not be blank when given".into()));
        }
        Ok(())
    }
}

/// A conversation block as owned by the Block Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationBlock {
    pub block_id: BlockId,
    pub session_id: SessionId,
    /// Strictly increasing within a session.
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,

    /// Live content: full text when HOT, the lossy summary when WARM,
    /// empty when COLD (the original sits in the content archive).
    pub content: String,
    pub content_type: String,
    pub source: Source,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_parameters: Option<serde_json::Value>,

    pub relevance_score: f32,
    pub confidence_score: f32,
    #[serde(default)]
    pub quality_metrics: BTreeMap<String, f32>,
    #[serde(default)]
    pub relevance_tags: BTreeSet<String>,

    pub memory_tier: MemoryTier,
    pub access_count: u32,
    pub last_accessed: DateTime<Utc>,
    pub retention_priority: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction: Option<Compaction>,

    /// Weak back-references; may resolve to "not found".
    #[serde(default)]
    pub parent_blocks: Vec<BlockId>,
    #[serde(default)]
    pub child_blocks: Vec<BlockId>,

    pub processing_status: ProcessingStatus,
    /// Consecutive correction cycles spent in REVIEW.
    #[serde(default)]
    pub review_cycles: u32,
    #[serde(default)]
    pub correction_history: Vec<CorrectionEntry>,

    /// Bumped on every mutation; used for compare-and-swap writes.
    #[serde(default)]
    pub version: u64,
}

impl ConversationBlock {
    /// Build a fresh block from a validated submission: HOT, PENDING.
    pub fn from_new(new: NewBlock, sequence_number: u64, now: DateTime<Utc>) -> Self {
        let mut block = Self {
            block_id: BlockId::new(),
            session_id: new.session_id,
            sequence_number,
            timestamp: now,
            content: new.content,
            content_type: new.content_type,
            source: new.source,
            tool_name: new.tool_name,
            tool_parameters: new.tool_parameters,
            relevance_score: 0.0,
            confidence_score: 0.0,
            quality_metrics: BTreeMap::new(),
            relevance_tags: new.relevance_tags,
            memory_tier: MemoryTier::Hot,
            access_count: 0,
            last_accessed: now,
            retention_priority: 0.0,
            compaction: None,
            parent_blocks: new.parent_blocks,
            child_blocks: Vec::new(),
            processing_status: ProcessingStatus::Pending,
            review_cycles: 0,
            correction_history: Vec::new(),
            version: 0,
        };
        block.refresh_retention_priority(now);
        block
    }

    pub fn is_live(&self) -> bool {
        !self.processing_status.is_terminal()
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).max(Duration::zero())
    }

    /// Bytes held live for this block.
    pub fn size_bytes(&self) -> usize {
        let params = self
            .tool_parameters
            .as_ref()
            .map(|p| p.to_string().len())
            .unwrap_or(0);
        self.content.len() + params
    }

    /// Bytes this block would occupy uncompacted.
    pub fn original_size_bytes(&self) -> usize {
        match &self.compaction {
            Some(c) => c.original_bytes,
            None => self.content.len(),
        }
    }

    /// Retention priority from score, access recency and access frequency.
    pub fn compute_retention_priority(&self, now: DateTime<Utc>) -> f32 {
        let since_access = (now - self.last_accessed).num_seconds().max(0) as f32;
        let recency = (1.0 - since_access / RECENCY_WINDOW_SECS).max(0.0);
        let frequency = (self.access_count as f32 / 10.0).min(1.0);
        clamp_unit(0.6 * self.relevance_score + 0.2 * recency + 0.2 * frequency)
    }

    pub fn refresh_retention_priority(&mut self, now: DateTime<Utc>) {
        self.retention_priority = self.compute_retention_priority(now);
    }

    pub fn last_correction(&self) -> Option<&CorrectionEntry> {
        self.correction_history.last()
    }
}

/// Clamp a score into `[0, 1]`, mapping NaN to 0.
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(score: f32) -> ConversationBlock {
        let mut b = ConversationBlock::from_new(
            NewBlock::new(SessionId::from("s1"), "hello world", Source::User),
            1,
            Utc::now(),
        );
        b.relevance_score = score;
        b
    }

    #[test]
    fn source_parsing_rejects_unknown() {
        assert_eq!("User".parse::<Source>().unwrap(), Source::User);
        assert_eq!("assistant".parse::<Source>().unwrap(), Source::Agent);
        assert!(matches!(
            "robot".parse::<Source>(),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn new_block_starts_hot_and_pending() {
        let b = block(0.0);
        assert_eq!(b.memory_tier, MemoryTier::Hot);
        assert_eq!(b.processing_status, ProcessingStatus::Pending);
        assert!(b.correction_history.is_empty());
    }

    #[test]
    fn validation_rejects_empty_content() {
        let new = NewBlock::new(SessionId::from("s1"), "   ", Source::User);
        assert!(new.validate().is_err());
    }

    #[test]
    fn tool_name_is_optional_but_not_blank() {
        let new = NewBlock::new(SessionId::from("s1"), "42", Source::Tool);
        assert!(new.validate().is_ok());
        let named = new.clone().with_tool("calculator", serde_json::json!({"expr": "6*7"}));
        assert!(named.validate().is_ok());
        let blank = new.with_tool("  ", serde_json::Value::Null);
        assert!(blank.validate().is_err());
    }

    #[test]
    fn status_state_machine() {
        use ProcessingStatus::*;
        assert!(Pending.can_transition_to(Evaluating));
        assert!(!Pending.can_transition_to(Retained));
        assert!(Evaluating.can_transition_to(Review));
        assert!(Review.can_transition_to(Retained));
        assert!(Retained.can_transition_to(Evaluating));
        assert!(!Removed.can_transition_to(Retained));
        assert!(!Removed.can_transition_to(Removed));
    }

    #[test]
    fn tier_ordering_runs_hot_to_cold() {
        assert!(MemoryTier::Hot.is_warmer_than(MemoryTier::Warm));
        assert!(MemoryTier::Warm.is_warmer_than(MemoryTier::Cold));
        assert_eq!(MemoryTier::Hot.colder(), Some(MemoryTier::Warm));
        assert_eq!(MemoryTier::Cold.colder(), None);
    }

    #[test]
    fn retention_priority_tracks_score() {
        let now = Utc::now();
        let low = block(0.1).compute_retention_priority(now);
        let high = block(0.9).compute_retention_priority(now);
        assert!(high > low);
        assert!((0.0..=1.0).contains(&high));
    }

    #[test]
    fn clamp_unit_handles_nan() {
        assert_eq!(clamp_unit(f32::NAN), 0.0);
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
    }

    #[test]
    fn compaction_ratio() {
        let c = Compaction::new(1000, 250);
        assert!((c.compression_ratio - 4.0).abs() < f32::EPSILON);
        assert_eq!(Compaction::new(10, 0).compression_ratio, 10.0);
    }
}
