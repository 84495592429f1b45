//! In-memory Block Store.
//!
//! All block records live behind one `RwLock`. Reads clone out a snapshot;
//! writes hold the lock only for the in-memory update. Archive I/O for tier
//! moves happens outside the lock and is reconciled with a compare step, so a
//! concurrent writer surfaces as [`StoreError::MutationConflict`].
//!
//! Tier moves and content revisions of one block also hold that block's
//! content guard from snapshot to archive cleanup, so their archive writes
//! never interleave.

use async_trait::async_trait;
use chrono::Utc;
use recollect_core::{
    AuditRecord, BlockFilter, BlockId, BlockStore, ConversationBlock, CorrectionEntry, EvaluationClaim,
    EvaluationCommit, EventBus, MemoryEvent, MemoryTier, NewBlock, ProcessingStatus, StoreError,
    clamp_unit,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};

use crate::archive::{ContentArchive, InMemoryArchive};
use crate::compaction;

const DEFAULT_SUMMARY_CHARS: usize = 160;

#[derive(Default)]
struct StoreState {
    /// Live blocks only. Removed blocks survive in `audit`.
    blocks: HashMap<BlockId, ConversationBlock>,
    by_sequence: BTreeMap<u64, BlockId>,
    /// Outstanding evaluation claims by token.
    claims: HashMap<BlockId, u64>,
    audit: Vec<AuditRecord>,
    next_sequence: u64,
}

impl StoreState {
    fn append_entry(&mut self, id: &BlockId, entry: CorrectionEntry) -> Result<(), StoreError> {
        let block = self
            .blocks
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        self.audit
            .push(AuditRecord::from_entry(&block.block_id, &block.session_id, &entry));
        block.correction_history.push(entry);
        Ok(())
    }

    fn detach(&mut self, id: &BlockId) -> Option<ConversationBlock> {
        let block = self.blocks.remove(id)?;
        self.by_sequence.remove(&block.sequence_number);
        self.claims.remove(id);
        Some(block)
    }
}

/// A Block Store that keeps everything in process memory.
pub struct InMemoryBlockStore {
    state: RwLock<StoreState>,
    archive: Arc<dyn ContentArchive>,
    content_guards: Mutex<HashMap<BlockId, Arc<AsyncMutex<()>>>>,
    events: EventBus,
    summary_chars: usize,
    next_token: AtomicU64,
}

impl InMemoryBlockStore {
    pub fn new(events: EventBus) -> Self {
        Self::with_archive(events, Arc::new(InMemoryArchive::new()))
    }

    pub fn with_archive(events: EventBus, archive: Arc<dyn ContentArchive>) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            archive,
            content_guards: Mutex::new(HashMap::new()),
            events,
            summary_chars: DEFAULT_SUMMARY_CHARS,
            next_token: AtomicU64::new(1),
        }
    }

    /// Length of the lossy summary kept for WARM blocks.
    pub fn with_summary_chars(mut self, summary_chars: usize) -> Self {
        self.summary_chars = summary_chars.max(1);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn archive(&self) -> &Arc<dyn ContentArchive> {
        &self.archive
    }

    /// The block's full text, from the live record or the archive.
    async fn full_content(&self, block: &ConversationBlock) -> Result<String, StoreError> {
        if block.compaction.is_none() {
            return Ok(block.content.clone());
        }
        self.archive
            .get(&block.block_id)
            .await?
            .ok_or_else(|| StoreError::Archive {
                block_id: block.block_id.clone(),
                tier: block.memory_tier,
            })
    }

    /// Live representation of `full` in `tier`, archiving it when needed.
    async fn relocate(
        &self,
        id: &BlockId,
        full: String,
        tier: MemoryTier,
    ) -> Result<(String, Option<recollect_core::Compaction>), StoreError> {
        match tier {
            MemoryTier::Hot => Ok((full, None)),
            MemoryTier::Warm => {
                let (summary, compaction) = compaction::compact(&full, self.summary_chars);
                self.archive.put(id, full).await?;
                Ok((summary, Some(compaction)))
            }
            MemoryTier::Cold => {
                let compaction = recollect_core::Compaction::new(full.len(), 0);
                self.archive.put(id, full).await?;
                Ok((String::new(), Some(compaction)))
            }
        }
    }

    async fn drop_archived(&self, id: &BlockId) {
        if let Err(e) = self.archive.remove(id).await {
            tracing::warn!(block_id = %id, error = %e, "Failed to drop archived content");
        }
    }

    /// Serialize content and archive changes for one block.
    async fn content_guard(&self, id: &BlockId) -> OwnedMutexGuard<()> {
        let guard = {
            let mut guards = self
                .content_guards
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(guards.entry(id.clone()).or_default())
        };
        guard.lock_owned().await
    }

    fn forget_guard(&self, id: &BlockId) {
        self.content_guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    fn publish_all(&self, events: Vec<MemoryEvent>) {
        for event in events {
            self.events.publish(event);
        }
    }

    /// Apply a non-evaluation status change, including removal.
    async fn transition(
        &self,
        id: &BlockId,
        status: ProcessingStatus,
        reason: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut events = Vec::new();
        let removed = {
            let mut state = self.state.write().await;
            let block = state
                .blocks
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            let from = block.processing_status;
            if from == ProcessingStatus::Evaluating {
                return Err(StoreError::MutationConflict(id.clone()));
            }
            if status == ProcessingStatus::Evaluating || !from.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    block_id: id.clone(),
                    from,
                    to: status,
                });
            }

            block.processing_status = status;
            block.version += 1;
            block.refresh_retention_priority(now);
            let entry = CorrectionEntry {
                old_status: from,
                new_status: status,
                old_score: block.relevance_score,
                new_score: block.relevance_score,
                old_tier: None,
                new_tier: None,
                reason: reason.to_string(),
                timestamp: now,
                batch_id: None,
            };
            state.append_entry(id, entry)?;
            events.push(MemoryEvent::StatusChanged {
                block_id: id.clone(),
                from,
                to: status,
                reason: reason.to_string(),
                timestamp: now,
            });

            if status == ProcessingStatus::Removed {
                let block = state.detach(id);
                if let Some(block) = &block {
                    events.push(MemoryEvent::BlockRemoved {
                        block_id: id.clone(),
                        session_id: block.session_id.clone(),
                        reason: reason.to_string(),
                        timestamp: now,
                    });
                }
                block
            } else {
                None
            }
        };

        if let Some(block) = removed {
            if block.compaction.is_some() {
                self.drop_archived(id).await;
            }
            self.forget_guard(id);
        }
        self.publish_all(events);
        Ok(())
    }
}

#[async_trait]
impl BlockStore for InMemoryBlockStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn create(&self, new: NewBlock) -> Result<BlockId, StoreError> {
        new.validate()?;
        let now = Utc::now();

        let mut state = self.state.write().await;
        state.next_sequence += 1;
        let block = ConversationBlock::from_new(new, state.next_sequence, now);
        let id = block.block_id.clone();

        for parent in &block.parent_blocks {
            if let Some(p) = state.blocks.get_mut(parent) {
                p.child_blocks.push(id.clone());
                p.version += 1;
            }
        }

        let event = MemoryEvent::BlockCreated {
            block_id: id.clone(),
            session_id: block.session_id.clone(),
            source: block.source,
            size_bytes: block.size_bytes(),
            timestamp: now,
        };
        state.by_sequence.insert(block.sequence_number, id.clone());
        state.blocks.insert(id.clone(), block);
        drop(state);

        tracing::debug!(block_id = %id, "Block created");
        self.events.publish(event);
        Ok(id)
    }

    async fn get(&self, id: &BlockId) -> Result<ConversationBlock, StoreError> {
        self.state
            .read()
            .await
            .blocks
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn list(&self, filter: &BlockFilter) -> Result<Vec<ConversationBlock>, StoreError> {
        let state = self.state.read().await;
        let start = filter.after_sequence.map_or(0, |s| s.saturating_add(1));
        let limit = filter.limit.unwrap_or(usize::MAX);

        Ok(state
            .by_sequence
            .range(start..)
            .filter_map(|(_, id)| state.blocks.get(id))
            .filter(|b| filter.matches(b))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_tier(
        &self,
        id: &BlockId,
        tier: MemoryTier,
        reason: &str,
    ) -> Result<ConversationBlock, StoreError> {
        let _guard = self.content_guard(id).await;
        let snapshot = self.get(id).await?;
        if snapshot.memory_tier == tier {
            return Ok(snapshot);
        }

        let full = self.full_content(&snapshot).await?;
        let (content, compaction) = self.relocate(id, full, tier).await?;

        let now = Utc::now();
        let updated = {
            let mut state = self.state.write().await;
            let block = state
                .blocks
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            if block.memory_tier != snapshot.memory_tier || block.content != snapshot.content {
                return Err(StoreError::MutationConflict(id.clone()));
            }

            let from = block.memory_tier;
            block.memory_tier = tier;
            block.content = content;
            block.compaction = compaction;
            block.version += 1;
            block.refresh_retention_priority(now);
            let entry = CorrectionEntry {
                old_status: block.processing_status,
                new_status: block.processing_status,
                old_score: block.relevance_score,
                new_score: block.relevance_score,
                old_tier: Some(from),
                new_tier: Some(tier),
                reason: reason.to_string(),
                timestamp: now,
                batch_id: None,
            };
            state.append_entry(id, entry)?;
            state
                .blocks
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(id.clone()))?
        };

        if tier == MemoryTier::Hot {
            self.drop_archived(id).await;
        }

        tracing::debug!(block_id = %id, from = %snapshot.memory_tier, to = %tier, "Tier changed");
        self.events.publish(MemoryEvent::TierChanged {
            block_id: id.clone(),
            from: snapshot.memory_tier,
            to: tier,
            timestamp: now,
        });
        Ok(updated)
    }

    async fn update_status(
        &self,
        id: &BlockId,
        status: ProcessingStatus,
        reason: &str,
    ) -> Result<(), StoreError> {
        self.transition(id, status, reason).await
    }

    async fn mark_removed(&self, id: &BlockId, reason: &str) -> Result<(), StoreError> {
        self.transition(id, ProcessingStatus::Removed, reason).await?;
        tracing::info!(block_id = %id, reason, "Block removed");
        Ok(())
    }

    async fn record_access(&self, id: &BlockId) -> Result<ConversationBlock, StoreError> {
        let now = Utc::now();
        let block = {
            let mut state = self.state.write().await;
            let block = state
                .blocks
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            block.access_count = block.access_count.saturating_add(1);
            block.last_accessed = now;
            block.version += 1;
            block.refresh_retention_priority(now);
            block.clone()
        };

        self.events.publish(MemoryEvent::BlockAccessed {
            block_id: id.clone(),
            access_count: block.access_count,
            timestamp: now,
        });
        Ok(block)
    }

    async fn begin_evaluation(&self, id: &BlockId) -> Result<EvaluationClaim, StoreError> {
        let now = Utc::now();
        let claim = {
            let mut state = self.state.write().await;
            let block = state
                .blocks
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            let from = block.processing_status;
            if from == ProcessingStatus::Evaluating {
                return Err(StoreError::MutationConflict(id.clone()));
            }
            if !from.can_transition_to(ProcessingStatus::Evaluating) {
                return Err(StoreError::InvalidTransition {
                    block_id: id.clone(),
                    from,
                    to: ProcessingStatus::Evaluating,
                });
            }

            block.processing_status = ProcessingStatus::Evaluating;
            block.version += 1;
            let claim = EvaluationClaim {
                block_id: id.clone(),
                token: self.next_token.fetch_add(1, Ordering::Relaxed),
                prior_status: from,
                prior_score: block.relevance_score,
            };
            state.claims.insert(id.clone(), claim.token);
            claim
        };

        self.events.publish(MemoryEvent::StatusChanged {
            block_id: id.clone(),
            from: claim.prior_status,
            to: ProcessingStatus::Evaluating,
            reason: "evaluation started".into(),
            timestamp: now,
        });
        Ok(claim)
    }

    async fn commit_evaluation(
        &self,
        claim: EvaluationClaim,
        commit: EvaluationCommit,
    ) -> Result<ConversationBlock, StoreError> {
        let id = claim.block_id.clone();
        let now = Utc::now();
        let score = clamp_unit(commit.score);
        let confidence = clamp_unit(commit.confidence);
        let new_status = commit.new_status.unwrap_or(claim.prior_status);

        let mut events = Vec::new();
        let (block, removed) = {
            let mut state = self.state.write().await;
            if state.claims.get(&id) != Some(&claim.token) {
                return Err(StoreError::MutationConflict(id.clone()));
            }
            if !ProcessingStatus::Evaluating.can_transition_to(new_status) {
                return Err(StoreError::InvalidTransition {
                    block_id: id.clone(),
                    from: claim.prior_status,
                    to: new_status,
                });
            }
            let block = state
                .blocks
                .get_mut(&id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;

            block.relevance_score = score;
            block.confidence_score = confidence;
            block.quality_metrics = commit.quality_metrics;
            block.processing_status = new_status;
            block.review_cycles = commit.review_cycles;
            block.version += 1;
            block.refresh_retention_priority(now);
            let session_id = block.session_id.clone();

            let entry = CorrectionEntry {
                old_status: claim.prior_status,
                new_status,
                old_score: claim.prior_score,
                new_score: score,
                old_tier: None,
                new_tier: None,
                reason: commit.reason.clone(),
                timestamp: now,
                batch_id: commit.batch_id,
            };
            state.append_entry(&id, entry)?;
            state.claims.remove(&id);

            events.push(MemoryEvent::BlockEvaluated {
                block_id: id.clone(),
                score,
                confidence,
                degraded: commit.degraded,
                timestamp: now,
            });
            events.push(MemoryEvent::StatusChanged {
                block_id: id.clone(),
                from: ProcessingStatus::Evaluating,
                to: new_status,
                reason: commit.reason.clone(),
                timestamp: now,
            });

            if new_status == ProcessingStatus::Removed {
                let block = state
                    .detach(&id)
                    .ok_or_else(|| StoreError::NotFound(id.clone()))?;
                events.push(MemoryEvent::BlockRemoved {
                    block_id: id.clone(),
                    session_id,
                    reason: commit.reason,
                    timestamp: now,
                });
                (block, true)
            } else {
                let block = state
                    .blocks
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| StoreError::NotFound(id.clone()))?;
                (block, false)
            }
        };

        if removed {
            if block.compaction.is_some() {
                self.drop_archived(&id).await;
            }
            self.forget_guard(&id);
        }
        self.publish_all(events);
        Ok(block)
    }

    async fn abort_evaluation(&self, claim: EvaluationClaim) -> Result<(), StoreError> {
        let now = Utc::now();
        {
            let mut state = self.state.write().await;
            if state.claims.get(&claim.block_id) != Some(&claim.token) {
                return Err(StoreError::MutationConflict(claim.block_id.clone()));
            }
            let block = state
                .blocks
                .get_mut(&claim.block_id)
                .ok_or_else(|| StoreError::NotFound(claim.block_id.clone()))?;
            block.processing_status = claim.prior_status;
            block.version += 1;
            state.claims.remove(&claim.block_id);
        }

        self.events.publish(MemoryEvent::StatusChanged {
            block_id: claim.block_id.clone(),
            from: ProcessingStatus::Evaluating,
            to: claim.prior_status,
            reason: "evaluation aborted".into(),
            timestamp: now,
        });
        Ok(())
    }

    async fn revise_content(
        &self,
        id: &BlockId,
        content: String,
        reason: &str,
    ) -> Result<(), StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::Validation("revised content must not be empty".into()));
        }
        let _guard = self.content_guard(id).await;
        let snapshot = self.get(id).await?;
        if snapshot.processing_status == ProcessingStatus::Evaluating {
            return Err(StoreError::MutationConflict(id.clone()));
        }
        let previous = match snapshot.compaction {
            Some(_) => Some(self.full_content(&snapshot).await?),
            None => None,
        };
        let (live, compaction) = self.relocate(id, content, snapshot.memory_tier).await?;

        let now = Utc::now();
        let outcome = {
            let mut state = self.state.write().await;
            let entry = match state.blocks.get_mut(id) {
                Some(block)
                    if block.memory_tier == snapshot.memory_tier
                        && block.content == snapshot.content
                        && block.processing_status != ProcessingStatus::Evaluating =>
                {
                    block.content = live;
                    block.compaction = compaction;
                    block.version += 1;
                    let entry = CorrectionEntry {
                        old_status: block.processing_status,
                        new_status: block.processing_status,
                        old_score: block.relevance_score,
                        new_score: block.relevance_score,
                        old_tier: None,
                        new_tier: None,
                        reason: reason.to_string(),
                        timestamp: now,
                        batch_id: None,
                    };
                    Some(entry)
                }
                _ => None,
            };
            match entry {
                Some(entry) => state.append_entry(id, entry),
                None => Err(StoreError::MutationConflict(id.clone())),
            }
        };

        if let Err(e) = outcome {
            // The archive already holds the rejected text.
            if let Some(previous) = previous {
                if let Err(restore) = self.archive.put(id, previous).await {
                    tracing::warn!(block_id = %id, error = %restore, "Failed to restore archived content");
                }
            }
            return Err(e);
        }

        tracing::info!(block_id = %id, "Block content revised");
        self.events.publish(MemoryEvent::ContentRevised {
            block_id: id.clone(),
            timestamp: now,
        });
        Ok(())
    }

    async fn hydrate(&self, block: &ConversationBlock) -> Result<ConversationBlock, StoreError> {
        let mut full = block.clone();
        full.content = self.full_content(block).await?;
        Ok(full)
    }

    async fn audit(&self, id: &BlockId) -> Result<Vec<AuditRecord>, StoreError> {
        let state = self.state.read().await;
        let records: Vec<AuditRecord> = state
            .audit
            .iter()
            .filter(|r| &r.block_id == id)
            .cloned()
            .collect();
        if records.is_empty() && !state.blocks.contains_key(id) {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(records)
    }

    async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditRecord>, StoreError> {
        let state = self.state.read().await;
        let skip = state.audit.len().saturating_sub(limit);
        Ok(state.audit[skip..].to_vec())
    }

    async fn count(&self, tier: Option<MemoryTier>) -> Result<usize, StoreError> {
        let state = self.state.read().await;
        Ok(match tier {
            None => state.blocks.len(),
            Some(t) => state.blocks.values().filter(|b| b.memory_tier == t).count(),
        })
    }
}
