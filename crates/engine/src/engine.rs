//! The memory engine facade.
//!
//! Wires the Block Store, evaluator, tier manager, correction loop and stats
//! broadcaster together from one [`EngineConfig`], and exposes the
//! operations callers use: ingestion, listing, retrieval, stats and audit.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use recollect_config::{EngineConfig, EvaluationWeights};
use recollect_core::{
    AuditRecord, BlockFilter, BlockId, BlockStore, CompletionProvider, ConversationBlock, Error,
    EvaluationClaim, EvaluationCommit, EventBus, MemoryEvent, MemoryTier, NewBlock, Result, SessionId,
    SessionRegistry, Source, StoreError,
};
use recollect_correction::{CorrectionReport, Improver, SelfCorrector, panic_reason};
use recollect_evaluator::{
    CompositeEvaluator, ContextBuilder, KeywordSimilarity, RelevanceEvaluator, SimilarityBackend,
};
use recollect_memory::{InMemoryBlockStore, TierManager};
use recollect_telemetry::{MemoryStats, StatsAggregator, StatsBroadcaster, StatsSnapshot, StatsSubscription};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::summary::BlockSummary;

/// Assembles a [`MemoryEngine`].
///
/// Every collaborator has an in-process default; replace any of them
/// before calling [`build`](Self::build).
pub struct MemoryEngineBuilder {
    config: EngineConfig,
    events: Option<EventBus>,
    store: Option<Arc<dyn BlockStore>>,
    evaluator: Option<Arc<dyn RelevanceEvaluator>>,
    similarity: Option<Arc<dyn SimilarityBackend>>,
    provider: Option<Arc<dyn CompletionProvider>>,
}

impl MemoryEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            events: None,
            store: None,
            evaluator: None,
            similarity: None,
            provider: None,
        }
    }

    /// Use an existing store. `events` must be the bus the store publishes to.
    pub fn store(mut self, store: Arc<dyn BlockStore>, events: EventBus) -> Self {
        self.store = Some(store);
        self.events = Some(events);
        self
    }

    /// Replace the composite evaluator entirely.
    pub fn evaluator(mut self, evaluator: Arc<dyn RelevanceEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Similarity backend for the semantic scorer of the default evaluator.
    pub fn similarity(mut self, similarity: Arc<dyn SimilarityBackend>) -> Self {
        self.similarity = Some(similarity);
        self
    }

    /// Completion provider used to improve blocks under review.
    pub fn provider(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn build(self) -> Result<MemoryEngine> {
        self.config.validate()?;
        let config = self.config;

        let events = self.events.unwrap_or_default();
        let store: Arc<dyn BlockStore> = match self.store {
            Some(store) => store,
            None => Arc::new(
                InMemoryBlockStore::new(events.clone()).with_summary_chars(config.tiers.summary_chars),
            ),
        };
        let sessions = Arc::new(SessionRegistry::new());

        let (evaluator, composite): (Arc<dyn RelevanceEvaluator>, Option<Arc<CompositeEvaluator>>) =
            match self.evaluator {
                Some(evaluator) => (evaluator, None),
                None => {
                    let similarity = self.similarity.unwrap_or_else(|| Arc::new(KeywordSimilarity));
                    let composite = Arc::new(CompositeEvaluator::new(&config.evaluation, similarity));
                    (composite.clone(), Some(composite))
                }
            };

        let tiers = Arc::new(
            TierManager::new(store.clone(), config.tiers.clone())
                .with_max_attempts(config.correction.max_mutation_attempts),
        );

        let mut corrector = SelfCorrector::new(
            store.clone(),
            evaluator.clone(),
            ContextBuilder::new(store.clone(), sessions.clone(), config.evaluation.context_window),
            tiers.clone(),
            sessions.clone(),
            events.clone(),
            config.correction.clone(),
        )
        .with_active_window(config.stats.active_session_window());
        if let Some(provider) = self.provider {
            corrector = corrector.with_improver(Improver::new(provider, config.correction.improvement_timeout()));
        }

        let stats = Arc::new(StatsBroadcaster::new(
            Arc::new(StatsAggregator::new()),
            store.clone(),
            sessions.clone(),
            config.stats.clone(),
        ));

        let (stop, _) = watch::channel(false);
        Ok(MemoryEngine {
            feed: Mutex::new(Some(events.subscribe())),
            contexts: ContextBuilder::new(store.clone(), sessions.clone(), config.evaluation.context_window),
            config,
            store,
            events,
            sessions,
            evaluator,
            composite,
            tiers,
            corrector: Arc::new(corrector),
            stats,
            tasks: Mutex::new(Vec::new()),
            stop,
        })
    }
}

/// Relevance-scored multi-tier conversation memory.
pub struct MemoryEngine {
    config: EngineConfig,
    store: Arc<dyn BlockStore>,
    events: EventBus,
    sessions: Arc<SessionRegistry>,
    evaluator: Arc<dyn RelevanceEvaluator>,
    composite: Option<Arc<CompositeEvaluator>>,
    contexts: ContextBuilder,
    tiers: Arc<TierManager>,
    corrector: Arc<SelfCorrector>,
    stats: Arc<StatsBroadcaster>,
    /// Event subscription taken at build time so the stats aggregator sees
    /// every event, even those published before `start`.
    feed: Mutex<Option<broadcast::Receiver<Arc<MemoryEvent>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stop: watch::Sender<bool>,
}

impl MemoryEngine {
    pub fn builder(config: EngineConfig) -> MemoryEngineBuilder {
        MemoryEngineBuilder::new(config)
    }

    /// An engine with the in-memory store and built-in scorers.
    pub fn new(config: EngineConfig) -> Result<Self> {
        MemoryEngineBuilder::new(config).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn tier_manager(&self) -> &Arc<TierManager> {
        &self.tiers
    }

    pub fn corrector(&self) -> &Arc<SelfCorrector> {
        &self.corrector
    }

    // ── Ingestion ─────────────────────────────────────────────────────

    /// Ingest one conversation turn.
    pub async fn submit_block(
        &self,
        session_id: SessionId,
        content: impl Into<String>,
        source: Source,
    ) -> Result<BlockId> {
        self.submit(NewBlock::new(session_id, content, source)).await
    }

    /// Ingest a fully described block (tool details, lineage, tags).
    ///
    /// Only malformed input is reported to the caller. If the initial
    /// evaluation fails the block stays PENDING and the error is logged.
    pub async fn submit(&self, new: NewBlock) -> Result<BlockId> {
        let session_id = new.session_id.clone();
        let block_id = self.store.create(new).await?;
        self.sessions.touch(&session_id, Utc::now()).await;

        if let Err(e) = self.evaluate_new(&block_id).await {
            warn!(block_id = %block_id, error = %e, "Initial evaluation failed, block left pending");
        }
        Ok(block_id)
    }

    async fn evaluate_new(&self, block_id: &BlockId) -> Result<()> {
        let now = Utc::now();
        let claim = self.store.begin_evaluation(block_id).await?;
        let committed = match AssertUnwindSafe(self.score_claimed(&claim, now))
            .catch_unwind()
            .await
        {
            Ok(Ok(committed)) => committed,
            Ok(Err(e)) => {
                self.release(claim).await;
                return Err(e.into());
            }
            Err(panic) => {
                self.release(claim).await;
                return Err(Error::Internal(format!(
                    "evaluation panicked: {}",
                    panic_reason(panic.as_ref())
                )));
            }
        };

        let tier = self.tiers.assign(&committed, now).await?;
        debug!(
            block_id = %block_id,
            score = committed.relevance_score,
            confidence = committed.confidence_score,
            status = %committed.processing_status,
            tier = %tier,
            "Block ingested"
        );
        Ok(())
    }

    /// Score a freshly claimed block and commit its initial status.
    async fn score_claimed(
        &self,
        claim: &EvaluationClaim,
        now: DateTime<Utc>,
    ) -> std::result::Result<ConversationBlock, StoreError> {
        let block = self.store.get(&claim.block_id).await?;
        let context = self.contexts.build(&block, now).await?;
        let evaluation = self.evaluator.evaluate(&block, &context).await;
        let decision = recollect_correction::initial(&self.config.correction, evaluation.score);
        self.store
            .commit_evaluation(
                claim.clone(),
                EvaluationCommit {
                    score: evaluation.score,
                    confidence: evaluation.confidence,
                    quality_metrics: evaluation.quality_metrics(),
                    new_status: Some(decision.status),
                    review_cycles: decision.review_cycles,
                    degraded: evaluation.degraded,
                    reason: decision.reason,
                    batch_id: None,
                },
            )
            .await
    }

    /// Put a block back to its prior status after a failed first evaluation.
    async fn release(&self, claim: EvaluationClaim) {
        let block_id = claim.block_id.clone();
        match self.store.abort_evaluation(claim).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {}
            Err(e) => warn!(block_id = %block_id, error = %e, "Could not release evaluation claim"),
        }
    }

    // ── Queries ───────────────────────────────────────────────────────

    /// Live blocks in sequence order.
    pub async fn list_blocks(
        &self,
        session_id: Option<SessionId>,
        tier: Option<MemoryTier>,
        limit: Option<usize>,
    ) -> Result<Vec<BlockSummary>> {
        let filter = BlockFilter {
            session_id,
            tier,
            limit,
            ..BlockFilter::default()
        };
        self.list(&filter).await
    }

    /// Live blocks matching an arbitrary filter; resume with `after_sequence`.
    pub async fn list(&self, filter: &BlockFilter) -> Result<Vec<BlockSummary>> {
        let blocks = self.store.list(filter).await?;
        Ok(blocks.iter().map(BlockSummary::from).collect())
    }

    /// Explicitly retrieve a block. A WARM or COLD block is promoted back
    /// to HOT with its full content restored.
    pub async fn get_block(&self, block_id: &BlockId) -> Result<ConversationBlock> {
        Ok(self.tiers.promote_on_access(block_id).await?)
    }

    /// Read a block without counting an access or moving it.
    pub async fn peek_block(&self, block_id: &BlockId) -> Result<ConversationBlock> {
        Ok(self.store.get(block_id).await?)
    }

    pub async fn get_memory_stats(&self) -> Result<MemoryStats> {
        let blocks = self.store.list(&BlockFilter::default()).await?;
        Ok(MemoryStats::from_blocks(&blocks))
    }

    /// Audit trail of one block, including removed blocks.
    pub async fn audit(&self, block_id: &BlockId) -> Result<Vec<AuditRecord>> {
        Ok(self.store.audit(block_id).await?)
    }

    /// Most recent audit records across the whole store.
    pub async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        Ok(self.store.recent_audit(limit).await?)
    }

    // ── Sessions & evaluation ─────────────────────────────────────────

    pub async fn set_session_goal(&self, session_id: &SessionId, goal: impl Into<String>) {
        self.sessions.set_goal(session_id, goal).await;
    }

    /// Swap the evaluation weights of the built-in evaluator.
    pub async fn update_weights(&self, weights: EvaluationWeights) -> Result<()> {
        let Some(composite) = &self.composite else {
            return Err(Error::Config {
                message: "weights can only be updated on the built-in evaluator".into(),
            });
        };
        composite.update_weights(weights).await?;
        Ok(())
    }

    // ── Correction ────────────────────────────────────────────────────

    /// Trigger one correction run now. `None` when a run is already active.
    pub async fn run_correction_cycle(&self) -> Option<CorrectionReport> {
        self.corrector.run_once().await
    }

    /// Trigger one correction run for a single session.
    pub async fn force_correction(&self, session_id: &SessionId) -> Option<CorrectionReport> {
        self.corrector.run_session(session_id).await
    }

    // ── Stats ─────────────────────────────────────────────────────────

    pub fn subscribe_stats(&self) -> StatsSubscription {
        self.stats.subscribe()
    }

    /// Sample and publish a stats snapshot immediately.
    pub async fn sample_stats(&self) -> Result<Arc<StatsSnapshot>> {
        Ok(self.stats.sample().await?)
    }

    pub async fn latest_stats(&self) -> Option<Arc<StatsSnapshot>> {
        self.stats.latest().await
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    /// Start the background tasks: stats aggregation, the stats sampler
    /// and the scheduled correction loop. Calling it twice has no effect.
    pub async fn start(&self) {
        let Some(feed) = self.feed.lock().await.take() else {
            debug!("Engine already started");
            return;
        };

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.stats.aggregator().clone().listen(feed, self.stop.subscribe()));
        tasks.push(self.stats.clone().start());
        tasks.push(self.corrector.clone().start());
        info!(
            store = self.store.name(),
            correction_interval_secs = self.config.correction.correction_interval_seconds,
            auto_correction = self.config.correction.enable_auto_correction,
            "Memory engine started"
        );
    }

    /// Stop the background tasks and wait for them to finish. A correction
    /// run in progress abandons its in-flight evaluation.
    pub async fn shutdown(&self) {
        self.stop.send_replace(true);
        self.corrector.stop();
        self.stats.stop();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Memory engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recollect_core::ProcessingStatus;

    fn engine() -> MemoryEngine {
        MemoryEngine::new(EngineConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn rejects_malformed_blocks() {
        let engine = engine();
        let err = engine
            .submit_block(SessionId::from("s1"), "   ", Source::User)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::Validation(_))));
        assert!(engine.list_blocks(None, None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ingested_blocks_are_evaluated() {
        let engine = engine();
        let session = SessionId::from("s1");
        engine.set_session_goal(&session, "tune postgres query performance").await;
        let id = engine
            .submit_block(
                session.clone(),
                "To tune postgres query performance, add an index on the join column because the planner falls back to a sequential scan.",
                Source::Agent,
            )
            .await
            .unwrap();

        let block = engine.peek_block(&id).await.unwrap();
        assert_ne!(block.processing_status, ProcessingStatus::Pending);
        assert_ne!(block.processing_status, ProcessingStatus::Removed);
        assert!((0.0..=1.0).contains(&block.relevance_score));
        assert_eq!(block.quality_metrics.len(), 5);

        let listed = engine.list_blocks(Some(session), None, Some(10)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].block_id, id);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.correction.remove_threshold = 0.9;
        assert!(matches!(MemoryEngine::new(config), Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn weights_update_through_the_engine() {
        let engine = engine();
        engine.update_weights(EvaluationWeights::uniform()).await.unwrap();

        let mut bad = EvaluationWeights::uniform();
        bad.semantic_alignment = 0.9;
        assert!(matches!(
            engine.update_weights(bad).await,
            Err(Error::Evaluation(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_shutdown() {
        let engine = engine();
        engine.start().await;
        engine.start().await;
        engine
            .submit_block(SessionId::from("s1"), "What is the capital of Portugal?", Source::User)
            .await
            .unwrap();
        engine.shutdown().await;
        assert!(!engine.corrector().is_running());
    }
}
