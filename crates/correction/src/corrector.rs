//! The self-correction loop.
//!
//! A run takes the most recent RETAINED/REVIEW blocks of active sessions,
//! re-scores each one oldest-first, and applies the retain/review/remove
//! decision through the store. Runs are single-flight: a trigger that
//! arrives while a run is active is dropped, not queued.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use recollect_config::CorrectionConfig;
use recollect_core::{
    BlockFilter, BlockId, BlockStore, ConversationBlock, CorrectionError, EvaluationClaim,
    EvaluationCommit, EventBus, MemoryEvent, ProcessingStatus, SessionId, SessionRegistry,
    StoreError, retry_on_conflict,
};
use recollect_evaluator::{ContextBuilder, RelevanceEvaluator};
use recollect_memory::TierManager;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::decision::{self, Decision};
use crate::improve::Improver;

const CONFLICT_BACKOFF: Duration = Duration::from_millis(10);

/// Summary of one correction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionReport {
    pub batch_id: String,
    /// Set when the run was restricted to one session.
    pub session_id: Option<SessionId>,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub examined: usize,
    pub retained: usize,
    pub reviewed: usize,
    pub removed: usize,
    pub improved: usize,
    /// Blocks left alone this cycle: removed meanwhile, busy, or cancelled.
    pub skipped: usize,
    pub failed: usize,
    pub decisions: Vec<(BlockId, Decision)>,
}

impl CorrectionReport {
    fn new(batch_id: String, session_id: Option<SessionId>, dry_run: bool, started_at: DateTime<Utc>) -> Self {
        Self {
            batch_id,
            session_id,
            dry_run,
            started_at,
            finished_at: started_at,
            examined: 0,
            retained: 0,
            reviewed: 0,
            removed: 0,
            improved: 0,
            skipped: 0,
            failed: 0,
            decisions: Vec::new(),
        }
    }

    /// Decisions that were applied to the store.
    pub fn corrections(&self) -> usize {
        self.retained + self.reviewed + self.removed
    }

    fn record(&mut self, block_id: BlockId, outcome: BlockOutcome) {
        match outcome {
            BlockOutcome::Applied { decision, improved } => {
                match decision.status {
                    ProcessingStatus::Retained => self.retained += 1,
                    ProcessingStatus::Review => self.reviewed += 1,
                    ProcessingStatus::Removed => self.removed += 1,
                    _ => {}
                }
                if improved {
                    self.improved += 1;
                }
                self.decisions.push((block_id, decision));
            }
            BlockOutcome::Planned(decision) => self.decisions.push((block_id, decision)),
            BlockOutcome::Skipped => self.skipped += 1,
            BlockOutcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug)]
enum BlockOutcome {
    Applied { decision: Decision, improved: bool },
    /// Dry run: decided but not applied.
    Planned(Decision),
    Skipped,
    Failed,
}

/// Periodically re-evaluates recent blocks and corrects their status.
pub struct SelfCorrector {
    store: Arc<dyn BlockStore>,
    evaluator: Arc<dyn RelevanceEvaluator>,
    contexts: ContextBuilder,
    tiers: Arc<TierManager>,
    sessions: Arc<SessionRegistry>,
    events: EventBus,
    config: CorrectionConfig,
    active_window: chrono::Duration,
    improver: Option<Improver>,
    run_lock: Mutex<()>,
    stop: watch::Sender<bool>,
}

impl SelfCorrector {
    pub fn new(
        store: Arc<dyn BlockStore>,
        evaluator: Arc<dyn RelevanceEvaluator>,
        contexts: ContextBuilder,
        tiers: Arc<TierManager>,
        sessions: Arc<SessionRegistry>,
        events: EventBus,
        config: CorrectionConfig,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            store,
            evaluator,
            contexts,
            tiers,
            sessions,
            events,
            config,
            active_window: chrono::Duration::minutes(30),
            improver: None,
            run_lock: Mutex::new(()),
            stop,
        }
    }

    /// Rewrite REVIEW blocks through `improver` when
    /// `improve_review_blocks` is enabled.
    pub fn with_improver(mut self, improver: Improver) -> Self {
        self.improver = Some(improver);
        self
    }

    /// How recently a session must have been active to be corrected by a
    /// system-wide run.
    pub fn with_active_window(mut self, window: chrono::Duration) -> Self {
        self.active_window = window;
        self
    }

    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    /// Whether a run is in progress right now.
    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// One run across all active sessions. `None` when another run is
    /// already active.
    pub async fn run_once(&self) -> Option<CorrectionReport> {
        self.run(None).await
    }

    /// One run restricted to `session_id`, whether or not it is active.
    pub async fn run_session(&self, session_id: &SessionId) -> Option<CorrectionReport> {
        self.run(Some(session_id)).await
    }

    /// Spawn the scheduled loop. The first run happens one interval after
    /// start; ticks missed while a run was active are skipped.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.config.interval();
        let mut stop = self.stop.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = period.as_secs(), "Self-correction loop started");

            loop {
                tokio::select! {
                    changed = stop.changed() => {
                        let stopping = changed.is_err() || *stop.borrow();
                        if stopping {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if self.run_once().await.is_none() {
                            debug!("Scheduled correction skipped, previous run still active");
                        }
                    }
                }
            }

            info!("Self-correction loop stopped");
        })
    }

    /// Signal the scheduled loop and any run in progress to stop. An
    /// in-flight evaluation is abandoned and its block restored.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    async fn run(&self, session_id: Option<&SessionId>) -> Option<CorrectionReport> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            debug!(session_id = ?session_id.map(|s| s.as_str()), "Correction already running, trigger coalesced");
            return None;
        };

        let mut stop = self.stop.subscribe();
        let started_at = Utc::now();
        let dry_run = !self.config.enable_auto_correction;
        let batch_id = uuid::Uuid::new_v4().to_string();
        let mut report = CorrectionReport::new(batch_id.clone(), session_id.cloned(), dry_run, started_at);

        let candidates = match self.candidates(session_id, started_at).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(batch_id = %batch_id, error = %e, "Could not select correction candidates");
                Vec::new()
            }
        };

        for block in candidates {
            let stopping = *stop.borrow();
            if stopping {
                report.skipped += 1;
                continue;
            }
            report.examined += 1;
            let block_id = block.block_id.clone();
            let outcome = self.process(block, &batch_id, &mut stop).await;
            report.record(block_id, outcome);
        }

        if !dry_run {
            match self.tiers.sweep(Utc::now()).await {
                Ok(sweep) if !sweep.is_empty() => {
                    debug!(batch_id = %batch_id, demoted = sweep.demoted.len(), "Age sweep applied");
                }
                Ok(_) => {}
                Err(e) => warn!(batch_id = %batch_id, error = %e, "Age sweep failed"),
            }
        }

        report.finished_at = Utc::now();
        self.events.publish(MemoryEvent::CorrectionRunCompleted {
            batch_id: batch_id.clone(),
            examined: report.examined,
            corrections: report.corrections(),
            removed: report.removed,
            failures: report.failed,
            timestamp: report.finished_at,
        });
        info!(
            batch_id = %batch_id,
            examined = report.examined,
            retained = report.retained,
            reviewed = report.reviewed,
            removed = report.removed,
            skipped = report.skipped,
            failed = report.failed,
            dry_run,
            "Correction run completed"
        );
        Some(report)
    }

    /// The latest `batch_size` correctable blocks, oldest first.
    async fn candidates(
        &self,
        session_id: Option<&SessionId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConversationBlock>, StoreError> {
        let mut filter = BlockFilter::default()
            .with_statuses(vec![ProcessingStatus::Retained, ProcessingStatus::Review]);
        filter.session_id = session_id.cloned();
        let mut blocks = self.store.list(&filter).await?;

        if session_id.is_none() {
            let active: HashSet<SessionId> = self
                .sessions
                .active_sessions(now, self.active_window)
                .await
                .into_iter()
                .collect();
            blocks.retain(|b| active.contains(&b.session_id));
        }

        let skip = blocks.len().saturating_sub(self.config.batch_size);
        Ok(blocks.split_off(skip))
    }

    async fn process(
        &self,
        block: ConversationBlock,
        batch_id: &str,
        stop: &mut watch::Receiver<bool>,
    ) -> BlockOutcome {
        let block_id = block.block_id.clone();

        if !self.config.enable_auto_correction {
            return match AssertUnwindSafe(self.plan(block, stop)).catch_unwind().await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    warn!(block_id = %block_id, error = %e, "Dry-run evaluation failed");
                    BlockOutcome::Failed
                }
                Err(panic) => {
                    self.report_failure(&block_id, panic_reason(panic.as_ref()));
                    BlockOutcome::Failed
                }
            };
        }

        let claim = match retry_on_conflict(self.config.max_mutation_attempts, CONFLICT_BACKOFF, |_| {
            self.store.begin_evaluation(&block_id)
        })
        .await
        {
            Ok(claim) => claim,
            Err(StoreError::NotFound(_)) => {
                debug!(block_id = %block_id, "Block removed since selection");
                return BlockOutcome::Skipped;
            }
            Err(e) => {
                warn!(block_id = %block_id, error = %e, "Block busy, correction skipped this cycle");
                return BlockOutcome::Skipped;
            }
        };

        match AssertUnwindSafe(self.settle(&claim, batch_id, stop)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(CorrectionError::Cancelled(_))) => {
                info!(block_id = %block_id, "Evaluation abandoned on stop");
                BlockOutcome::Skipped
            }
            Ok(Err(e)) => {
                self.release(claim).await;
                self.report_failure(&block_id, e.to_string());
                BlockOutcome::Failed
            }
            Err(panic) => {
                self.release(claim).await;
                self.report_failure(&block_id, panic_reason(panic.as_ref()));
                BlockOutcome::Failed
            }
        }
    }

    /// Evaluate a claimed block and apply the decision.
    async fn settle(
        &self,
        claim: &EvaluationClaim,
        batch_id: &str,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<BlockOutcome, CorrectionError> {
        let now = Utc::now();
        let block = self.store.get(&claim.block_id).await?;
        let full = self.store.hydrate(&block).await?;
        let context = self.contexts.build(&full, now).await?;

        let evaluation = tokio::select! {
            evaluation = self.evaluator.evaluate(&full, &context) => evaluation,
            _ = stopped(stop) => {
                self.store.abort_evaluation(claim.clone()).await?;
                return Err(CorrectionError::Cancelled(claim.block_id.clone()));
            }
        };

        let decision = decision::decide(
            &self.config,
            evaluation.score,
            claim.prior_status,
            block.review_cycles,
        );
        let commit = EvaluationCommit {
            score: evaluation.score,
            confidence: evaluation.confidence,
            quality_metrics: evaluation.quality_metrics(),
            new_status: Some(decision.status),
            review_cycles: decision.review_cycles,
            degraded: evaluation.degraded,
            reason: decision.reason.clone(),
            batch_id: Some(batch_id.to_string()),
        };
        let committed = self.store.commit_evaluation(claim.clone(), commit).await?;
        debug!(
            block_id = %claim.block_id,
            old_score = claim.prior_score,
            score = committed.relevance_score,
            status = %decision.status,
            "Correction applied"
        );

        let mut improved = false;
        match decision.status {
            ProcessingStatus::Removed => {
                self.tiers.detach(&claim.block_id, &decision.reason).await?;
                info!(block_id = %claim.block_id, reason = %decision.reason, "Block removed");
            }
            ProcessingStatus::Retained => {
                if let Err(e) = self.tiers.rebalance(&committed, claim.prior_score, now).await {
                    warn!(block_id = %claim.block_id, error = %e, "Tier rebalance failed");
                }
            }
            ProcessingStatus::Review => {
                if self.config.improve_review_blocks {
                    if let Some(improver) = &self.improver {
                        improved = self.try_improve(improver, &full, &context, &evaluation).await;
                    }
                }
            }
            _ => {}
        }

        Ok(BlockOutcome::Applied { decision, improved })
    }

    async fn try_improve(
        &self,
        improver: &Improver,
        block: &ConversationBlock,
        context: &recollect_evaluator::EvaluationContext,
        evaluation: &recollect_evaluator::EvaluationResult,
    ) -> bool {
        let revised = match improver.improve(block, context, evaluation).await {
            Ok(Some(revised)) => revised,
            Ok(None) => return false,
            Err(e) => {
                warn!(block_id = %block.block_id, provider = improver.provider_name(), error = %e, "Improvement failed, block unchanged");
                return false;
            }
        };

        let reason = format!("content improved via {}", improver.provider_name());
        match self.store.revise_content(&block.block_id, revised, &reason).await {
            Ok(()) => true,
            Err(e) => {
                warn!(block_id = %block.block_id, error = %e, "Could not store improved content");
                false
            }
        }
    }

    /// Dry run: evaluate and log, touching nothing.
    async fn plan(
        &self,
        block: ConversationBlock,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<BlockOutcome, CorrectionError> {
        let full = self.store.hydrate(&block).await?;
        let context = self.contexts.build(&full, Utc::now()).await?;
        let evaluation = tokio::select! {
            evaluation = self.evaluator.evaluate(&full, &context) => evaluation,
            _ = stopped(stop) => return Ok(BlockOutcome::Skipped),
        };
        let decision = decision::decide(
            &self.config,
            evaluation.score,
            block.processing_status,
            block.review_cycles,
        );
        info!(
            block_id = %block.block_id,
            score = evaluation.score,
            status = %decision.status,
            reason = %decision.reason,
            "Auto-correction disabled, decision not applied"
        );
        Ok(BlockOutcome::Planned(decision))
    }

    /// Give up a claim after a failure. A claim that was already committed
    /// or aborted is left alone.
    async fn release(&self, claim: EvaluationClaim) {
        let block_id = claim.block_id.clone();
        match self.store.abort_evaluation(claim).await {
            Ok(()) => debug!(block_id = %block_id, "Claim released"),
            Err(e) if e.is_conflict() => {}
            Err(e) => warn!(block_id = %block_id, error = %e, "Could not release claim"),
        }
    }

    fn report_failure(&self, block_id: &BlockId, reason: String) {
        let failure = CorrectionError::LoopTaskFailure {
            block_id: block_id.clone(),
            reason,
        };
        error!(block_id = %block_id, error = %failure, "Block correction failed, continuing");
    }
}

/// Resolves once a stop has been signalled.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        let stopping = *stop.borrow_and_update();
        if stopping {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Readable message from a caught panic payload.
pub fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked".to_string()
    }
}
