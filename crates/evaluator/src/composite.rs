//! Composite relevance evaluation.
//!
//! Runs every dimension scorer concurrently, each under its own timeout, and
//! folds the results into one weighted score. A scorer that errors or times
//! out is dropped and the remaining weights are renormalized; the result is
//! then flagged as degraded with reduced confidence.

use async_trait::async_trait;
use recollect_config::{EvaluationConfig, EvaluationWeights};
use recollect_core::{ConversationBlock, EvaluationError, clamp_unit};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::context::EvaluationContext;
use crate::dimension::{Dimension, DimensionResult, DimensionScorer};
use crate::scorers::{ConsistencyScorer, GoalScorer, QualityScorer, SemanticScorer, TemporalScorer};
use crate::similarity::SimilarityBackend;

/// Score used for a block that has never been scored when no scorer ran.
const NEUTRAL_SCORE: f32 = 0.5;

/// Outcome of evaluating one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub score: f32,
    pub confidence: f32,
    pub dimensions: BTreeMap<Dimension, DimensionResult>,
    /// Dimensions whose scorer failed or timed out.
    pub failed: Vec<Dimension>,
    pub degraded: bool,
    pub reasoning: String,
}

impl EvaluationResult {
    /// Per-dimension scores, keyed by dimension name.
    pub fn quality_metrics(&self) -> BTreeMap<String, f32> {
        self.dimensions
            .iter()
            .map(|(d, r)| (d.as_str().to_string(), r.score))
            .collect()
    }

    /// The lowest scoring dimension that ran.
    pub fn weakest_dimension(&self) -> Option<Dimension> {
        self.dimensions
            .iter()
            .min_by(|a, b| a.1.score.partial_cmp(&b.1.score).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(d, _)| *d)
    }
}

/// Anything that can produce an [`EvaluationResult`] for a block.
///
/// Evaluation never fails outright: missing inputs lower confidence instead.
#[async_trait]
pub trait RelevanceEvaluator: Send + Sync {
    async fn evaluate(&self, block: &ConversationBlock, context: &EvaluationContext) -> EvaluationResult;
}

/// Weighted evaluator over a fixed set of dimension scorers.
pub struct CompositeEvaluator {
    scorers: Vec<Arc<dyn DimensionScorer>>,
    weights: RwLock<EvaluationWeights>,
    timeout: Duration,
}

impl CompositeEvaluator {
    /// The five built-in scorers, configured from `config`.
    pub fn new(config: &EvaluationConfig, similarity: Arc<dyn SimilarityBackend>) -> Self {
        let scorers: Vec<Arc<dyn DimensionScorer>> = vec![
            Arc::new(SemanticScorer::new(similarity)),
            Arc::new(TemporalScorer::new(config.recency_half_life_secs)),
            Arc::new(GoalScorer),
            Arc::new(QualityScorer),
            Arc::new(ConsistencyScorer),
        ];
        Self {
            scorers,
            weights: RwLock::new(config.weights),
            timeout: config.scorer_timeout(),
        }
    }

    /// A custom scorer set. Weights must sum to 1.0.
    pub fn with_scorers(
        scorers: Vec<Arc<dyn DimensionScorer>>,
        weights: EvaluationWeights,
        timeout: Duration,
    ) -> Result<Self, EvaluationError> {
        check_weights(&weights)?;
        Ok(Self {
            scorers,
            weights: RwLock::new(weights),
            timeout,
        })
    }

    pub async fn weights(&self) -> EvaluationWeights {
        *self.weights.read().await
    }

    /// Swap the dimension weights. Evaluations already running keep the
    /// weights they started with.
    pub async fn update_weights(&self, weights: EvaluationWeights) -> Result<(), EvaluationError> {
        check_weights(&weights)?;
        *self.weights.write().await = weights;
        tracing::info!(?weights, "Evaluation weights updated");
        Ok(())
    }

    async fn run_scorer(
        &self,
        scorer: &Arc<dyn DimensionScorer>,
        block: &ConversationBlock,
        context: &EvaluationContext,
    ) -> (Dimension, Result<DimensionResult, EvaluationError>) {
        let dimension = scorer.dimension();
        let outcome = match tokio::time::timeout(self.timeout, scorer.score(block, context)).await {
            Ok(result) => result,
            Err(_) => Err(EvaluationError::ScorerTimeout {
                dimension: dimension.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        };
        (dimension, outcome)
    }
}

fn check_weights(weights: &EvaluationWeights) -> Result<(), EvaluationError> {
    weights
        .validate()
        .map_err(|e| EvaluationError::InvalidWeights(e.to_string()))
}

#[async_trait]
impl RelevanceEvaluator for CompositeEvaluator {
    async fn evaluate(&self, block: &ConversationBlock, context: &EvaluationContext) -> EvaluationResult {
        let weights = *self.weights.read().await;
        let outcomes = futures::future::join_all(
            self.scorers
                .iter()
                .map(|scorer| self.run_scorer(scorer, block, context)),
        )
        .await;

        let mut dimensions = BTreeMap::new();
        let mut failed = Vec::new();
        let mut total_weight = 0.0_f32;
        let mut ran_weight = 0.0_f32;
        let mut weighted = 0.0_f32;
        let mut certainty_sum = 0.0_f32;

        for (dimension, outcome) in outcomes {
            let weight = dimension.weight(&weights);
            total_weight += weight;
            match outcome {
                Ok(result) => {
                    ran_weight += weight;
                    weighted += weight * clamp_unit(result.score);
                    certainty_sum += result.certainty;
                    dimensions.insert(dimension, result);
                }
                Err(e) => {
                    warn!(block_id = %block.block_id, dimension = %dimension, error = %e, "Scorer unavailable, degrading evaluation");
                    failed.push(dimension);
                }
            }
        }

        let degraded = !failed.is_empty();
        let reasoning = dimensions
            .iter()
            .map(|(d, r)| format!("{d}: {:.2} ({})", r.score, r.reasoning))
            .collect::<Vec<_>>()
            .join("; ");

        if ran_weight <= f32::EPSILON || dimensions.is_empty() {
            let fallback = if block.correction_history.is_empty() {
                NEUTRAL_SCORE
            } else {
                block.relevance_score
            };
            warn!(block_id = %block.block_id, "No scorer produced a result, keeping previous score");
            return EvaluationResult {
                score: clamp_unit(fallback),
                confidence: 0.0,
                dimensions,
                failed,
                degraded: true,
                reasoning: "no dimension could be scored".into(),
            };
        }

        let score = clamp_unit(weighted / ran_weight);
        let mean_certainty = certainty_sum / dimensions.len() as f32;
        let coverage = if total_weight > 0.0 { ran_weight / total_weight } else { 0.0 };
        let penalty = if degraded { 0.5 } else { 1.0 };
        let confidence = clamp_unit(mean_certainty * coverage * penalty);

        debug!(block_id = %block.block_id, score, confidence, degraded, "Block evaluated");
        EvaluationResult {
            score,
            confidence,
            dimensions,
            failed,
            degraded,
            reasoning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::KeywordSimilarity;
    use chrono::{Duration as ChronoDuration, Utc};
    use recollect_core::{NewBlock, SessionId, Source};

    struct Unreachable;

    #[async_trait]
    impl SimilarityBackend for Unreachable {
        fn name(&self) -> &str {
            "unreachable"
        }

        async fn similarity(&self, _a: &str, _b: &str) -> Result<f32, EvaluationError> {
            Err(EvaluationError::ScorerFailed {
                dimension: "semantic_alignment".into(),
                reason: "connection refused".into(),
            })
        }
    }

    struct Stalled;

    #[async_trait]
    impl SimilarityBackend for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn similarity(&self, _a: &str, _b: &str) -> Result<f32, EvaluationError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(1.0)
        }
    }

    fn block(content: &str, source: Source) -> ConversationBlock {
        let now = Utc::now();
        ConversationBlock::from_new(NewBlock::new(SessionId::from("s1"), content, source), 1, now)
    }

    fn context(at: chrono::DateTime<Utc>) -> EvaluationContext {
        EvaluationContext::empty(SessionId::from("s1"), at).with_goal("plan a trip to Lisbon")
    }

    fn evaluator(similarity: Arc<dyn SimilarityBackend>) -> CompositeEvaluator {
        CompositeEvaluator::new(&EvaluationConfig::default(), similarity)
    }

    #[tokio::test]
    async fn evaluation_is_deterministic() {
        let eval = evaluator(Arc::new(KeywordSimilarity));
        let b = block("Lisbon trip: fly in March because fares are lower.", Source::Agent);
        let ctx = context(b.timestamp + ChronoDuration::minutes(5));
        let first = eval.evaluate(&b, &ctx).await;
        let second = eval.evaluate(&b, &ctx).await;
        assert_eq!(first, second);
        assert!(!first.degraded);
        assert!((0.0..=1.0).contains(&first.score));
        assert!((0.0..=1.0).contains(&first.confidence));
    }

    #[tokio::test]
    async fn gibberish_scores_below_substantive_content() {
        let eval = evaluator(Arc::new(KeywordSimilarity));
        let noise = block("asdfghjkl qwerty", Source::User);
        let useful = block(
            "For the Lisbon trip, book flights first because March fares rise quickly.",
            Source::Agent,
        );
        let ctx = context(noise.timestamp);
        let noise_score = eval.evaluate(&noise, &ctx).await.score;
        let useful_score = eval.evaluate(&useful, &ctx).await.score;
        assert!(noise_score < useful_score);
        assert!(noise_score < 0.6);
    }

    #[tokio::test]
    async fn unreachable_semantic_scorer_degrades() {
        let eval = evaluator(Arc::new(Unreachable));
        let b = block("Book the Lisbon hotel near the river.", Source::Agent);
        let result = eval.evaluate(&b, &context(b.timestamp)).await;
        assert!(result.degraded);
        assert_eq!(result.failed, vec![Dimension::SemanticAlignment]);
        assert!(result.confidence < 0.5);
        assert!(!result.dimensions.contains_key(&Dimension::SemanticAlignment));
        assert!((0.0..=1.0).contains(&result.score));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_scorer_times_out() {
        let eval = evaluator(Arc::new(Stalled));
        let b = block("Book the Lisbon hotel near the river.", Source::Agent);
        let result = eval.evaluate(&b, &context(b.timestamp)).await;
        assert!(result.degraded);
        assert_eq!(result.failed, vec![Dimension::SemanticAlignment]);
    }

    #[tokio::test]
    async fn renormalizes_over_remaining_weights() {
        struct Fixed(Dimension, f32);

        #[async_trait]
        impl DimensionScorer for Fixed {
            fn dimension(&self) -> Dimension {
                self.0
            }
            async fn score(
                &self,
                _block: &ConversationBlock,
                _context: &EvaluationContext,
            ) -> Result<DimensionResult, EvaluationError> {
                if self.1 < 0.0 {
                    return Err(EvaluationError::ScorerFailed {
                        dimension: self.0.to_string(),
                        reason: "down".into(),
                    });
                }
                Ok(DimensionResult::new(self.1, 1.0, "fixed"))
            }
        }

        let scorers: Vec<Arc<dyn DimensionScorer>> = vec![
            Arc::new(Fixed(Dimension::SemanticAlignment, -1.0)),
            Arc::new(Fixed(Dimension::TemporalRelevance, 1.0)),
            Arc::new(Fixed(Dimension::GoalContribution, 0.0)),
            Arc::new(Fixed(Dimension::InformationQuality, 0.0)),
            Arc::new(Fixed(Dimension::FactualConsistency, 0.0)),
        ];
        let eval = CompositeEvaluator::with_scorers(
            scorers,
            EvaluationWeights::default(),
            Duration::from_secs(1),
        )
        .unwrap();
        let b = block("x", Source::User);
        let result = eval.evaluate(&b, &context(b.timestamp)).await;
        // temporal carries 0.20 of the remaining 0.70
        assert!((result.score - 0.2 / 0.7).abs() < 1e-5);
        assert!((result.confidence - 0.35).abs() < 1e-5);
    }

    #[tokio::test]
    async fn all_scorers_failing_keeps_previous_score() {
        let eval = CompositeEvaluator::with_scorers(
            Vec::new(),
            EvaluationWeights::default(),
            Duration::from_secs(1),
        )
        .unwrap();
        let b = block("x", Source::User);
        let result = eval.evaluate(&b, &context(b.timestamp)).await;
        assert_eq!(result.score, 0.5);
        assert_eq!(result.confidence, 0.0);
        assert!(result.degraded);
    }

    #[tokio::test]
    async fn weight_updates_are_validated() {
        let eval = evaluator(Arc::new(KeywordSimilarity));
        let mut bad = EvaluationWeights::default();
        bad.goal_contribution = 0.9;
        assert!(matches!(
            eval.update_weights(bad).await,
            Err(EvaluationError::InvalidWeights(_))
        ));

        eval.update_weights(EvaluationWeights::uniform()).await.unwrap();
        assert_eq!(eval.weights().await, EvaluationWeights::uniform());
    }
}
