//! Relevance dimensions and the scorer capability.

use async_trait::async_trait;
use recollect_config::EvaluationWeights;
use recollect_core::{ConversationBlock, EvaluationError};
use serde::{Deserialize, Serialize};

use crate::context::EvaluationContext;

/// One independently computed component of the relevance score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    SemanticAlignment,
    TemporalRelevance,
    GoalContribution,
    InformationQuality,
    FactualConsistency,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::SemanticAlignment,
        Dimension::TemporalRelevance,
        Dimension::GoalContribution,
        Dimension::InformationQuality,
        Dimension::FactualConsistency,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::SemanticAlignment => "semantic_alignment",
            Dimension::TemporalRelevance => "temporal_relevance",
            Dimension::GoalContribution => "goal_contribution",
            Dimension::InformationQuality => "information_quality",
            Dimension::FactualConsistency => "factual_consistency",
        }
    }

    pub fn weight(self, weights: &EvaluationWeights) -> f32 {
        match self {
            Dimension::SemanticAlignment => weights.semantic_alignment,
            Dimension::TemporalRelevance => weights.temporal_relevance,
            Dimension::GoalContribution => weights.goal_contribution,
            Dimension::InformationQuality => weights.information_quality,
            Dimension::FactualConsistency => weights.factual_consistency,
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a single dimension scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionResult {
    /// In `[0, 1]`.
    pub score: f32,
    /// How much the scorer trusts its own number, in `[0, 1]`.
    pub certainty: f32,
    pub reasoning: String,
}

impl DimensionResult {
    pub fn new(score: f32, certainty: f32, reasoning: impl Into<String>) -> Self {
        Self {
            score: recollect_core::clamp_unit(score),
            certainty: recollect_core::clamp_unit(certainty),
            reasoning: reasoning.into(),
        }
    }
}

/// Scores one dimension of a block against its conversational context.
///
/// New dimensions are added by implementing this trait.
#[async_trait]
pub trait DimensionScorer: Send + Sync {
    fn dimension(&self) -> Dimension;

    async fn score(
        &self,
        block: &ConversationBlock,
        context: &EvaluationContext,
    ) -> Result<DimensionResult, EvaluationError>;
}
